use std::str::FromStr;

use alloy_primitives::Address;
use anyhow::anyhow;
use serde::Deserialize;

/// Load a list of addresses from a JSON `["0x..."]` or TOML `addresses=[...]` file.
/// Accepts absolute or relative path. Addresses are returned lowercased.
pub fn load_address_list<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(&path)
        .map_err(|e| anyhow!("unable to read address list {}: {}", path.as_ref().display(), e))?;

    // 1. Try JSON array
    if let Ok(vec) = serde_json::from_str::<Vec<String>>(&text) {
        return parse_addresses(vec);
    }

    // 2. Try TOML with wrapper
    #[derive(Deserialize)]
    struct Wrapper { addresses: Vec<String> }
    let wrapper: Wrapper = toml::from_str(&text)
        .map_err(|e| anyhow!("address list {} is not valid JSON nor TOML: {}", path.as_ref().display(), e))?;
    parse_addresses(wrapper.addresses)
}

fn parse_addresses(list: Vec<String>) -> anyhow::Result<Vec<String>> {
    list.into_iter()
        .map(|s| {
            Address::from_str(s.trim())
                .map(|address| format!("{:#x}", address))
                .map_err(|e| anyhow!("invalid address {}: {}", s, e))
        })
        .collect()
}

/// 20-byte hex address, `0x` prefix optional, any case.
pub fn is_address(s: &str) -> bool {
    Address::from_str(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_json_and_toml_lists() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("blocked.json");
        let mut f = std::fs::File::create(&json_path).unwrap();
        writeln!(f, r#"["0xA10612Ee5432B6395d1F0d6fB2601299a1c64274"]"#).unwrap();
        assert_eq!(
            load_address_list(&json_path).unwrap(),
            vec!["0xa10612ee5432b6395d1f0d6fb2601299a1c64274".to_string()]
        );

        let toml_path = dir.path().join("blocked.toml");
        let mut f = std::fs::File::create(&toml_path).unwrap();
        writeln!(f, r#"addresses = ["0xB10612Ee5432B6395d1F0d6fB2601299a1c64274"]"#).unwrap();
        assert_eq!(
            load_address_list(&toml_path).unwrap(),
            vec!["0xb10612ee5432b6395d1f0d6fb2601299a1c64274".to_string()]
        );
    }

    #[test]
    fn test_rejects_invalid_address() {
        assert!(!is_address("0x1234"));
        assert!(!is_address("0x0612ee5432b6395d1f0d6fb2601299a1c6427400"));
        assert!(is_address("0xA10612Ee5432B6395d1F0d6fB2601299a1c64274"));
        assert!(parse_addresses(vec!["0xzz0612ee5432b6395d1f0d6fb2601299a1c64274".into()]).is_err());
        assert!(parse_addresses(vec!["".into()]).is_err());
    }

    #[test]
    fn test_addresses_are_normalized() {
        let parsed = parse_addresses(vec![
            "0xA10612Ee5432B6395d1F0d6fB2601299a1c64274".into(),
            " a10612ee5432b6395d1f0d6fb2601299a1c64275 ".into(),
        ])
        .unwrap();
        assert_eq!(
            parsed,
            vec![
                "0xa10612ee5432b6395d1f0d6fb2601299a1c64274".to_string(),
                "0xa10612ee5432b6395d1f0d6fb2601299a1c64275".to_string(),
            ]
        );
    }
}
