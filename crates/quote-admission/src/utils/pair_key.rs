//! Canonical, order-independent key for a token pair.

use std::fmt;
use std::str::FromStr;

use crate::types::{AdmissionError, Result};

const SEPARATOR: char = '-';

/// Two lowercase token identifiers in sorted order, so `(a, b)` and `(b, a)`
/// produce the same key. Identifiers are non-empty and never contain `-`, so
/// the `token0-token1` form always decomposes back into the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    token0: String,
    token1: String,
}

impl PairKey {
    pub fn new(token_a: &str, token_b: &str) -> Result<Self> {
        let (a, b) = (token_id(token_a)?, token_id(token_b)?);
        let (token0, token1) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self { token0, token1 })
    }

    /// Canonically first token of the pair.
    pub fn token0(&self) -> &str {
        &self.token0
    }

    pub fn token1(&self) -> &str {
        &self.token1
    }

    pub fn tokens(&self) -> (&str, &str) {
        (&self.token0, &self.token1)
    }
}

fn token_id(token: &str) -> Result<String> {
    if token.is_empty() || token.contains(SEPARATOR) {
        return Err(AdmissionError::Config(format!("invalid token id for pair key: {:?}", token)));
    }
    Ok(token.to_lowercase())
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.token0, SEPARATOR, self.token1)
    }
}

impl FromStr for PairKey {
    type Err = AdmissionError;

    fn from_str(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split(SEPARATOR).collect();
        match parts.as_slice() {
            [a, b] if !a.is_empty() && !b.is_empty() => PairKey::new(a, b),
            _ => Err(AdmissionError::Config(format!("invalid pair key: {}", key))),
        }
    }
}
