//! Native asset handling: maps the chain's gas token onto its wrapped ERC-20
//! so both share one slippage-model namespace.

/// Placeholder address used by the API for the chain's native asset.
pub const NATIVE_TOKEN_PLACEHOLDER: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

// Default WETH address (mainnet)
const DEFAULT_WRAPPED_NATIVE: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

/// (chain id, native symbol, wrapped native token)
const NATIVE_TOKENS: &[(u64, &str, &str)] = &[
    (1, "ETH", "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
    (5, "ETH", "0xb4fbf271143f4fbf7b91a5ded31805e42b2208d6"),
    (10, "ETH", "0x4200000000000000000000000000000000000006"),
    (56, "BNB", "0xbb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c"),
    (137, "MATIC", "0x0d500b1d8e8ef31e21c99d1db9a6444d3adf1270"),
    (8453, "ETH", "0x4200000000000000000000000000000000000006"),
    (42161, "ETH", "0x82af49447d8a07e3bd95bd0d56f35241523fbab1"),
    (43114, "AVAX", "0xb31f66aa3c1e785363f0875a1b74e27b85fd66c7"),
];

/// Resolves native-asset aliases to the wrapped token of one chain.
#[derive(Debug, Clone)]
pub struct NativeTokenResolver {
    native_symbol: String,
    wrapped: String,
}

impl NativeTokenResolver {
    /// Resolver for a known chain; unknown chains fall back to mainnet WETH.
    pub fn for_chain(chain_id: u64) -> Self {
        let (symbol, wrapped) = NATIVE_TOKENS
            .iter()
            .find(|(id, _, _)| *id == chain_id)
            .map(|(_, symbol, wrapped)| (*symbol, *wrapped))
            .unwrap_or(("ETH", DEFAULT_WRAPPED_NATIVE));
        Self { native_symbol: symbol.to_string(), wrapped: wrapped.to_string() }
    }

    /// Overrides the wrapped token address.
    pub fn with_wrapped(mut self, wrapped: &str) -> Self {
        self.wrapped = wrapped.to_lowercase();
        self
    }

    pub fn wrapped_token(&self) -> &str {
        &self.wrapped
    }

    pub fn is_native(&self, token: &str) -> bool {
        token.eq_ignore_ascii_case(&self.native_symbol)
            || token.eq_ignore_ascii_case(NATIVE_TOKEN_PLACEHOLDER)
    }

    /// Lowercased token, with the native asset replaced by its wrapped form.
    pub fn normalize(&self, token: &str) -> String {
        if self.is_native(token) {
            self.wrapped.clone()
        } else {
            token.to_lowercase()
        }
    }
}

impl Default for NativeTokenResolver {
    fn default() -> Self {
        Self::for_chain(1)
    }
}
