//! Common types, error handling, shared request/response models.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Common error type for the admission layer.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// Invalid configuration. Raised at construction time, never per request.
    #[error("Config error: {0}")]
    Config(String),
    /// A backing store (object store, relational store) failed.
    #[error("Store error: {0}")]
    Store(String),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// Data parsed but did not satisfy the expected schema.
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Refresh timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Database field a rate limiter keys its history query on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    ApiKey,
    TakerAddress,
}

impl KeyField {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyField::ApiKey => "api_key",
            KeyField::TakerAddress => "taker_address",
        }
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyField {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "api_key" | "apiKey" => Ok(KeyField::ApiKey),
            "taker_address" | "takerAddress" => Ok(KeyField::TakerAddress),
            other => Err(AdmissionError::Config(format!(
                "unsupported rate limiter field: {}",
                other
            ))),
        }
    }
}

/// Identity of an inbound pricing/submission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub api_key: String,
    pub taker_address: String,
}

impl RequestContext {
    pub fn new(api_key: impl Into<String>, taker_address: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), taker_address: taker_address.into() }
    }

    /// Value of the field a limiter is keyed on.
    pub fn key_for(&self, field: KeyField) -> &str {
        match field {
            KeyField::ApiKey => &self.api_key,
            KeyField::TakerAddress => &self.taker_address,
        }
    }
}

/// One liquidity source of a quote and its share of the fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquiditySource {
    pub name: String,
    /// Share of the fill in `[0, 1]`.
    pub proportion: Decimal,
}

impl LiquiditySource {
    pub fn new(name: impl Into<String>, proportion: Decimal) -> Self {
        Self { name: name.into(), proportion }
    }
}
