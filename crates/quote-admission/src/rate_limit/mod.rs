//! Request quotas checked against persisted transaction history.
//!
//! Each limiter is keyed on one request field (API key or taker address) and
//! runs a single read-only aggregate query. A [`ComposableLimiter`] chains
//! limiters and stops at the first rejection.

pub mod composable;
pub mod daily;
pub mod rolling;
pub mod rolling_value;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::data_management::history::TransactionHistory;
use crate::types::{AdmissionError, KeyField, RequestContext, Result};

pub use composable::ComposableLimiter;
pub use daily::DailyLimiter;
pub use rolling::RollingLimiter;
pub use rolling_value::RollingValueLimiter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimiterResponse {
    Allowed,
    Rejected { reason: String },
}

impl RateLimiterResponse {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimiterResponse::Allowed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RateLimiterResponse::Allowed => None,
            RateLimiterResponse::Rejected { reason } => Some(reason),
        }
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Never fails: store errors are resolved by the limiter's [`FailMode`].
    async fn is_allowed(&self, context: &RequestContext) -> RateLimiterResponse;
}

/// What a limiter answers when its history query fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Allow the request and log the failure.
    #[default]
    Open,
    /// Reject the request.
    Closed,
}

impl std::str::FromStr for FailMode {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(FailMode::Open),
            "closed" => Ok(FailMode::Closed),
            other => Err(AdmissionError::Config(format!("unknown rate limiter fail mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Hours,
    Minutes,
}

impl IntervalUnit {
    pub fn duration(&self, number: u32) -> Duration {
        let unit_secs = match self {
            IntervalUnit::Hours => 3600,
            IntervalUnit::Minutes => 60,
        };
        Duration::from_secs(unit_secs * u64::from(number))
    }
}

/// Start of the trailing window of `number` units ending at `now`, `None`
/// when it falls outside the representable date range.
pub fn window_start(unit: IntervalUnit, number: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(unit.duration(number))
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalUnit::Hours => f.write_str("hours"),
            IntervalUnit::Minutes => f.write_str("minutes"),
        }
    }
}

/// Key extraction and failure handling shared by all limiters.
#[derive(Debug, Clone, Copy)]
pub struct LimiterKey {
    pub field: KeyField,
    pub fail_mode: FailMode,
}

impl LimiterKey {
    pub fn new(field: KeyField, fail_mode: FailMode) -> Self {
        Self { field, fail_mode }
    }

    pub fn key<'a>(&self, context: &'a RequestContext) -> &'a str {
        context.key_for(self.field)
    }

    fn settle(&self, limiter: &str, key: &str, result: Result<RateLimiterResponse>) -> RateLimiterResponse {
        match result {
            Ok(response) => response,
            Err(err) => {
                error!(limiter, field = %self.field, key, error = %err, fail_mode = ?self.fail_mode, "Rate limiter query failed.");
                match self.fail_mode {
                    FailMode::Open => RateLimiterResponse::Allowed,
                    FailMode::Closed => RateLimiterResponse::Rejected {
                        reason: format!("{} rate limiter is unavailable", limiter),
                    },
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DailyLimiterConfig {
    #[serde(alias = "allowedDailyLimit")]
    pub allowed_daily_limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollingLimiterConfig {
    #[serde(alias = "allowedLimit")]
    pub allowed_limit: u64,
    #[serde(alias = "intervalNumber")]
    pub interval_number: u32,
    #[serde(alias = "intervalUnit")]
    pub interval_unit: IntervalUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollingValueLimiterConfig {
    #[serde(alias = "allowedLimitEth")]
    pub allowed_limit_eth: Decimal,
    #[serde(alias = "intervalNumber")]
    pub interval_number: u32,
    #[serde(alias = "intervalUnit")]
    pub interval_unit: IntervalUnit,
}

/// `field -> limiter kind -> limiter settings`, in configured order, e.g.
/// `{"api_key": {"daily": {"allowed_daily_limit": 10}}}`.
pub type RateLimiterConfig = IndexMap<String, IndexMap<String, serde_json::Value>>;

fn limiter_settings<T: serde::de::DeserializeOwned>(field: &str, kind: &str, value: &serde_json::Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| AdmissionError::Config(format!("invalid {} rate limiter for {}: {}", kind, field, e)))
}

fn check_interval(field: &str, kind: &str, interval_number: u32, interval_unit: IntervalUnit) -> Result<()> {
    if interval_number == 0 {
        return Err(AdmissionError::Config(format!(
            "{} rate limiter for {} needs a positive interval_number",
            kind, field
        )));
    }
    if window_start(interval_unit, interval_number, Utc::now()).is_none() {
        return Err(AdmissionError::Config(format!(
            "{} rate limiter for {}: window of {} {} is out of range",
            kind, field, interval_number, interval_unit
        )));
    }
    Ok(())
}

/// Build the limiter chain described by `config`. Unknown fields or limiter
/// kinds, and an empty chain, are configuration errors.
pub fn limiter_from_config(
    config: &RateLimiterConfig,
    history: Arc<dyn TransactionHistory>,
    fail_mode: FailMode,
) -> Result<ComposableLimiter> {
    let mut limiters: Vec<Box<dyn RateLimiter>> = Vec::new();
    for (field_name, kinds) in config {
        let field: KeyField = field_name.parse()?;
        let key = LimiterKey::new(field, fail_mode);
        for (kind, value) in kinds {
            let limiter: Box<dyn RateLimiter> = match kind.as_str() {
                "daily" => {
                    let settings: DailyLimiterConfig = limiter_settings(field_name, kind, value)?;
                    Box::new(DailyLimiter::new(key, history.clone(), settings))
                }
                "rolling" => {
                    let settings: RollingLimiterConfig = limiter_settings(field_name, kind, value)?;
                    check_interval(field_name, kind, settings.interval_number, settings.interval_unit)?;
                    Box::new(RollingLimiter::new(key, history.clone(), settings))
                }
                "rolling_value" | "rollingValue" => {
                    let settings: RollingValueLimiterConfig = limiter_settings(field_name, kind, value)?;
                    check_interval(field_name, kind, settings.interval_number, settings.interval_unit)?;
                    Box::new(RollingValueLimiter::new(key, history.clone(), settings))
                }
                other => {
                    return Err(AdmissionError::Config(format!("unknown rate limiter type: {}", other)));
                }
            };
            limiters.push(limiter);
        }
    }
    ComposableLimiter::new(limiters)
}
