use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use super::{window_start, LimiterKey, RateLimiter, RateLimiterResponse, RollingValueLimiterConfig};
use crate::data_management::history::TransactionHistory;
use crate::types::{AdmissionError, RequestContext, Result};

const WEI_PER_ETH: u64 = 1_000_000_000_000_000_000;

/// Caps the notional value (gas spent plus value sent, in ETH) per key within
/// the trailing window.
pub struct RollingValueLimiter {
    key: LimiterKey,
    history: Arc<dyn TransactionHistory>,
    config: RollingValueLimiterConfig,
}

impl RollingValueLimiter {
    pub fn new(key: LimiterKey, history: Arc<dyn TransactionHistory>, config: RollingValueLimiterConfig) -> Self {
        Self { key, history, config }
    }

    async fn check(&self, key: &str) -> Result<RateLimiterResponse> {
        let (unit, number) = (self.config.interval_unit, self.config.interval_number);
        let since = window_start(unit, number, Utc::now())
            .ok_or_else(|| AdmissionError::Config(format!("window of {} {} is out of range", number, unit)))?;
        let sum_wei = self.history.sum_value_since(self.key.field, key, since).await?;
        let sum_eth = sum_wei
            .checked_div(Decimal::from(WEI_PER_ETH))
            .ok_or_else(|| AdmissionError::Store(format!("invalid value sum {} for {}", sum_wei, key)))?;
        if sum_eth < self.config.allowed_limit_eth {
            return Ok(RateLimiterResponse::Allowed);
        }
        Ok(RateLimiterResponse::Rejected {
            reason: format!(
                "limit of {} ETH spent in the last {} {} reached for given {}",
                self.config.allowed_limit_eth, self.config.interval_number, self.config.interval_unit, self.key.field
            ),
        })
    }
}

#[async_trait]
impl RateLimiter for RollingValueLimiter {
    async fn is_allowed(&self, context: &RequestContext) -> RateLimiterResponse {
        let key = self.key.key(context);
        self.key.settle("rolling_value", key, self.check(key).await)
    }
}
