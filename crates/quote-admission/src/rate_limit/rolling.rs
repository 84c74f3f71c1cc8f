use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{window_start, LimiterKey, RateLimiter, RateLimiterResponse, RollingLimiterConfig};
use crate::data_management::history::TransactionHistory;
use crate::types::{AdmissionError, RequestContext, Result};

/// Allows at most `allowed_limit` requests per key within the trailing window.
pub struct RollingLimiter {
    key: LimiterKey,
    history: Arc<dyn TransactionHistory>,
    config: RollingLimiterConfig,
}

impl RollingLimiter {
    pub fn new(key: LimiterKey, history: Arc<dyn TransactionHistory>, config: RollingLimiterConfig) -> Self {
        Self { key, history, config }
    }

    async fn check(&self, key: &str) -> Result<RateLimiterResponse> {
        let (unit, number) = (self.config.interval_unit, self.config.interval_number);
        let since = window_start(unit, number, Utc::now())
            .ok_or_else(|| AdmissionError::Config(format!("window of {} {} is out of range", number, unit)))?;
        let count = self.history.count_since(self.key.field, key, since).await?;
        if count < self.config.allowed_limit {
            return Ok(RateLimiterResponse::Allowed);
        }
        Ok(RateLimiterResponse::Rejected {
            reason: format!(
                "limit of {} meta transactions in the last {} {} reached for given {}",
                self.config.allowed_limit, self.config.interval_number, self.config.interval_unit, self.key.field
            ),
        })
    }
}

#[async_trait]
impl RateLimiter for RollingLimiter {
    async fn is_allowed(&self, context: &RequestContext) -> RateLimiterResponse {
        let key = self.key.key(context);
        self.key.settle("rolling", key, self.check(key).await)
    }
}
