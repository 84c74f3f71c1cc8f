use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{DailyLimiterConfig, LimiterKey, RateLimiter, RateLimiterResponse};
use crate::data_management::history::TransactionHistory;
use crate::types::{RequestContext, Result};

/// Allows at most `allowed_daily_limit` requests per key and UTC calendar day.
pub struct DailyLimiter {
    key: LimiterKey,
    history: Arc<dyn TransactionHistory>,
    config: DailyLimiterConfig,
}

impl DailyLimiter {
    pub fn new(key: LimiterKey, history: Arc<dyn TransactionHistory>, config: DailyLimiterConfig) -> Self {
        Self { key, history, config }
    }

    async fn check(&self, key: &str) -> Result<RateLimiterResponse> {
        let today = Utc::now().date_naive();
        let count = self.history.count_on_day(self.key.field, key, today).await?;
        if count < self.config.allowed_daily_limit {
            return Ok(RateLimiterResponse::Allowed);
        }
        Ok(RateLimiterResponse::Rejected {
            reason: format!(
                "daily limit of {} meta transactions reached for given {}",
                self.config.allowed_daily_limit, self.key.field
            ),
        })
    }
}

#[async_trait]
impl RateLimiter for DailyLimiter {
    async fn is_allowed(&self, context: &RequestContext) -> RateLimiterResponse {
        let key = self.key.key(context);
        self.key.settle("daily", key, self.check(key).await)
    }
}
