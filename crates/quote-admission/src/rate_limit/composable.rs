use async_trait::async_trait;

use super::{RateLimiter, RateLimiterResponse};
use crate::types::{AdmissionError, RequestContext, Result};

/// Runs limiters in configured order and returns the first rejection.
pub struct ComposableLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl ComposableLimiter {
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Result<Self> {
        if limiters.is_empty() {
            return Err(AdmissionError::Config(
                "composable rate limiter needs at least one limiter".to_string(),
            ));
        }
        Ok(Self { limiters })
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

#[async_trait]
impl RateLimiter for ComposableLimiter {
    async fn is_allowed(&self, context: &RequestContext) -> RateLimiterResponse {
        for limiter in &self.limiters {
            let response = limiter.is_allowed(context).await;
            if !response.is_allowed() {
                return response;
            }
        }
        RateLimiterResponse::Allowed
    }
}
