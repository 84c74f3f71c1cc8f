//! Control flow in front of quoting: blocked counterparties first, then the
//! rate-limiter chain.

use std::fmt;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::data_management::blocked_addresses::BlockedAddressCache;
use crate::engine::slippage::SlippageModelManager;
use crate::rate_limit::{ComposableLimiter, RateLimiter, RateLimiterResponse};
use crate::types::{LiquiditySource, RequestContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted,
    Blocked,
    RateLimited { reason: String },
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted)
    }
}

impl fmt::Display for AdmissionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionDecision::Admitted => f.write_str("admitted"),
            AdmissionDecision::Blocked => f.write_str("blocked"),
            AdmissionDecision::RateLimited { reason } => write!(f, "rate limited: {}", reason),
        }
    }
}

pub struct QuoteAdmission {
    blocked: BlockedAddressCache,
    limiter: Option<ComposableLimiter>,
    slippage: SlippageModelManager,
}

impl QuoteAdmission {
    /// `limiter` is optional: without one every unblocked request is admitted.
    pub fn new(
        blocked: BlockedAddressCache,
        limiter: Option<ComposableLimiter>,
        slippage: SlippageModelManager,
    ) -> Self {
        Self { blocked, limiter, slippage }
    }

    /// Loads slippage models and starts their periodic refresh.
    pub async fn initialize(&self) {
        self.slippage.initialize().await;
        info!(
            slippage_models = self.slippage.is_enabled(),
            rate_limited = self.limiter.is_some(),
            "Quote admission initialized."
        );
    }

    pub async fn stop(&self) {
        self.slippage.stop().await;
    }

    pub async fn admit(&self, context: &RequestContext) -> AdmissionDecision {
        if self.blocked.is_blocked(&context.taker_address) {
            debug!(taker_address = %context.taker_address, "Rejected blocked taker.");
            return AdmissionDecision::Blocked;
        }
        let Some(limiter) = &self.limiter else {
            return AdmissionDecision::Admitted;
        };
        match limiter.is_allowed(context).await {
            RateLimiterResponse::Allowed => AdmissionDecision::Admitted,
            RateLimiterResponse::Rejected { reason } => {
                debug!(api_key = %context.api_key, taker_address = %context.taker_address, %reason, "Rate limited.");
                AdmissionDecision::RateLimited { reason }
            }
        }
    }

    /// See [`SlippageModelManager::calculate_expected_slippage`].
    pub fn expected_slippage(
        &self,
        buy_token: &str,
        sell_token: &str,
        buy_amount: Decimal,
        sell_amount: Decimal,
        sources: &[LiquiditySource],
        max_slippage_rate: Decimal,
    ) -> Option<Decimal> {
        self.slippage
            .calculate_expected_slippage(buy_token, sell_token, buy_amount, sell_amount, sources, max_slippage_rate)
    }

    pub fn blocked_addresses(&self) -> &BlockedAddressCache {
        &self.blocked
    }

    pub fn slippage_models(&self) -> &SlippageModelManager {
        &self.slippage
    }
}
