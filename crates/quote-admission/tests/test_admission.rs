//! End-to-end admission decisions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use quote_admission::data_management::blocked_addresses::{BlockedAddressCache, InMemoryBlockedAddressRepository};
use quote_admission::data_management::history::{InMemoryTransactionHistory, TransactionRecord};
use quote_admission::engine::SlippageModelManager;
use quote_admission::metrics::NoopMetrics;
use quote_admission::rate_limit::{limiter_from_config, FailMode};
use quote_admission::utils::native_token::NativeTokenResolver;
use quote_admission::{AdmissionDecision, LiquiditySource, QuoteAdmission, RequestContext};
use rust_decimal::Decimal;
use serde_json::json;

const BLOCKED_TAKER: &str = "0xA10612Ee5432B6395d1F0d6fB2601299a1c64274";
const TAKER: &str = "0x5f3b5dfeb7b28cdbd7faba78963ee202a494e2a2";

fn admission(history: Arc<InMemoryTransactionHistory>, rate_limited: bool) -> QuoteAdmission {
    let repository = Arc::new(InMemoryBlockedAddressRepository::with_addresses(vec![BLOCKED_TAKER.to_string()]));
    let blocked = BlockedAddressCache::new(
        repository,
        Duration::from_secs(60),
        100,
        Duration::from_secs(5),
        Arc::new(NoopMetrics),
    );
    let limiter = rate_limited.then(|| {
        let limits = serde_json::from_value(json!({"api_key": {"daily": {"allowed_daily_limit": 2}}})).unwrap();
        limiter_from_config(&limits, history, FailMode::Open).unwrap()
    });
    QuoteAdmission::new(blocked, limiter, SlippageModelManager::disabled(NativeTokenResolver::default()))
}

#[tokio::test]
async fn test_blocked_taker_is_rejected_before_rate_limits() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    let admission = admission(history.clone(), true);
    admission.initialize().await;
    admission.blocked_addresses().refresh().await;

    let context = RequestContext::new("api-key-1", BLOCKED_TAKER.to_lowercase());
    assert_eq!(admission.admit(&context).await, AdmissionDecision::Blocked);
    assert_eq!(history.query_count(), 0);
    admission.stop().await;
}

#[tokio::test]
async fn test_rate_limited_after_quota() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    let admission = admission(history.clone(), true);
    admission.blocked_addresses().refresh().await;
    let context = RequestContext::new("api-key-1", TAKER);

    assert!(admission.admit(&context).await.is_admitted());
    history.record(TransactionRecord::new("api-key-1", TAKER, Utc::now()));
    history.record(TransactionRecord::new("api-key-1", TAKER, Utc::now()));

    match admission.admit(&context).await {
        AdmissionDecision::RateLimited { reason } => assert!(reason.contains("daily")),
        other => panic!("expected rate limit, got {}", other),
    }
}

#[tokio::test]
async fn test_without_limiter_everyone_unblocked_is_admitted() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    let admission = admission(history.clone(), false);
    admission.blocked_addresses().refresh().await;
    for _ in 0..5 {
        history.record(TransactionRecord::new("api-key-1", TAKER, Utc::now()));
    }
    assert_eq!(admission.admit(&RequestContext::new("api-key-1", TAKER)).await, AdmissionDecision::Admitted);
}

#[tokio::test]
async fn test_expected_slippage_is_delegated() {
    let admission = admission(Arc::new(InMemoryTransactionHistory::new()), false);
    let sources = vec![LiquiditySource::new("0x", Decimal::ONE)];
    let slippage = admission.expected_slippage(
        "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        "ETH",
        Decimal::from(1000),
        Decimal::ONE,
        &sources,
        Decimal::new(3, 2),
    );
    assert_eq!(slippage, Some(Decimal::ZERO));
}
