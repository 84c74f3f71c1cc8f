//! Rate limiter tests against in-memory transaction history.

use std::sync::Arc;

use chrono::{Duration, Utc};
use quote_admission::data_management::history::{InMemoryTransactionHistory, TransactionRecord};
use quote_admission::rate_limit::{
    limiter_from_config, ComposableLimiter, DailyLimiter, DailyLimiterConfig, FailMode, IntervalUnit, LimiterKey,
    RateLimiter, RateLimiterConfig, RollingLimiter, RollingLimiterConfig,
};
use quote_admission::{KeyField, RequestContext};
use rust_decimal::Decimal;
use serde_json::json;

const API_KEY: &str = "api-key-1";
const TAKER: &str = "0x5f3b5dfeb7b28cdbd7faba78963ee202a494e2a2";
const OTHER_TAKER: &str = "0x0ba3a0c0be37a4f0f47f6fd6e0d94fe4b7a0e9b4";

fn context() -> RequestContext {
    RequestContext::new(API_KEY, TAKER)
}

fn config(value: serde_json::Value) -> RateLimiterConfig {
    serde_json::from_value(value).unwrap()
}

fn record_at(history: &InMemoryTransactionHistory, api_key: &str, taker: &str, age: Duration) {
    history.record(TransactionRecord::new(api_key, taker, Utc::now() - age));
}

fn wei(value: u64) -> Decimal {
    Decimal::from(value)
}

#[tokio::test]
async fn test_daily_limit() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    let limiter = limiter_from_config(
        &config(json!({"api_key": {"daily": {"allowed_daily_limit": 10}}})),
        history.clone(),
        FailMode::Open,
    )
    .unwrap();

    for _ in 0..9 {
        record_at(&history, API_KEY, TAKER, Duration::zero());
    }
    // other days and other keys do not count
    record_at(&history, API_KEY, TAKER, Duration::days(2));
    record_at(&history, "api-key-2", TAKER, Duration::zero());
    assert!(limiter.is_allowed(&context()).await.is_allowed());

    record_at(&history, API_KEY, TAKER, Duration::zero());
    let response = limiter.is_allowed(&context()).await;
    assert!(!response.is_allowed());
    assert!(response.reason().unwrap().contains("daily limit of 10"));
}

#[tokio::test]
async fn test_rolling_limit() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    let limiter = limiter_from_config(
        &config(json!({
            "api_key": {"rolling": {"allowed_limit": 10, "interval_number": 1, "interval_unit": "hours"}}
        })),
        history.clone(),
        FailMode::Open,
    )
    .unwrap();

    for _ in 0..9 {
        record_at(&history, API_KEY, TAKER, Duration::minutes(30));
    }
    record_at(&history, API_KEY, TAKER, Duration::hours(2));
    assert!(limiter.is_allowed(&context()).await.is_allowed());

    record_at(&history, API_KEY, TAKER, Duration::minutes(1));
    let response = limiter.is_allowed(&context()).await;
    assert!(!response.is_allowed());
    assert!(response.reason().unwrap().contains("1 hours"));
}

#[tokio::test]
async fn test_taker_rolling_limit_ignores_case() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    let limiter = limiter_from_config(
        &config(json!({
            "taker_address": {"rolling": {"allowedLimit": 2, "intervalNumber": 1, "intervalUnit": "minutes"}}
        })),
        history.clone(),
        FailMode::Open,
    )
    .unwrap();

    record_at(&history, "api-key-2", &TAKER.to_uppercase().replace("0X", "0x"), Duration::seconds(10));
    record_at(&history, API_KEY, OTHER_TAKER, Duration::seconds(10));
    record_at(&history, API_KEY, TAKER, Duration::minutes(5));
    assert!(limiter.is_allowed(&context()).await.is_allowed());

    record_at(&history, "api-key-3", TAKER, Duration::seconds(5));
    let response = limiter.is_allowed(&context()).await;
    assert!(!response.is_allowed());
    assert!(response.reason().unwrap().contains("taker_address"));
    assert!(limiter.is_allowed(&RequestContext::new(API_KEY, OTHER_TAKER)).await.is_allowed());
}

#[tokio::test]
async fn test_rolling_value_limit() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    let limiter = limiter_from_config(
        &config(json!({
            "taker_address": {"rolling_value": {"allowed_limit_eth": 1, "interval_number": 1, "interval_unit": "hours"}}
        })),
        history.clone(),
        FailMode::Open,
    )
    .unwrap();

    let small = TransactionRecord::new(API_KEY, TAKER, Utc::now() - Duration::minutes(10)).with_values(
        wei(100_000_000_000_000_000),
        wei(1_000_000_000),
        400_000,
    );
    for _ in 0..5 {
        history.record(small.clone());
    }
    assert!(limiter.is_allowed(&context()).await.is_allowed());

    let large = TransactionRecord::new(API_KEY, TAKER, Utc::now() - Duration::minutes(10)).with_values(
        wei(1_000_000_000_000_000_000),
        wei(1_000_000_000),
        400_000,
    );
    for _ in 0..10 {
        history.record(large.clone());
    }
    let response = limiter.is_allowed(&context()).await;
    assert!(!response.is_allowed());
    assert!(response.reason().unwrap().contains("ETH"));
}

#[tokio::test]
async fn test_chain_stops_at_first_rejection() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    let limiter = limiter_from_config(
        &config(json!({
            "api_key": {"daily": {"allowed_daily_limit": 1}},
            "taker_address": {
                "rolling": {"allowed_limit": 100, "interval_number": 1, "interval_unit": "hours"},
                "rolling_value": {"allowed_limit_eth": 10, "interval_number": 1, "interval_unit": "hours"}
            }
        })),
        history.clone(),
        FailMode::Open,
    )
    .unwrap();
    assert_eq!(limiter.len(), 3);

    assert!(limiter.is_allowed(&context()).await.is_allowed());
    assert_eq!(history.query_count(), 3);

    record_at(&history, API_KEY, TAKER, Duration::zero());
    let response = limiter.is_allowed(&context()).await;
    assert!(response.reason().unwrap().contains("daily"));
    assert_eq!(history.query_count(), 4);
}

#[tokio::test]
async fn test_store_failure_follows_fail_mode() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    history.set_unavailable(true);
    let limits = config(json!({"api_key": {"daily": {"allowed_daily_limit": 10}}}));

    let open = limiter_from_config(&limits, history.clone(), FailMode::Open).unwrap();
    assert!(open.is_allowed(&context()).await.is_allowed());

    let closed = limiter_from_config(&limits, history.clone(), FailMode::Closed).unwrap();
    let response = closed.is_allowed(&context()).await;
    assert!(!response.is_allowed());
    assert!(response.reason().unwrap().contains("unavailable"));
}

#[tokio::test]
async fn test_limiters_compose_directly() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    let key = LimiterKey::new(KeyField::TakerAddress, FailMode::Open);
    let limiters: Vec<Box<dyn RateLimiter>> = vec![
        Box::new(RollingLimiter::new(
            key,
            history.clone(),
            RollingLimiterConfig { allowed_limit: 1, interval_number: 5, interval_unit: IntervalUnit::Minutes },
        )),
        Box::new(DailyLimiter::new(key, history.clone(), DailyLimiterConfig { allowed_daily_limit: 5 })),
    ];
    let limiter = ComposableLimiter::new(limiters).unwrap();

    assert!(limiter.is_allowed(&context()).await.is_allowed());
    record_at(&history, API_KEY, TAKER, Duration::minutes(1));
    let response = limiter.is_allowed(&context()).await;
    assert!(response.reason().unwrap().contains("5 minutes"));
}

#[test]
fn test_invalid_configs_are_rejected() {
    let history = Arc::new(InMemoryTransactionHistory::new());
    let build = |value: serde_json::Value| limiter_from_config(&config(value), history.clone(), FailMode::Open);

    assert!(build(json!({})).is_err());
    assert!(ComposableLimiter::new(Vec::new()).is_err());
    assert!(build(json!({"ip_address": {"daily": {"allowed_daily_limit": 1}}})).is_err());
    assert!(build(json!({"api_key": {"weekly": {"allowed_limit": 1}}})).is_err());
    assert!(build(json!({"api_key": {"daily": {"allowed_limit": 1}}})).is_err());
    assert!(build(json!({
        "api_key": {"rolling": {"allowed_limit": 1, "interval_number": 0, "interval_unit": "hours"}}
    }))
    .is_err());
    assert!(build(json!({
        "api_key": {"rolling": {"allowed_limit": 1, "interval_number": 1, "interval_unit": "days"}}
    }))
    .is_err());
    // windows reaching past the representable date range fail at construction
    assert!(build(json!({
        "api_key": {"rolling": {"allowed_limit": 1, "interval_number": 4_000_000_000u64, "interval_unit": "hours"}}
    }))
    .is_err());
    assert!(build(json!({
        "taker_address": {"rolling_value": {"allowed_limit_eth": 1, "interval_number": 4_000_000_000u64, "interval_unit": "hours"}}
    }))
    .is_err());
    assert!(build(json!({
        "api_key": {"rolling": {"allowed_limit": 1, "interval_number": 4_000_000_000u64, "interval_unit": "minutes"}}
    }))
    .is_ok());
    assert!(build(json!({"apiKey": {"daily": {"allowedDailyLimit": 1}}})).is_ok());
}
