//! Blocked address cache tests.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use quote_admission::data_management::blocked_addresses::{BlockedAddressCache, InMemoryBlockedAddressRepository};
use quote_admission::metrics::RecordingMetrics;

const BLOCKED: &str = "0xA10612Ee5432B6395d1F0d6fB2601299a1c64274";
const OTHER: &str = "0x8A1f6A3c2C0b54E6C0d3a1A5d7b8f9Ee0e1F2a3b";

fn cache_with(
    repository: Arc<InMemoryBlockedAddressRepository>,
    ttl: Duration,
    refresh_timeout: Duration,
) -> (BlockedAddressCache, Arc<RecordingMetrics>) {
    let metrics = Arc::new(RecordingMetrics::new());
    let cache = BlockedAddressCache::new(repository, ttl, 5000, refresh_timeout, metrics.clone());
    (cache, metrics)
}

#[tokio::test]
async fn test_stale_read_then_refreshed() {
    let repository = Arc::new(InMemoryBlockedAddressRepository::with_addresses(vec![BLOCKED.to_string()]));
    let (cache, metrics) = cache_with(repository.clone(), Duration::from_millis(200), Duration::from_secs(5));

    // first read sees the empty snapshot and starts loading
    assert!(!cache.is_blocked(BLOCKED));
    cache.complete_update().await;
    assert!(cache.is_blocked(BLOCKED));
    assert!(cache.is_blocked(&BLOCKED.to_lowercase()));
    assert!(cache.is_blocked(&BLOCKED.to_uppercase().replace("0X", "0x")));
    assert!(!cache.is_blocked(OTHER));
    assert_eq!(metrics.snapshot().blocked_addresses_cached, 1);

    // fresh snapshot: new rows are not visible yet
    repository.insert(OTHER);
    assert!(!cache.is_blocked(OTHER));
    cache.complete_update().await;
    assert!(!cache.is_blocked(OTHER));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!cache.is_blocked(OTHER));
    cache.complete_update().await;
    assert!(cache.is_blocked(OTHER));
    assert_eq!(repository.query_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stale_reads_share_one_query() {
    let repository = Arc::new(InMemoryBlockedAddressRepository::with_addresses(vec![BLOCKED.to_string()]));
    repository.set_delay(Some(Duration::from_millis(300)));
    let (cache, _) = cache_with(repository.clone(), Duration::from_secs(60), Duration::from_secs(5));

    let reads = (0..32).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.is_blocked(BLOCKED) })
    });
    let results = join_all(reads).await;
    assert!(results.into_iter().all(|r| !r.unwrap()));
    assert!(cache.is_updating());

    cache.complete_update().await;
    assert!(!cache.is_updating());
    assert!(cache.is_blocked(BLOCKED));
    assert_eq!(repository.query_count(), 1);
}

#[tokio::test]
async fn test_failed_refresh_is_retried_on_next_read() {
    let repository = Arc::new(InMemoryBlockedAddressRepository::with_addresses(vec![BLOCKED.to_string()]));
    repository.set_unavailable(true);
    let (cache, metrics) = cache_with(repository.clone(), Duration::from_secs(60), Duration::from_secs(5));

    assert!(!cache.is_blocked(BLOCKED));
    cache.complete_update().await;
    assert!(!cache.is_updating());
    assert_eq!(metrics.refresh_failures("blocked_addresses"), 1);

    // expiry was left in the past, so the next read tries again
    repository.set_unavailable(false);
    assert!(!cache.is_blocked(BLOCKED));
    cache.complete_update().await;
    assert!(cache.is_blocked(BLOCKED));
    assert_eq!(repository.query_count(), 2);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let repository = Arc::new(InMemoryBlockedAddressRepository::with_addresses(vec![BLOCKED.to_string()]));
    let (cache, metrics) = cache_with(repository.clone(), Duration::from_millis(200), Duration::from_secs(5));
    cache.refresh().await;
    assert!(cache.is_blocked(BLOCKED));

    repository.set_unavailable(true);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(cache.is_blocked(BLOCKED));
    cache.complete_update().await;
    assert!(cache.is_blocked(BLOCKED));
    assert_eq!(metrics.refresh_failures("blocked_addresses"), 1);
}

#[tokio::test]
async fn test_slow_refresh_times_out() {
    let repository = Arc::new(InMemoryBlockedAddressRepository::with_addresses(vec![BLOCKED.to_string()]));
    repository.set_delay(Some(Duration::from_millis(500)));
    let (cache, metrics) = cache_with(repository.clone(), Duration::from_secs(60), Duration::from_millis(50));

    assert!(!cache.is_blocked(BLOCKED));
    tokio::time::timeout(Duration::from_millis(400), cache.complete_update())
        .await
        .expect("refresh should give up after its timeout");
    assert!(!cache.is_updating());
    assert!(cache.is_empty());
    assert_eq!(metrics.refresh_failures("blocked_addresses"), 1);
}

#[tokio::test]
async fn test_table_is_capped() {
    let addresses = (0..3).map(|i| format!("0x{:040x}", i + 1));
    let repository = Arc::new(InMemoryBlockedAddressRepository::with_addresses(addresses));
    let metrics = Arc::new(RecordingMetrics::new());
    let cache = BlockedAddressCache::new(repository, Duration::from_secs(60), 2, Duration::from_secs(5), metrics.clone());

    cache.refresh().await;
    assert_eq!(cache.max_entries(), 2);
    assert_eq!(cache.len(), 2);
    assert_eq!(metrics.snapshot().blocked_addresses_cached, 2);
    assert!(!cache.is_blocked(&format!("0x{:040x}", 3)));
}

#[tokio::test]
async fn test_complete_update_without_refresh_returns() {
    let repository = Arc::new(InMemoryBlockedAddressRepository::new());
    let (cache, _) = cache_with(repository.clone(), Duration::from_secs(60), Duration::from_secs(5));
    cache.complete_update().await;
    assert!(!cache.is_updating());
    assert_eq!(repository.query_count(), 0);
}
