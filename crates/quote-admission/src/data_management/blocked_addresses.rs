//! Blocked counterparty addresses, served from a lazily refreshed snapshot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::data_management::cache::{RefreshPolicy, RefreshableCache, Reload, SnapshotSource};
use crate::metrics::MetricsSink;
use crate::types::{AdmissionError, Result};

pub const DEFAULT_MAX_BLOCKED_ADDRESSES: usize = 5000;

/// Relational store holding the blocked address table.
#[async_trait]
pub trait BlockedAddressRepository: Send + Sync + 'static {
    /// Up to `limit` blocked addresses.
    async fn blocked_addresses(&self, limit: usize) -> Result<Vec<String>>;
}

/// Blocked address table held in memory, for tests and local runs.
#[derive(Default)]
pub struct InMemoryBlockedAddressRepository {
    addresses: RwLock<Vec<String>>,
    unavailable: AtomicBool,
    delay: RwLock<Option<Duration>>,
    queries: AtomicUsize,
}

impl InMemoryBlockedAddressRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addresses(addresses: impl IntoIterator<Item = String>) -> Self {
        let repository = Self::new();
        repository.addresses.write().unwrap_or_else(|e| e.into_inner()).extend(addresses);
        repository
    }

    pub fn insert(&self, address: &str) {
        self.addresses.write().unwrap_or_else(|e| e.into_inner()).push(address.to_string());
    }

    pub fn clear(&self) {
        self.addresses.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// While set, every query fails as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes every query take at least `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockedAddressRepository for InMemoryBlockedAddressRepository {
    async fn blocked_addresses(&self, limit: usize) -> Result<Vec<String>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AdmissionError::Store("blocked address table unavailable".to_string()));
        }
        Ok(self
            .addresses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Loads the whole (capped) blocked address table as one snapshot.
pub struct BlockedAddressSource {
    repository: Arc<dyn BlockedAddressRepository>,
    max_entries: usize,
    metrics: Arc<dyn MetricsSink>,
}

#[async_trait]
impl SnapshotSource for BlockedAddressSource {
    type Snapshot = HashSet<String>;

    fn name(&self) -> &str {
        "blocked_addresses"
    }

    async fn reload(&self, _last_refreshed_at: DateTime<Utc>) -> Result<Reload<HashSet<String>>> {
        let rows = self.repository.blocked_addresses(self.max_entries).await?;
        if rows.len() >= self.max_entries {
            // the table is only fetched up to the cap, addresses past it are not enforced
            warn!(
                count = rows.len(),
                max_entries = self.max_entries,
                "Blocked address table reached the cache capacity."
            );
        }
        let addresses: HashSet<String> = rows.into_iter().map(|a| a.to_lowercase()).collect();
        info!(count = addresses.len(), "Refreshed blocked addresses.");
        self.metrics.blocked_addresses_cached(addresses.len());
        Ok(Reload::Replace { snapshot: addresses, refreshed_at: Utc::now() })
    }
}

/// Answers "is this counterparty blocked" from memory. A read that finds the
/// snapshot older than `ttl` starts one background refresh and is answered
/// from the stale snapshot.
#[derive(Clone)]
pub struct BlockedAddressCache {
    cache: RefreshableCache<BlockedAddressSource>,
}

impl BlockedAddressCache {
    pub fn new(
        repository: Arc<dyn BlockedAddressRepository>,
        ttl: Duration,
        max_entries: usize,
        refresh_timeout: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let source = BlockedAddressSource { repository, max_entries, metrics: metrics.clone() };
        Self {
            cache: RefreshableCache::new(source, RefreshPolicy::OnStaleRead { ttl }, refresh_timeout, metrics),
        }
    }

    /// Case-insensitive membership test against the current snapshot.
    pub fn is_blocked(&self, address: &str) -> bool {
        self.cache.read().value().contains(&address.to_lowercase())
    }

    /// Reloads in the caller's task regardless of the TTL.
    pub async fn refresh(&self) {
        self.cache.refresh_now().await;
    }

    /// Waits for the refresh started by a stale read, if any.
    pub async fn complete_update(&self) {
        self.cache.complete_update().await;
    }

    pub fn is_updating(&self) -> bool {
        self.cache.is_refreshing()
    }

    /// Number of addresses in the current snapshot.
    pub fn len(&self) -> usize {
        self.cache.peek().value().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.cache.source().max_entries
    }
}
