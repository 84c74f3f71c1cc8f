//! Metrics sink injected into caches instead of process-wide registries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub trait MetricsSink: Send + Sync + 'static {
    /// Gauge: number of addresses currently held by the blocked-address cache.
    fn blocked_addresses_cached(&self, count: usize);
    /// Counter: the slippage model file exists but its producer stopped updating it.
    fn slippage_model_file_stale(&self, bucket: &str, file_name: &str);
    /// Counter: a cache refresh failed and the previous snapshot was kept.
    fn cache_refresh_failed(&self, _cache: &str) {}
}

pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn blocked_addresses_cached(&self, _: usize) {}
    fn slippage_model_file_stale(&self, _: &str, _: &str) {}
}

/// Snapshot of recorded metric values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub blocked_addresses_cached: usize,
    pub slippage_model_file_stale: HashMap<(String, String), usize>,
    pub cache_refresh_failures: HashMap<String, usize>,
}

/// In-process sink keeping the latest gauge value and labelled counters.
#[derive(Default)]
pub struct RecordingMetrics {
    blocked_addresses_cached: AtomicUsize,
    slippage_model_file_stale: Mutex<HashMap<(String, String), usize>>,
    cache_refresh_failures: Mutex<HashMap<String, usize>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stale_count(&self, bucket: &str, file_name: &str) -> usize {
        self.slippage_model_file_stale
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(bucket.to_string(), file_name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn refresh_failures(&self, cache: &str) -> usize {
        self.cache_refresh_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(cache)
            .copied()
            .unwrap_or(0)
    }

    /// Retrieve current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            blocked_addresses_cached: self.blocked_addresses_cached.load(Ordering::Relaxed),
            slippage_model_file_stale: self
                .slippage_model_file_stale
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            cache_refresh_failures: self
                .cache_refresh_failures
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

impl MetricsSink for RecordingMetrics {
    fn blocked_addresses_cached(&self, count: usize) {
        self.blocked_addresses_cached.store(count, Ordering::Relaxed);
    }

    fn slippage_model_file_stale(&self, bucket: &str, file_name: &str) {
        *self
            .slippage_model_file_stale
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((bucket.to_string(), file_name.to_string()))
            .or_insert(0) += 1;
    }

    fn cache_refresh_failed(&self, cache: &str) {
        *self
            .cache_refresh_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(cache.to_string())
            .or_insert(0) += 1;
    }
}
