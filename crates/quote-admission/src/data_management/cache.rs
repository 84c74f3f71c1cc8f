//! Snapshot caches kept loosely in sync with a slower backing store.
//!
//! A [`RefreshableCache`] holds one immutable snapshot behind an `Arc` and
//! replaces it wholesale when its [`SnapshotSource`] produces a new one. Reads
//! never block on I/O. At most one refresh runs per cache instance; what
//! starts a refresh is decided by the [`RefreshPolicy`]:
//!
//! * [`RefreshPolicy::Periodic`]: a timer task spawned by
//!   [`RefreshableCache::spawn_periodic`] refreshes on a fixed period.
//! * [`RefreshPolicy::OnStaleRead`]: a [`RefreshableCache::read`] that
//!   observes an expired snapshot starts a background refresh and still
//!   returns the old snapshot.

use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::metrics::MetricsSink;
use crate::types::{AdmissionError, Result};

pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of asking a source for fresh data.
#[derive(Debug)]
pub enum Reload<T> {
    /// Source has nothing newer than what is cached.
    Unchanged,
    /// Source is absent or unusable; the cache goes back to empty.
    Reset,
    /// New snapshot, stamped with the source's own modification time.
    Replace { snapshot: T, refreshed_at: DateTime<Utc> },
}

/// Authoritative backing data for a [`RefreshableCache`].
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    type Snapshot: Default + Send + Sync + 'static;

    /// Label used in logs and metrics.
    fn name(&self) -> &str;

    /// Load a new snapshot. `last_refreshed_at` is the stamp of the snapshot
    /// currently installed (`UNIX_EPOCH` when empty).
    async fn reload(&self, last_refreshed_at: DateTime<Utc>) -> Result<Reload<Self::Snapshot>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    Periodic { interval: Duration },
    OnStaleRead { ttl: Duration },
}

impl RefreshPolicy {
    fn lifetime(&self) -> Duration {
        match self {
            RefreshPolicy::Periodic { interval } => *interval,
            RefreshPolicy::OnStaleRead { ttl } => *ttl,
        }
    }
}

/// One installed snapshot and its timestamps.
#[derive(Debug)]
pub struct CacheEntry<T> {
    value: Arc<T>,
    last_refreshed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn last_refreshed_at(&self) -> DateTime<Utc> {
        self.last_refreshed_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

fn empty_entry<T: Default>() -> CacheEntry<T> {
    CacheEntry {
        value: Arc::new(T::default()),
        last_refreshed_at: DateTime::<Utc>::UNIX_EPOCH,
        expires_at: DateTime::<Utc>::UNIX_EPOCH,
    }
}

fn after(now: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct Inner<S: SnapshotSource> {
    source: S,
    policy: RefreshPolicy,
    refresh_timeout: Duration,
    entry: RwLock<Arc<CacheEntry<S::Snapshot>>>,
    // true while a refresh is in flight
    updating: watch::Sender<bool>,
    metrics: Arc<dyn MetricsSink>,
}

/// Clears the in-flight flag however the refresh ends.
struct InFlightGuard<'a>(&'a watch::Sender<bool>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl<S: SnapshotSource> Inner<S> {
    fn current(&self) -> Arc<CacheEntry<S::Snapshot>> {
        self.entry.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn install(&self, entry: CacheEntry<S::Snapshot>) {
        *self.entry.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(entry);
    }

    /// Atomically flips the in-flight flag; false if a refresh is already running.
    fn try_start(&self) -> bool {
        self.updating.send_if_modified(|updating| {
            if *updating {
                false
            } else {
                *updating = true;
                true
            }
        })
    }

    async fn wait_idle(&self) {
        let mut rx = self.updating.subscribe();
        let _ = rx.wait_for(|updating| !*updating).await;
    }

    async fn refresh_or_wait(&self) {
        if self.try_start() {
            self.run_refresh().await;
        } else {
            self.wait_idle().await;
        }
    }

    /// Must only be called after a successful `try_start`.
    async fn run_refresh(&self) {
        let _guard = InFlightGuard(&self.updating);
        let name = self.source.name();
        let previous = self.current();

        let outcome = match tokio::time::timeout(
            self.refresh_timeout,
            self.source.reload(previous.last_refreshed_at),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(AdmissionError::Timeout(self.refresh_timeout)),
        };

        let now = Utc::now();
        let expires_at = after(now, self.policy.lifetime());
        match outcome {
            Ok(Reload::Replace { snapshot, refreshed_at }) => {
                debug!(cache = name, %refreshed_at, "Installing new snapshot.");
                self.install(CacheEntry { value: Arc::new(snapshot), last_refreshed_at: refreshed_at, expires_at });
            }
            Ok(Reload::Reset) => {
                debug!(cache = name, "Resetting cache to empty.");
                self.install(CacheEntry { expires_at, ..empty_entry() });
            }
            Ok(Reload::Unchanged) => {
                self.install(CacheEntry {
                    value: previous.value.clone(),
                    last_refreshed_at: previous.last_refreshed_at,
                    expires_at,
                });
            }
            Err(err) => {
                // previous snapshot and its expiry stay in place so a later read retries
                error!(
                    cache = name,
                    error = %err,
                    last_refreshed_at = %previous.last_refreshed_at,
                    "Failed to refresh cache."
                );
                self.metrics.cache_refresh_failed(name);
            }
        }
    }
}

/// Generic snapshot cache, see the module docs.
pub struct RefreshableCache<S: SnapshotSource>(Arc<Inner<S>>);

impl<S: SnapshotSource> Clone for RefreshableCache<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<S: SnapshotSource> RefreshableCache<S> {
    /// Creates an empty cache. The first refresh always loads since the
    /// empty snapshot is stamped `UNIX_EPOCH` and already expired.
    pub fn new(
        source: S,
        policy: RefreshPolicy,
        refresh_timeout: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (updating, _) = watch::channel(false);
        Self(Arc::new(Inner {
            source,
            policy,
            refresh_timeout,
            entry: RwLock::new(Arc::new(empty_entry())),
            updating,
            metrics,
        }))
    }

    pub fn source(&self) -> &S {
        &self.0.source
    }

    /// Current snapshot. Under [`RefreshPolicy::OnStaleRead`] an expired
    /// snapshot starts a background refresh; the stale one is still returned.
    pub fn read(&self) -> Arc<CacheEntry<S::Snapshot>> {
        let entry = self.0.current();
        if let RefreshPolicy::OnStaleRead { .. } = self.0.policy {
            if entry.is_expired(Utc::now()) {
                self.trigger_refresh();
            }
        }
        entry
    }

    /// Current snapshot without any refresh side effect.
    pub fn peek(&self) -> Arc<CacheEntry<S::Snapshot>> {
        self.0.current()
    }

    pub fn is_refreshing(&self) -> bool {
        *self.0.updating.borrow()
    }

    /// Starts a background refresh unless one is already in flight.
    /// Returns whether a new refresh was started.
    pub fn trigger_refresh(&self) -> bool {
        if !self.0.try_start() {
            return false;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let inner = self.0.clone();
                handle.spawn(async move {
                    inner.run_refresh().await;
                });
                true
            }
            Err(_) => {
                warn!(cache = self.0.source.name(), "No tokio runtime, skipping background refresh.");
                self.0.updating.send_replace(false);
                false
            }
        }
    }

    /// Refreshes in the caller's task, or waits for the refresh already in flight.
    pub async fn refresh_now(&self) {
        self.0.refresh_or_wait().await;
    }

    /// Waits for an in-flight refresh; returns at once if there is none.
    pub async fn complete_update(&self) {
        self.0.wait_idle().await;
    }

    /// Spawns the fixed-period refresh task for [`RefreshPolicy::Periodic`]
    /// caches. Returns `None` for other policies. The task only holds a weak
    /// reference, so it also ends when the cache is dropped.
    pub fn spawn_periodic(&self) -> Option<RefreshTask> {
        let RefreshPolicy::Periodic { interval } = self.0.policy else {
            return None;
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_periodic(Arc::downgrade(&self.0), interval, shutdown_rx));
        Some(RefreshTask { shutdown: Some(shutdown), handle })
    }
}

async fn run_periodic<S: SnapshotSource>(
    inner: Weak<Inner<S>>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick fires immediately; the caller has just refreshed
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.refresh_or_wait().await;
            }
        }
    }
}

/// Handle to a periodic refresh task. Dropping it stops the task too.
pub struct RefreshTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RefreshTask {
    /// Stops the timer and waits for the task to exit. A refresh already
    /// running is allowed to finish.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
