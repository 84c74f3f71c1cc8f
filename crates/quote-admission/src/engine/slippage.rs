//! Expected slippage from per-source linear models.
//!
//! Models are fitted offline and published as one JSON file per chain in an
//! object store. [`SlippageModelManager`] keeps the parsed file in memory,
//! refreshed on a fixed period, and combines the per-source models of a
//! quote into one bounded estimate.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::data_management::cache::{
    RefreshPolicy, RefreshTask, RefreshableCache, Reload, SnapshotSource,
};
use crate::data_management::object_store::ObjectStore;
use crate::metrics::MetricsSink;
use crate::types::{AdmissionError, LiquiditySource, Result};
use crate::utils::native_token::NativeTokenResolver;
use crate::utils::PairKey;

pub const ONE_IN_BASE_POINTS: u32 = 10_000;

/// Source names of the protocol's own liquidity. `Native` is kept for older callers.
pub const NATIVE_LIQUIDITY_SOURCES: [&str; 2] = ["0x", "Native"];

/// Regression fitted for one (pair, liquidity source).
#[derive(Debug, Clone, PartialEq)]
pub struct SlippageModel {
    pub token0: String,
    pub token1: String,
    pub source: String,
    pub slippage_coefficient: Decimal,
    pub volume_coefficient: Decimal,
    pub intercept: Decimal,
    pub token0_price_in_usd: Decimal,
}

/// Row layout of the model file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SlippageModelRow {
    token0: String,
    token1: String,
    source: String,
    slippage_coefficient: f64,
    volume_coefficient: f64,
    intercept: f64,
    token0_price_in_usd: f64,
}

fn to_decimal(field: &str, index: usize, value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(AdmissionError::Schema(format!("row {}: {} is not finite", index, field)));
    }
    // f64 Display is the shortest round-trip form, so 1e-7 stays exactly 0.0000001
    Decimal::from_str(&value.to_string())
        .map_err(|_| AdmissionError::Schema(format!("row {}: {} out of range", index, field)))
}

fn non_empty(field: &str, index: usize, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(AdmissionError::Schema(format!("row {}: {} is empty", index, field)));
    }
    Ok(value)
}

/// Parse and validate the model file. Any row violating the schema rejects
/// the whole file.
pub fn parse_slippage_models(content: &str) -> Result<Vec<SlippageModel>> {
    let rows: Vec<SlippageModelRow> = serde_json::from_str(content)?;
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            Ok(SlippageModel {
                token0: non_empty("token0", i, row.token0)?,
                token1: non_empty("token1", i, row.token1)?,
                source: non_empty("source", i, row.source)?,
                slippage_coefficient: to_decimal("slippageCoefficient", i, row.slippage_coefficient)?,
                volume_coefficient: to_decimal("volumeCoefficient", i, row.volume_coefficient)?,
                intercept: to_decimal("intercept", i, row.intercept)?,
                token0_price_in_usd: to_decimal("token0PriceInUsd", i, row.token0_price_in_usd)?,
            })
        })
        .collect()
}

/// `PairKey -> source -> model`
#[derive(Debug, Clone, Default)]
pub struct SlippageModelCache {
    models: HashMap<PairKey, HashMap<String, SlippageModel>>,
}

impl SlippageModelCache {
    /// Index models by pair. Rows whose `token0` is not the canonical first
    /// token of the pair are dropped with a warning.
    pub fn from_models(models: Vec<SlippageModel>) -> Self {
        let mut cache: HashMap<PairKey, HashMap<String, SlippageModel>> = HashMap::new();
        for model in models {
            let pair_key = match PairKey::new(&model.token0, &model.token1) {
                Ok(pair_key) => pair_key,
                Err(err) => {
                    warn!(token0 = %model.token0, token1 = %model.token1, error = %err, "Invalid slippage model.");
                    continue;
                }
            };
            let token0 = model.token0.to_lowercase();
            if pair_key.token0() != token0 {
                warn!(
                    token0 = %model.token0,
                    token1 = %model.token1,
                    source = %model.source,
                    "Invalid slippage model."
                );
                continue;
            }
            let token1 = model.token1.to_lowercase();
            cache.entry(pair_key).or_default().insert(
                model.source.clone(),
                SlippageModel { token0, token1, ..model },
            );
        }
        Self { models: cache }
    }

    /// Models of one pair, keyed by liquidity source.
    pub fn for_pair(&self, pair: &PairKey) -> Option<&HashMap<String, SlippageModel>> {
        self.models.get(pair)
    }

    /// Number of modeled pairs.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Expected slippage of one model, clamped to `[-max_slippage_rate, 0]`.
/// `None` when the volume arithmetic leaves the decimal range.
pub fn expected_slippage_for_model(
    token0_amount: Decimal,
    max_slippage_rate: Decimal,
    model: &SlippageModel,
) -> Option<Decimal> {
    let volume_usd = token0_amount.checked_mul(model.token0_price_in_usd)?;
    let volume_term = volume_usd.checked_mul(model.volume_coefficient)?;
    let slippage_term = max_slippage_rate
        .checked_mul(Decimal::from(ONE_IN_BASE_POINTS))?
        .checked_mul(model.slippage_coefficient)?;
    let expected = slippage_term.checked_add(volume_term)?.checked_add(model.intercept)?;
    // max_slippage_rate is positive while slippage is reported as a negative number
    let cap = -max_slippage_rate;
    Some(Decimal::ZERO.min(expected.max(cap)))
}

#[derive(Debug, Clone)]
pub struct SlippageModelSettings {
    /// No bucket means slippage models are disabled.
    pub bucket: Option<String>,
    pub file_name: String,
    pub refresh_interval: Duration,
    /// A file last modified longer ago than this is treated as stale.
    pub file_valid_interval: Duration,
    pub refresh_timeout: Duration,
}

/// Reloads the model file when it changed, resets when it is missing or stale.
pub struct SlippageModelSource {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    file_name: String,
    file_valid_interval: Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl SlippageModelSource {
    async fn load(
        &self,
        last_refreshed_at: DateTime<Utc>,
        refresh_time: DateTime<Utc>,
    ) -> Result<Reload<SlippageModelCache>> {
        let (bucket, file_name) = (self.bucket.as_str(), self.file_name.as_str());
        let head = self.store.head(bucket, file_name).await?;

        if !head.exists {
            return Ok(Reload::Reset);
        }

        // The exporting job stopped producing the file: drop the models rather
        // than price with outdated ones.
        let valid_since = chrono::Duration::from_std(self.file_valid_interval)
            .ok()
            .and_then(|window| refresh_time.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if head.last_modified < valid_since {
            warn!(bucket, file_name, %refresh_time, last_modified = %head.last_modified, "Slippage model file is stale.");
            self.metrics.slippage_model_file_stale(bucket, file_name);
            return Ok(Reload::Reset);
        }

        if head.last_modified <= last_refreshed_at {
            return Ok(Reload::Unchanged);
        }

        info!(bucket, file_name, %refresh_time, "Start refreshing slippage models.");
        let object = self.store.fetch(bucket, file_name).await?;
        let models = parse_slippage_models(&object.content)?;
        let snapshot = SlippageModelCache::from_models(models);
        info!(bucket, file_name, %refresh_time, pairs = snapshot.len(), "Successfully refreshed slippage models.");

        Ok(Reload::Replace { snapshot, refreshed_at: object.last_modified })
    }
}

#[async_trait]
impl SnapshotSource for SlippageModelSource {
    type Snapshot = SlippageModelCache;

    fn name(&self) -> &str {
        "slippage_models"
    }

    async fn reload(&self, last_refreshed_at: DateTime<Utc>) -> Result<Reload<SlippageModelCache>> {
        let refresh_time = Utc::now();
        let result = self.load(last_refreshed_at, refresh_time).await;
        if let Err(err) = &result {
            error!(
                bucket = %self.bucket,
                file_name = %self.file_name,
                %refresh_time,
                error = %err,
                "Failed to refresh slippage models."
            );
        }
        result
    }
}

/// Caches slippage models in memory, kept in sync with the object store file.
pub struct SlippageModelManager {
    cache: Option<RefreshableCache<SlippageModelSource>>,
    native: NativeTokenResolver,
    refresh_task: Mutex<Option<RefreshTask>>,
}

impl SlippageModelManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        settings: SlippageModelSettings,
        native: NativeTokenResolver,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let cache = settings.bucket.map(|bucket| {
            let source = SlippageModelSource {
                store,
                bucket,
                file_name: settings.file_name,
                file_valid_interval: settings.file_valid_interval,
                metrics: metrics.clone(),
            };
            RefreshableCache::new(
                source,
                RefreshPolicy::Periodic { interval: settings.refresh_interval },
                settings.refresh_timeout,
                metrics,
            )
        });
        Self { cache, native, refresh_task: Mutex::new(None) }
    }

    /// Manager without a backing file: every modeled source is unknown.
    pub fn disabled(native: NativeTokenResolver) -> Self {
        Self { cache: None, native, refresh_task: Mutex::new(None) }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Load once, then keep refreshing on the configured period until
    /// [`SlippageModelManager::stop`]. A no-op when no bucket is configured.
    pub async fn initialize(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        cache.refresh_now().await;
        let task = cache.spawn_periodic();
        let previous = std::mem::replace(&mut *self.refresh_task.lock().unwrap_or_else(|e| e.into_inner()), task);
        if let Some(previous) = previous {
            previous.stop().await;
        }
    }

    /// Refresh immediately, outside the timer.
    pub async fn refresh(&self) {
        if let Some(cache) = &self.cache {
            cache.refresh_now().await;
        }
    }

    /// Stops periodic refreshing. The loaded models stay usable.
    pub async fn stop(&self) {
        let task = self.refresh_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    /// Modification time of the loaded file, `UNIX_EPOCH` when empty.
    pub fn last_refreshed_at(&self) -> DateTime<Utc> {
        self.cache
            .as_ref()
            .map(|cache| cache.peek().last_refreshed_at())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Number of pairs with at least one model.
    pub fn modeled_pairs(&self) -> usize {
        self.cache.as_ref().map(|cache| cache.peek().value().len()).unwrap_or(0)
    }

    /// Proportion-weighted expected slippage over all sources of a quote.
    ///
    /// Returns `None` when any source with a non-zero share has no model for
    /// the pair: slippage is never estimated from a subset of the fill.
    /// Sources of the protocol's own liquidity contribute zero.
    pub fn calculate_expected_slippage(
        &self,
        buy_token: &str,
        sell_token: &str,
        buy_amount: Decimal,
        sell_amount: Decimal,
        sources: &[LiquiditySource],
        max_slippage_rate: Decimal,
    ) -> Option<Decimal> {
        let buy_token = self.native.normalize(buy_token);
        let sell_token = self.native.normalize(sell_token);
        // a token id that cannot form a pair key has no models
        let pair_key = PairKey::new(&buy_token, &sell_token).ok();
        let entry = self.cache.as_ref().map(|cache| cache.read());
        let pair_models = entry
            .as_ref()
            .zip(pair_key.as_ref())
            .and_then(|(entry, pair_key)| entry.value().for_pair(pair_key));

        let mut expected_slippage = Decimal::ZERO;
        for source in sources {
            if source.proportion.is_zero() {
                continue;
            }
            if NATIVE_LIQUIDITY_SOURCES.contains(&source.name.as_str()) {
                continue;
            }
            let model = pair_models.and_then(|by_source| by_source.get(&source.name))?;
            let token0_amount = source
                .proportion
                .checked_mul(if model.token0 == buy_token { buy_amount } else { sell_amount })?;
            let single = expected_slippage_for_model(token0_amount, max_slippage_rate, model)?;
            expected_slippage = expected_slippage.checked_add(source.proportion.checked_mul(single)?)?;
        }
        Some(expected_slippage)
    }
}
