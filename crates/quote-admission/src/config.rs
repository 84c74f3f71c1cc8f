//! Configuration loading, env vars, CLI flags.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

#[cfg(feature = "cli")]
use clap::Parser;

use crate::data_management::blocked_addresses::DEFAULT_MAX_BLOCKED_ADDRESSES;
use crate::engine::slippage::SlippageModelSettings;
use crate::rate_limit::{FailMode, RateLimiterConfig};
use crate::types::{AdmissionError, Result};
use crate::utils::address_list::is_address;
use crate::utils::native_token::NativeTokenResolver;

const DEFAULT_CHAIN_ID: u64 = 1;
const DEFAULT_SLIPPAGE_MODEL_REFRESH_INTERVAL_MS: u64 = 60_000;
const DEFAULT_SLIPPAGE_MODEL_FILE_VALID_INTERVAL_MS: u64 = 2 * 60 * 60 * 1000;
const DEFAULT_BLOCKED_ADDRESS_TTL_MS: u64 = 60_000;
const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 30_000;

/// File name of the slippage model file for `chain_id` when none is configured.
pub fn default_slippage_model_file(chain_id: u64) -> String {
    format!("SlippageModel-{}.json", chain_id)
}

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub chain_id: u64,
    /// No bucket disables slippage models.
    pub slippage_model_bucket: Option<String>,
    pub slippage_model_file: String,
    pub slippage_model_refresh_interval: Duration,
    pub slippage_model_file_valid_interval: Duration,
    pub blocked_address_ttl: Duration,
    pub blocked_address_max_entries: usize,
    pub refresh_timeout: Duration,
    pub wrapped_native_token: Option<String>,
    pub rate_limiter_fail_mode: FailMode,
    /// No config means no rate limiting.
    pub rate_limiters: Option<RateLimiterConfig>,
    /// Root directory of the local object store, one sub-directory per bucket.
    pub object_store_root: Option<PathBuf>,
    pub blocked_addresses_file: Option<PathBuf>,
    pub transactions_file: Option<PathBuf>,
    pub query: QueryConfig,
}

/// One request evaluated by the command line tool.
#[derive(Debug, Clone, Default)]
pub struct QueryConfig {
    pub api_key: Option<String>,
    pub taker_address: Option<String>,
    pub buy_token: Option<String>,
    pub sell_token: Option<String>,
    pub buy_amount: Option<Decimal>,
    pub sell_amount: Option<Decimal>,
    /// `name:proportion` pairs separated by commas, e.g. `Uniswap_V3:0.5,0x:0.5`.
    pub sources: Option<String>,
    pub max_slippage_rate: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub chain_id: Option<u64>,
    pub slippage_model_bucket: Option<String>,
    pub slippage_model_file: Option<String>,
    pub slippage_model_refresh_interval_ms: Option<u64>,
    pub slippage_model_file_valid_interval_ms: Option<u64>,
    pub blocked_address_ttl_ms: Option<u64>,
    pub blocked_address_max_entries: Option<usize>,
    pub refresh_timeout_ms: Option<u64>,
    pub wrapped_native_token: Option<String>,
    pub rate_limiter_fail_mode: Option<FailMode>,
    pub rate_limiters: Option<RateLimiterConfig>,
    pub object_store_root: Option<PathBuf>,
    pub blocked_addresses_file: Option<PathBuf>,
    pub transactions_file: Option<PathBuf>,
}

impl FileConfig {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| AdmissionError::Config(format!("invalid config file: {}", e)))
    }

    pub fn from_path(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AdmissionError::Config(format!("unable to read config file {}: {}", path, e)))?;
        Self::from_toml(&contents)
    }
}

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliConfig {
    /// TOML config file
    #[arg(long)]
    pub config: Option<String>,
    #[arg(long)]
    pub chain_id: Option<u64>,
    #[arg(long)]
    pub slippage_model_bucket: Option<String>,
    #[arg(long)]
    pub slippage_model_file: Option<String>,
    #[arg(long)]
    pub slippage_model_refresh_interval_ms: Option<u64>,
    #[arg(long)]
    pub slippage_model_file_valid_interval_ms: Option<u64>,
    #[arg(long)]
    pub blocked_address_ttl_ms: Option<u64>,
    #[arg(long)]
    pub blocked_address_max_entries: Option<usize>,
    #[arg(long)]
    pub refresh_timeout_ms: Option<u64>,
    #[arg(long)]
    pub wrapped_native_token: Option<String>,
    /// `open` or `closed`
    #[arg(long)]
    pub rate_limiter_fail_mode: Option<String>,
    #[arg(long)]
    pub object_store_root: Option<PathBuf>,
    /// JSON array or TOML `addresses = [...]` file of blocked addresses
    #[arg(long)]
    pub blocked_addresses_file: Option<PathBuf>,
    /// JSON array of past transactions
    #[arg(long)]
    pub transactions_file: Option<PathBuf>,
    #[arg(long)]
    pub api_key: Option<String>,
    #[arg(long)]
    pub taker_address: Option<String>,
    #[arg(long)]
    pub buy_token: Option<String>,
    #[arg(long)]
    pub sell_token: Option<String>,
    #[arg(long)]
    pub buy_amount: Option<Decimal>,
    #[arg(long)]
    pub sell_amount: Option<Decimal>,
    /// `name:proportion,...`
    #[arg(long)]
    pub sources: Option<String>,
    #[arg(long)]
    pub max_slippage_rate: Option<Decimal>,
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| AdmissionError::Config(format!("invalid {}={}: {}", name, v, e)))
        })
        .transpose()
}

fn env_rate_limiters() -> Result<Option<RateLimiterConfig>> {
    env_var("RATE_LIMITER_CONFIG")
        .map(|v| {
            serde_json::from_str(&v)
                .map_err(|e| AdmissionError::Config(format!("invalid RATE_LIMITER_CONFIG: {}", e)))
        })
        .transpose()
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

impl AdmissionConfig {
    /// Configuration from environment variables, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::merge(FileConfig::default())
    }

    /// Values from `file`, then environment variables, then defaults.
    pub fn merge(file: FileConfig) -> Result<Self> {
        let chain_id = file.chain_id.or(env_parse("CHAIN_ID")?).unwrap_or(DEFAULT_CHAIN_ID);
        let slippage_model_bucket = file
            .slippage_model_bucket
            .or_else(|| env_var("SLIPPAGE_MODEL_S3_BUCKET_NAME"));
        if slippage_model_bucket.is_none() {
            info!("SLIPPAGE_MODEL_S3_BUCKET_NAME not set. Slippage models are disabled.");
        }
        let slippage_model_file = file
            .slippage_model_file
            .or_else(|| env_var("SLIPPAGE_MODEL_S3_FILE_NAME"))
            .unwrap_or_else(|| default_slippage_model_file(chain_id));
        let refresh_interval_ms = file
            .slippage_model_refresh_interval_ms
            .or(env_parse("SLIPPAGE_MODEL_REFRESH_INTERVAL_MS")?)
            .unwrap_or(DEFAULT_SLIPPAGE_MODEL_REFRESH_INTERVAL_MS);
        if refresh_interval_ms == 0 {
            return Err(AdmissionError::Config("slippage model refresh interval must be positive".to_string()));
        }
        let file_valid_interval_ms = file
            .slippage_model_file_valid_interval_ms
            .or(env_parse("SLIPPAGE_MODEL_S3_FILE_VALID_INTERVAL_MS")?)
            .unwrap_or(DEFAULT_SLIPPAGE_MODEL_FILE_VALID_INTERVAL_MS);
        let blocked_address_ttl_ms = file
            .blocked_address_ttl_ms
            .or(env_parse("RFQ_BLOCKED_ADDRESS_TTL_MS")?)
            .unwrap_or(DEFAULT_BLOCKED_ADDRESS_TTL_MS);
        let blocked_address_max_entries = file
            .blocked_address_max_entries
            .or(env_parse("RFQ_BLOCKED_ADDRESS_MAX_ENTRIES")?)
            .unwrap_or(DEFAULT_MAX_BLOCKED_ADDRESSES);
        if blocked_address_max_entries == 0 {
            return Err(AdmissionError::Config("blocked address max entries must be positive".to_string()));
        }
        let refresh_timeout_ms = file
            .refresh_timeout_ms
            .or(env_parse("CACHE_REFRESH_TIMEOUT_MS")?)
            .unwrap_or(DEFAULT_REFRESH_TIMEOUT_MS);
        let wrapped_native_token = file.wrapped_native_token.or_else(|| env_var("WRAPPED_NATIVE_TOKEN"));
        if let Some(token) = wrapped_native_token.as_deref().filter(|token| !is_address(token)) {
            return Err(AdmissionError::Config(format!("invalid wrapped native token: {}", token)));
        }
        let rate_limiter_fail_mode = match file.rate_limiter_fail_mode {
            Some(mode) => mode,
            None => env_parse("RATE_LIMITER_FAIL_MODE")?.unwrap_or_default(),
        };
        let rate_limiters = match file.rate_limiters {
            Some(config) => Some(config),
            None => env_rate_limiters()?,
        };

        Ok(Self {
            chain_id,
            slippage_model_bucket,
            slippage_model_file,
            slippage_model_refresh_interval: millis(refresh_interval_ms),
            slippage_model_file_valid_interval: millis(file_valid_interval_ms),
            blocked_address_ttl: millis(blocked_address_ttl_ms),
            blocked_address_max_entries,
            refresh_timeout: millis(refresh_timeout_ms),
            wrapped_native_token,
            rate_limiter_fail_mode,
            rate_limiters,
            object_store_root: file.object_store_root.or_else(|| env_var("OBJECT_STORE_ROOT").map(PathBuf::from)),
            blocked_addresses_file: file
                .blocked_addresses_file
                .or_else(|| env_var("BLOCKED_ADDRESSES_FILE").map(PathBuf::from)),
            transactions_file: file
                .transactions_file
                .or_else(|| env_var("TRANSACTIONS_FILE").map(PathBuf::from)),
            query: QueryConfig::default(),
        })
    }

    /// CLI flags, then the `--config` TOML file, then env vars, then defaults.
    #[cfg(feature = "cli")]
    pub fn load_with_cli() -> Result<Self> {
        Self::from_cli(CliConfig::parse())
    }

    #[cfg(feature = "cli")]
    pub fn from_cli(cli: CliConfig) -> Result<Self> {
        let mut file_config = match cli.config.as_deref() {
            Some(path) => FileConfig::from_path(path)?,
            None => FileConfig::default(),
        };
        // CLI flags take precedence over the file
        file_config.chain_id = cli.chain_id.or(file_config.chain_id);
        file_config.slippage_model_bucket = cli.slippage_model_bucket.or(file_config.slippage_model_bucket);
        file_config.slippage_model_file = cli.slippage_model_file.or(file_config.slippage_model_file);
        file_config.slippage_model_refresh_interval_ms = cli
            .slippage_model_refresh_interval_ms
            .or(file_config.slippage_model_refresh_interval_ms);
        file_config.slippage_model_file_valid_interval_ms = cli
            .slippage_model_file_valid_interval_ms
            .or(file_config.slippage_model_file_valid_interval_ms);
        file_config.blocked_address_ttl_ms = cli.blocked_address_ttl_ms.or(file_config.blocked_address_ttl_ms);
        file_config.blocked_address_max_entries =
            cli.blocked_address_max_entries.or(file_config.blocked_address_max_entries);
        file_config.refresh_timeout_ms = cli.refresh_timeout_ms.or(file_config.refresh_timeout_ms);
        file_config.wrapped_native_token = cli.wrapped_native_token.or(file_config.wrapped_native_token);
        if let Some(mode) = cli.rate_limiter_fail_mode.as_deref() {
            file_config.rate_limiter_fail_mode = Some(mode.parse()?);
        }
        file_config.object_store_root = cli.object_store_root.or(file_config.object_store_root);
        file_config.blocked_addresses_file = cli.blocked_addresses_file.or(file_config.blocked_addresses_file);
        file_config.transactions_file = cli.transactions_file.or(file_config.transactions_file);

        let mut config = Self::merge(file_config)?;
        config.query = QueryConfig {
            api_key: cli.api_key,
            taker_address: cli.taker_address,
            buy_token: cli.buy_token,
            sell_token: cli.sell_token,
            buy_amount: cli.buy_amount,
            sell_amount: cli.sell_amount,
            sources: cli.sources,
            max_slippage_rate: cli.max_slippage_rate,
        };
        Ok(config)
    }

    pub fn slippage_model_settings(&self) -> SlippageModelSettings {
        SlippageModelSettings {
            bucket: self.slippage_model_bucket.clone(),
            file_name: self.slippage_model_file.clone(),
            refresh_interval: self.slippage_model_refresh_interval,
            file_valid_interval: self.slippage_model_file_valid_interval,
            refresh_timeout: self.refresh_timeout,
        }
    }

    pub fn native_resolver(&self) -> NativeTokenResolver {
        let resolver = NativeTokenResolver::for_chain(self.chain_id);
        match &self.wrapped_native_token {
            Some(wrapped) => resolver.with_wrapped(wrapped),
            None => resolver,
        }
    }
}
