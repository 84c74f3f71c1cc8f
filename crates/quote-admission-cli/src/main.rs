mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use quote_admission::config::AdmissionConfig;
use quote_admission::data_management::blocked_addresses::{BlockedAddressCache, InMemoryBlockedAddressRepository};
use quote_admission::data_management::history::InMemoryTransactionHistory;
use quote_admission::data_management::object_store::LocalObjectStore;
use quote_admission::engine::SlippageModelManager;
use quote_admission::metrics::RecordingMetrics;
use quote_admission::rate_limit::limiter_from_config;
use quote_admission::utils::address_list::{is_address, load_address_list};
use quote_admission::{QuoteAdmission, RequestContext};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // CLI args, then config file, then env vars
    let config = AdmissionConfig::load_with_cli()?;
    let metrics = Arc::new(RecordingMetrics::new());

    let addresses = match &config.blocked_addresses_file {
        Some(path) => load_address_list(path)?,
        None => Vec::new(),
    };
    info!(count = addresses.len(), "Loaded blocked address list.");
    let repository = Arc::new(InMemoryBlockedAddressRepository::with_addresses(addresses));

    let history = Arc::new(match &config.transactions_file {
        Some(path) => InMemoryTransactionHistory::from_json_file(path)?,
        None => InMemoryTransactionHistory::new(),
    });
    let limiter = config
        .rate_limiters
        .as_ref()
        .map(|limiters| limiter_from_config(limiters, history.clone(), config.rate_limiter_fail_mode))
        .transpose()?;

    let store_root = config.object_store_root.clone().unwrap_or_else(|| PathBuf::from("."));
    let slippage = SlippageModelManager::new(
        Arc::new(LocalObjectStore::new(store_root)),
        config.slippage_model_settings(),
        config.native_resolver(),
        metrics.clone(),
    );
    let blocked = BlockedAddressCache::new(
        repository,
        config.blocked_address_ttl,
        config.blocked_address_max_entries,
        config.refresh_timeout,
        metrics.clone(),
    );
    let admission = QuoteAdmission::new(blocked, limiter, slippage);
    admission.initialize().await;
    // one-shot run: load the blocked list up front instead of on the first stale read
    admission.blocked_addresses().refresh().await;

    let query = &config.query;
    match (&query.api_key, &query.taker_address) {
        (Some(api_key), Some(taker_address)) => {
            if !is_address(taker_address) {
                return Err(anyhow!("--taker-address {} is not an address", taker_address));
            }
            let context = RequestContext::new(api_key.as_str(), taker_address.as_str());
            let decision = admission.admit(&context).await;
            cli::print_decision(taker_address, &decision);
        }
        _ => println!("No --api-key/--taker-address given, skipping admission."),
    }

    if let (Some(buy_token), Some(sell_token)) = (&query.buy_token, &query.sell_token) {
        let buy_amount = query.buy_amount.ok_or_else(|| anyhow!("--buy-amount is required"))?;
        let sell_amount = query.sell_amount.ok_or_else(|| anyhow!("--sell-amount is required"))?;
        let max_slippage_rate = query
            .max_slippage_rate
            .ok_or_else(|| anyhow!("--max-slippage-rate is required"))?;
        let sources = cli::parse_sources(query.sources.as_deref().unwrap_or_default())?;

        let slippage = admission.expected_slippage(
            buy_token,
            sell_token,
            buy_amount,
            sell_amount,
            &sources,
            max_slippage_rate,
        );
        println!("\n--- Expected Slippage ---");
        println!("Buying: {} {}", buy_amount, buy_token);
        println!("Selling: {} {}", sell_amount, sell_token);
        println!("Sources: {}", cli::format_sources(&sources));
        println!("Models loaded at: {}", admission.slippage_models().last_refreshed_at());
        println!("Expected slippage: {}", cli::format_slippage(slippage));
    }

    cli::print_metrics(&metrics.snapshot());
    admission.stop().await;
    Ok(())
}
