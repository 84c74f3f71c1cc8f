//! Argument parsing helpers and output formatting for the command line tool.

use std::str::FromStr;

use anyhow::{anyhow, Result};
use itertools::Itertools;
use quote_admission::admission::AdmissionDecision;
use quote_admission::metrics::MetricsSnapshot;
use quote_admission::LiquiditySource;
use rust_decimal::Decimal;

/// Parses `name:proportion,name:proportion`. Whitespace around items is ignored.
pub fn parse_sources(input: &str) -> Result<Vec<LiquiditySource>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (name, proportion) = item
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("liquidity source '{}' is not name:proportion", item))?;
            let proportion = Decimal::from_str(proportion.trim())
                .map_err(|e| anyhow!("invalid proportion for '{}': {}", name, e))?;
            if proportion.is_sign_negative() || proportion > Decimal::ONE {
                return Err(anyhow!("proportion for '{}' must be within [0, 1]", name));
            }
            Ok(LiquiditySource::new(name.trim(), proportion))
        })
        .try_collect()
}

pub fn format_sources(sources: &[LiquiditySource]) -> String {
    sources.iter().map(|s| format!("{} ({})", s.name, s.proportion)).join(", ")
}

/// Slippage as a rate and in basis points, e.g. `-0.00019 (-1.9 bps)`.
pub fn format_slippage(slippage: Option<Decimal>) -> String {
    match slippage {
        Some(rate) => format!("{} ({} bps)", rate.normalize(), (rate * Decimal::from(10_000)).normalize()),
        None => "not modeled".to_string(),
    }
}

pub fn print_decision(taker_address: &str, decision: &AdmissionDecision) {
    println!("\n--- Admission ---");
    println!("Taker: {}", taker_address);
    println!("Decision: {}", decision);
}

pub fn print_metrics(metrics: &MetricsSnapshot) {
    println!("\n--- Metrics ---");
    println!("Blocked addresses cached: {}", metrics.blocked_addresses_cached);
    for ((bucket, file_name), count) in metrics.slippage_model_file_stale.iter().sorted() {
        println!("Stale slippage model file {}/{}: {}", bucket, file_name, count);
    }
    for (cache, count) in metrics.cache_refresh_failures.iter().sorted() {
        println!("Refresh failures ({}): {}", cache, count);
    }
}
