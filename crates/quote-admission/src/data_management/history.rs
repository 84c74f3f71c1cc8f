//! Transaction history queried by the rate limiters.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{AdmissionError, KeyField, Result};

/// One persisted request. Amounts are in wei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub api_key: String,
    pub taker_address: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub gas_price: Decimal,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub value: Decimal,
}

impl TransactionRecord {
    pub fn new(api_key: &str, taker_address: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            api_key: api_key.to_string(),
            taker_address: taker_address.to_string(),
            created_at,
            gas_price: Decimal::ZERO,
            gas_used: 0,
            value: Decimal::ZERO,
        }
    }

    pub fn with_values(mut self, value: Decimal, gas_price: Decimal, gas_used: u64) -> Self {
        self.value = value;
        self.gas_price = gas_price;
        self.gas_used = gas_used;
        self
    }

    fn matches(&self, field: KeyField, key: &str) -> bool {
        match field {
            KeyField::ApiKey => self.api_key == key,
            KeyField::TakerAddress => self.taker_address.eq_ignore_ascii_case(key),
        }
    }

    /// `gas_price * gas_used + value`, `None` on overflow.
    pub fn notional_wei(&self) -> Option<Decimal> {
        self.gas_price
            .checked_mul(Decimal::from(self.gas_used))
            .and_then(|gas| gas.checked_add(self.value))
    }
}

/// Read-only aggregations over persisted request history.
#[async_trait]
pub trait TransactionHistory: Send + Sync + 'static {
    /// Rows for `key` created on the given UTC calendar day.
    async fn count_on_day(&self, field: KeyField, key: &str, day: NaiveDate) -> Result<u64>;
    /// Rows for `key` created strictly after `since`.
    async fn count_since(&self, field: KeyField, key: &str, since: DateTime<Utc>) -> Result<u64>;
    /// Sum of `gas_price * gas_used + value` (wei) for rows created strictly after `since`.
    async fn sum_value_since(&self, field: KeyField, key: &str, since: DateTime<Utc>) -> Result<Decimal>;
}

/// History kept in memory, for tests and local runs.
#[derive(Default)]
pub struct InMemoryTransactionHistory {
    records: RwLock<Vec<TransactionRecord>>,
    unavailable: AtomicBool,
    queries: AtomicUsize,
}

impl InMemoryTransactionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from a JSON array file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(&path)
            .map_err(|e| anyhow!("unable to read transaction history {}: {}", path.as_ref().display(), e))?;
        let records: Vec<TransactionRecord> = serde_json::from_str(&text)
            .map_err(|e| anyhow!("transaction history {} is not valid JSON: {}", path.as_ref().display(), e))?;
        let history = Self::new();
        history.extend(records);
        Ok(history)
    }

    pub fn record(&self, record: TransactionRecord) {
        self.records.write().unwrap_or_else(|e| e.into_inner()).push(record);
    }

    pub fn extend(&self, records: impl IntoIterator<Item = TransactionRecord>) {
        self.records.write().unwrap_or_else(|e| e.into_inner()).extend(records);
    }

    pub fn clear(&self) {
        self.records.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// While set, every query fails as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of aggregate queries served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn begin_query(&self) -> Result<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AdmissionError::Store("transaction history unavailable".to_string()));
        }
        Ok(())
    }

    fn count_where(&self, predicate: impl Fn(&TransactionRecord) -> bool) -> u64 {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| predicate(r))
            .count() as u64
    }
}

#[async_trait]
impl TransactionHistory for InMemoryTransactionHistory {
    async fn count_on_day(&self, field: KeyField, key: &str, day: NaiveDate) -> Result<u64> {
        self.begin_query()?;
        Ok(self.count_where(|r| r.matches(field, key) && r.created_at.date_naive() == day))
    }

    async fn count_since(&self, field: KeyField, key: &str, since: DateTime<Utc>) -> Result<u64> {
        self.begin_query()?;
        Ok(self.count_where(|r| r.matches(field, key) && r.created_at > since))
    }

    async fn sum_value_since(&self, field: KeyField, key: &str, since: DateTime<Utc>) -> Result<Decimal> {
        self.begin_query()?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .filter(|r| r.matches(field, key) && r.created_at > since)
            .try_fold(Decimal::ZERO, |acc, r| {
                r.notional_wei().and_then(|v| acc.checked_add(v))
            })
            .ok_or_else(|| AdmissionError::Store(format!("value sum overflow for {} {}", field, key)))
    }
}
