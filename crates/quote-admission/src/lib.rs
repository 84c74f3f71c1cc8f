// Library entry point for quote-admission

pub mod admission;
pub mod config;
pub mod data_management;
pub mod engine;
pub mod metrics;
pub mod rate_limit;
pub mod types;
pub mod utils;

pub use admission::{AdmissionDecision, QuoteAdmission};
pub use types::{AdmissionError, KeyField, LiquiditySource, RequestContext, Result};
