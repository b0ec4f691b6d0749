//! # Spendwatch
//!
//! Alerting engine for AI spend observability.
//!
//! Spendwatch evaluates per-organization alert rules against recorded LLM
//! usage, detects cost anomalies, forecasts period spend, and drives the
//! resulting alerts through notification and lifecycle handling.
//!
//! ## Architecture
//!
//! - **Evaluators**: spend, budget, provider error and usage spike checks
//! - **Detection**: consensus anomaly detection and ensemble forecasting
//! - **Alerting**: deduplication, notification fan-out, alert lifecycle
//! - **Storage**: PostgreSQL for rules, usage and alerts, Redis for change events
//!
//! ## Quick Start
//!
//! ```bash
//! # Apply the schema
//! spendwatch migrate
//!
//! # Run the evaluation loop
//! spendwatch run
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod alerting;
pub mod config;
pub mod db;
pub mod detection;
pub mod error;
pub mod evaluators;
pub mod models;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertEngine, EvaluationReport, HttpNotifier, Stores};
    pub use crate::config::Config;
    pub use crate::db::{MemoryStore, PgStore, PostgresPool};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
}
