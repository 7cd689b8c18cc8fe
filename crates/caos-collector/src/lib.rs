//! # CAOS Collector
//!
//! Derives per-tenant usage metrics from raw metering counters and upserts
//! them as period-aligned samples into the CAOS time-series store.
//!
//! ## Pipeline
//!
//! ```text
//! job ─► grid (window ends) ─► pollster ─► resolver ─► metering store
//!                                  │
//!                                  └─► aggregator ─► value ─► series store
//! ```
//!
//! - [`grid`]: window ends to (re)collect from a series checkpoint
//! - [`metering`]: metering store seam, resource resolver, numeric aggregator
//! - [`pollster`]: one value per tenant, metric and window
//! - [`tsdb`]: idempotent series and sample upserts, credential lifecycle
//! - [`jobs`]: collection jobs, [`scheduler`]: sequential job loop

pub mod config;
pub mod grid;
pub mod inventory;
pub mod jobs;
pub mod metering;
pub mod pollster;
pub mod scheduler;
pub mod tsdb;

pub use caos_common::{CollectorError, Result, VERSION};
