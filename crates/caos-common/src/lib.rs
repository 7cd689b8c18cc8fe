//! # CAOS Common
//!
//! Shared data model and error taxonomy for the CAOS usage collector.
//!
//! ## Core Types
//!
//! - [`Metric`]/[`MetricKind`]: declared metrics (`delta` or `gauge`)
//! - [`TagSet`]: canonical set of `(key, value)` dimensions
//! - [`SeriesKey`]/[`Series`]/[`Sample`]: what the series store holds
//! - [`RawObservation`]: read-only counter observations from the metering store
//! - [`Window`]: `[start, end]` collection interval
//!
//! ## Utilities
//!
//! - [`flatten`]: nested record to dotted keys

pub mod error;
pub mod flatten;
pub mod types;

pub use error::{AbortScope, CollectorError, Result};
pub use types::{
    metric::{catalog, Metric, MetricKind},
    observation::{RawObservation, COUNTER_VOLUME, RESOURCE_METADATA},
    series::{Sample, Series, SeriesKey, Tag, TagSet},
    window::{format_timestamp, parse_timestamp, unix_epoch, Window},
};

/// Collector version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bytes in a mebibyte
pub const MEBIBYTE: f64 = 1_048_576.0;

/// Bytes in a gibibyte
pub const GIBIBYTE: f64 = 1_073_741_824.0;

/// Seconds in an hour
pub const HOUR: f64 = 3600.0;

/// Nanoseconds in a second (cpu counters are reported in ns)
pub const NANOS_PER_SECOND: f64 = 1e9;
