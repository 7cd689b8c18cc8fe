//! Metering module
//!
//! Read-only access to the metering store and the numeric core built on it:
//! - MeteringStore: query seam onto the external metering store
//! - resolver: which resources have data overlapping a window
//! - aggregator: monotonicity correction, interpolation, integration

pub mod aggregator;
pub mod ceilometer;
pub mod memory;
pub mod resolver;

pub use aggregator::{correct_monotonicity, integrate, interpolate, Point};
pub use ceilometer::CeilometerApiStore;
pub use memory::InMemoryMeteringStore;
pub use resolver::find_resources;

use async_trait::async_trait;
use caos_common::{RawObservation, Result};
use chrono::{DateTime, Utc};

/// Optional time bounds of a resource lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// No bounds at all
    pub fn ever() -> Self {
        Self::default()
    }

    /// Whether `[first, last]` overlaps the range. Bounds are exclusive.
    pub fn overlaps(&self, first: DateTime<Utc>, last: DateTime<Utc>) -> bool {
        self.end.map_or(true, |end| first < end) && self.start.map_or(true, |start| last > start)
    }
}

/// Equality filter on an observation field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    pub field: String,
    pub equals: String,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, equals: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            equals: equals.into(),
        }
    }
}

/// Observation query for a set of resources in a closed time range
#[derive(Debug, Clone)]
pub struct ObservationQuery {
    pub tenant: String,
    pub counter_name: String,
    pub resource_ids: Vec<String>,
    /// Inclusive lower bound
    pub start: DateTime<Utc>,
    /// Inclusive upper bound
    pub end: DateTime<Utc>,
    /// Fields to return; empty means everything
    pub projection: Vec<String>,
    pub filters: Vec<FieldFilter>,
}

/// Read-only seam onto the metering store.
///
/// Connection failures are reported as `CollectorError::StoreUnavailable`.
#[async_trait]
pub trait MeteringStore: Send + Sync {
    /// Resources of `tenant` with at least one `counter_name` observation
    /// overlapping `range`.
    async fn find_resources(
        &self,
        tenant: &str,
        counter_name: &str,
        range: TimeRange,
    ) -> Result<Vec<String>>;

    /// Observations matching `query`, sorted ascending by timestamp.
    async fn query_observations(&self, query: &ObservationQuery) -> Result<Vec<RawObservation>>;
}
