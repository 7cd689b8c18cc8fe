//! Remote series store
//!
//! - SeriesStore: async seam onto the time-series store
//! - TsdbClient: HTTP/GraphQL implementation
//! - InMemorySeriesStore: local implementation for tests and dry runs
//! - Session: bearer credential shared by reference with the client

pub mod client;
pub mod memory;
pub mod session;

pub use client::TsdbClient;
pub use memory::{InMemorySeriesStore, TagMetadata};
pub use session::{Credentials, Session};

use std::collections::BTreeMap;

use async_trait::async_trait;
use caos_common::{
    catalog, format_timestamp, CollectorError, Metric, MetricKind, Result, Sample, Series,
    SeriesKey, Tag,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Oldest remote API accepted, as (major, minor)
pub const MIN_API_VERSION: (u64, u64) = (1, 2);

/// `GET /status` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiStatus {
    pub status: String,
    /// Server version
    pub version: String,
    /// API version, `vMAJOR[.MINOR]`
    pub api_version: String,
    /// `"yes"` when the request carried a valid token
    pub auth: String,
}

impl ApiStatus {
    pub fn is_authenticated(&self) -> bool {
        self.auth == "yes"
    }
}

/// Result of an idempotent sample write
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteOutcome {
    Written(Sample),
    /// A sample already existed and overwrite was off
    Skipped { existing: Sample },
    Overwritten { previous: Sample, current: Sample },
}

/// Trait for remote series store backends
#[async_trait]
pub trait SeriesStore: Send + Sync {
    async fn status(&self) -> Result<ApiStatus>;

    /// Log in with the configured credentials and check the token is accepted.
    async fn refresh_auth(&self) -> Result<()>;

    /// Declared metrics by name
    async fn list_metrics(&self) -> Result<BTreeMap<String, MetricKind>>;

    async fn declare_metric(&self, metric: &Metric) -> Result<()>;

    /// Get-or-create the series for `key`. Safe to call repeatedly.
    async fn ensure_series(&self, key: &SeriesKey) -> Result<Series>;

    /// Stored sample of `key` at `timestamp`, if any
    async fn sample_at(&self, key: &SeriesKey, timestamp: DateTime<Utc>) -> Result<Option<Sample>>;

    /// Unconditional write; the store replaces an existing value only when
    /// `overwrite` is set.
    async fn put_sample(&self, key: &SeriesKey, sample: Sample, overwrite: bool) -> Result<Sample>;

    async fn create_tag_metadata(
        &self,
        tag: &Tag,
        metadata: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Idempotent write: an existing sample is kept unless `overwrite` is set.
    async fn write_sample(
        &self,
        key: &SeriesKey,
        timestamp: DateTime<Utc>,
        value: f64,
        overwrite: bool,
    ) -> Result<WriteOutcome> {
        let sample = Sample::new(timestamp, value);
        match self.sample_at(key, timestamp).await? {
            Some(existing) if !overwrite => {
                debug!(
                    series = %key,
                    timestamp = %format_timestamp(&timestamp),
                    "Sample exists, skipping"
                );
                Ok(WriteOutcome::Skipped { existing })
            }
            Some(previous) => {
                let current = self.put_sample(key, sample, true).await?;
                info!(
                    series = %key,
                    timestamp = %format_timestamp(&timestamp),
                    previous = previous.value,
                    new = current.value,
                    "Overwrote sample"
                );
                Ok(WriteOutcome::Overwritten { previous, current })
            }
            None => {
                let written = self.put_sample(key, sample, overwrite).await?;
                info!(
                    series = %key,
                    timestamp = %format_timestamp(&timestamp),
                    value = written.value,
                    "Wrote sample"
                );
                Ok(WriteOutcome::Written(written))
            }
        }
    }
}

/// Declare every catalog metric missing from the store.
///
/// Returns how many metrics were declared.
pub async fn ensure_metrics(store: &dyn SeriesStore) -> Result<usize> {
    let remote = store.list_metrics().await?;
    let mut declared = 0;
    for metric in catalog() {
        match remote.get(&metric.name) {
            None => {
                info!(metric = %metric.name, kind = %metric.kind, "Declaring metric");
                store.declare_metric(&metric).await?;
                declared += 1;
            }
            Some(kind) if *kind != metric.kind => {
                // kinds are immutable once declared
                warn!(
                    metric = %metric.name,
                    remote = %kind,
                    expected = %metric.kind,
                    "Metric declared with another kind"
                );
            }
            Some(_) => {}
        }
    }
    Ok(declared)
}

/// Parse `vMAJOR[.MINOR]`
pub fn parse_api_version(raw: &str) -> Option<(u64, u64)> {
    let rest = raw.strip_prefix('v')?;
    let (major, minor) = match rest.split_once('.') {
        Some((major, minor)) => (major, Some(minor)),
        None => (rest, None),
    };
    let number = |s: &str| -> Option<u64> {
        let canonical = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && (s == "0" || !s.starts_with('0'));
        canonical.then(|| s.parse().ok()).flatten()
    };
    Some((number(major)?, minor.map_or(Some(0), number)?))
}

/// Reject remote APIs older than [`MIN_API_VERSION`].
pub fn check_version(status: &ApiStatus) -> Result<()> {
    let version = parse_api_version(&status.api_version).ok_or_else(|| {
        CollectorError::invalid_configuration(format!(
            "invalid API version format: {:?}",
            status.api_version
        ))
    })?;
    if version < MIN_API_VERSION {
        return Err(CollectorError::invalid_configuration(format!(
            "unsupported API version {} (need >= v{}.{})",
            status.api_version, MIN_API_VERSION.0, MIN_API_VERSION.1
        )));
    }
    debug!(api_version = %status.api_version, "API version accepted");
    Ok(())
}
