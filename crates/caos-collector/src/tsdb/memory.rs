//! In-memory series store
//!
//! Same invariants as the remote store: one series per key, one sample per
//! series and timestamp unless overwrite is requested.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use caos_common::{CollectorError, Metric, MetricKind, Result, Sample, Series, SeriesKey, Tag};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::{ApiStatus, SeriesStore};

struct StoredSeries {
    id: String,
    samples: BTreeMap<DateTime<Utc>, f64>,
}

/// Tag metadata record as written by the jobs
#[derive(Debug, Clone, PartialEq)]
pub struct TagMetadata {
    pub tag: Tag,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

/// In-memory series store
#[derive(Default)]
pub struct InMemorySeriesStore {
    metrics: DashMap<String, MetricKind>,
    series: DashMap<SeriesKey, StoredSeries>,
    tag_metadata: Mutex<Vec<TagMetadata>>,
    /// Sample writes that reached the store
    puts: AtomicUsize,
    authenticated: AtomicBool,
    reject_auth: AtomicBool,
    fail_writes: AtomicBool,
    offline: AtomicBool,
}

impl InMemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every login fail
    pub fn set_reject_auth(&self, reject: bool) {
        self.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Make every sample write fail with a remote write error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Samples of `key` in timestamp order
    pub fn samples(&self, key: &SeriesKey) -> Vec<Sample> {
        self.series
            .get(key)
            .map(|s| s.samples.iter().map(|(ts, v)| Sample::new(*ts, *v)).collect())
            .unwrap_or_default()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn tag_metadata(&self) -> Vec<TagMetadata> {
        self.tag_metadata.lock().clone()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollectorError::RemoteUnavailable(
                "in-memory series store is offline".into(),
            ));
        }
        Ok(())
    }

    fn to_series(key: &SeriesKey, stored: &StoredSeries) -> Series {
        Series {
            id: stored.id.clone(),
            key: key.clone(),
            last_timestamp: stored.samples.keys().next_back().copied(),
            ttl: None,
        }
    }
}

#[async_trait]
impl SeriesStore for InMemorySeriesStore {
    async fn status(&self) -> Result<ApiStatus> {
        self.check_online()?;
        Ok(ApiStatus {
            status: "online".to_string(),
            version: caos_common::VERSION.to_string(),
            api_version: "v1.2".to_string(),
            auth: if self.authenticated.load(Ordering::SeqCst) {
                "yes".to_string()
            } else {
                "no".to_string()
            },
        })
    }

    async fn refresh_auth(&self) -> Result<()> {
        self.check_online()?;
        if self.reject_auth.load(Ordering::SeqCst) {
            self.authenticated.store(false, Ordering::SeqCst);
            return Err(CollectorError::AuthFailure("credentials rejected".into()));
        }
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_metrics(&self) -> Result<BTreeMap<String, MetricKind>> {
        self.check_online()?;
        Ok(self
            .metrics
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect())
    }

    async fn declare_metric(&self, metric: &Metric) -> Result<()> {
        self.check_online()?;
        self.metrics.entry(metric.name.clone()).or_insert(metric.kind);
        Ok(())
    }

    async fn ensure_series(&self, key: &SeriesKey) -> Result<Series> {
        self.check_online()?;
        let entry = self.series.entry(key.clone()).or_insert_with(|| StoredSeries {
            id: Uuid::new_v4().to_string(),
            samples: BTreeMap::new(),
        });
        Ok(Self::to_series(key, &entry))
    }

    async fn sample_at(&self, key: &SeriesKey, timestamp: DateTime<Utc>) -> Result<Option<Sample>> {
        self.check_online()?;
        Ok(self
            .series
            .get(key)
            .and_then(|s| s.samples.get(&timestamp).map(|v| Sample::new(timestamp, *v))))
    }

    async fn put_sample(&self, key: &SeriesKey, sample: Sample, overwrite: bool) -> Result<Sample> {
        self.check_online()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CollectorError::RemoteWrite(format!(
                "write to {key} rejected"
            )));
        }

        let mut entry = self.series.entry(key.clone()).or_insert_with(|| StoredSeries {
            id: Uuid::new_v4().to_string(),
            samples: BTreeMap::new(),
        });
        if entry.samples.contains_key(&sample.timestamp) && !overwrite {
            return Err(CollectorError::RemoteWrite(format!(
                "sample exists in {key} and overwrite is off"
            )));
        }
        entry.samples.insert(sample.timestamp, sample.value);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(sample)
    }

    async fn create_tag_metadata(
        &self,
        tag: &Tag,
        metadata: &Value,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.check_online()?;
        self.tag_metadata.lock().push(TagMetadata {
            tag: tag.clone(),
            metadata: metadata.clone(),
            timestamp,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caos_common::{unix_epoch, TagSet};
    use chrono::Duration;

    fn key(project: &str) -> SeriesKey {
        SeriesKey::new("cpu", 3600, TagSet::single("project", project).unwrap())
    }

    #[tokio::test]
    async fn test_ensure_series_is_get_or_create() {
        let store = InMemorySeriesStore::new();
        let a = store.ensure_series(&key("p1")).await.unwrap();
        let b = store.ensure_series(&key("p1")).await.unwrap();
        let c = store.ensure_series(&key("p2")).await.unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.last_timestamp, None);
        assert_eq!(store.series_count(), 2);
    }

    #[tokio::test]
    async fn test_last_timestamp_tracks_newest_sample() {
        let store = InMemorySeriesStore::new();
        let t1 = unix_epoch() + Duration::hours(1);
        let t2 = unix_epoch() + Duration::hours(2);

        store.put_sample(&key("p1"), Sample::new(t2, 2.0), false).await.unwrap();
        store.put_sample(&key("p1"), Sample::new(t1, 1.0), false).await.unwrap();

        let series = store.ensure_series(&key("p1")).await.unwrap();
        assert_eq!(series.last_timestamp, Some(t2));
    }

    #[tokio::test]
    async fn test_duplicate_put_without_overwrite_rejected() {
        let store = InMemorySeriesStore::new();
        let ts = unix_epoch() + Duration::hours(1);
        store.put_sample(&key("p1"), Sample::new(ts, 1.0), false).await.unwrap();

        let err = store
            .put_sample(&key("p1"), Sample::new(ts, 5.0), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::RemoteWrite(_)));
        assert_eq!(store.samples(&key("p1")), vec![Sample::new(ts, 1.0)]);
    }

    #[tokio::test]
    async fn test_auth_switch() {
        let store = InMemorySeriesStore::new();
        assert!(!store.status().await.unwrap().is_authenticated());

        store.refresh_auth().await.unwrap();
        assert!(store.status().await.unwrap().is_authenticated());

        store.set_reject_auth(true);
        assert!(matches!(
            store.refresh_auth().await,
            Err(CollectorError::AuthFailure(_))
        ));
    }
}
