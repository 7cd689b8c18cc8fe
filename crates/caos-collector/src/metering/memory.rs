//! In-memory metering store
//!
//! Holds observations in process. Used by tests and for replaying captured
//! metering documents.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use caos_common::{CollectorError, RawObservation, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{MeteringStore, ObservationQuery, TimeRange};

/// In-memory metering store implementation
#[derive(Default)]
pub struct InMemoryMeteringStore {
    observations: RwLock<Vec<RawObservation>>,
    /// When set, every call fails as if the store were unreachable
    offline: AtomicBool,
}

impl InMemoryMeteringStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, observation: RawObservation) {
        self.observations.write().push(observation);
    }

    /// Ingest a metering document with nested `resource_metadata`.
    pub fn insert_document(&self, doc: &serde_json::Value) -> Result<()> {
        self.insert(RawObservation::from_document(doc)?);
        Ok(())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.observations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.read().is_empty()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollectorError::StoreUnavailable(
                "in-memory metering store is offline".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MeteringStore for InMemoryMeteringStore {
    async fn find_resources(
        &self,
        tenant: &str,
        counter_name: &str,
        range: TimeRange,
    ) -> Result<Vec<String>> {
        self.check_online()?;

        let observations = self.observations.read();
        let mut spans: BTreeMap<&str, (DateTime<Utc>, DateTime<Utc>)> = BTreeMap::new();
        for obs in observations
            .iter()
            .filter(|o| o.project_id == tenant && o.counter_name == counter_name)
        {
            spans
                .entry(obs.resource_id.as_str())
                .and_modify(|(first, last)| {
                    *first = (*first).min(obs.timestamp);
                    *last = (*last).max(obs.timestamp);
                })
                .or_insert((obs.timestamp, obs.timestamp));
        }

        Ok(spans
            .into_iter()
            .filter(|(_, (first, last))| range.overlaps(*first, *last))
            .map(|(id, _)| id.to_string())
            .collect())
    }

    async fn query_observations(&self, query: &ObservationQuery) -> Result<Vec<RawObservation>> {
        self.check_online()?;

        let observations = self.observations.read();
        let mut matched: Vec<RawObservation> = observations
            .iter()
            .filter(|o| {
                o.project_id == query.tenant
                    && o.counter_name == query.counter_name
                    && query.resource_ids.contains(&o.resource_id)
                    && o.timestamp >= query.start
                    && o.timestamp <= query.end
                    && query.filters.iter().all(|f| o.matches(&f.field, &f.equals))
            })
            .cloned()
            .collect();

        for obs in matched.iter_mut() {
            obs.project(&query.projection);
        }
        matched.sort_by_key(|o| o.timestamp);
        Ok(matched)
    }
}
