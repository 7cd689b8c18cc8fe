//! Counter sampler
//!
//! Produces one value per tenant, metric and window from the metering store:
//! resolve the resources active around the window, fetch their observations,
//! collapse each resource with its [`CounterPolicy`] and sum.

pub mod policy;

pub use policy::CounterPolicy;

use std::collections::BTreeMap;
use std::sync::Arc;

use caos_common::types::window::{epoch_seconds, seconds};
use caos_common::{format_timestamp, Result, Window};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::metering::{find_resources, MeteringStore, ObservationQuery, Point};

/// Counter sampler bound to one metering store
#[derive(Clone)]
pub struct Pollster {
    store: Arc<dyn MeteringStore>,
    /// Upstream polling period in seconds
    polling_period: u64,
    epoch: DateTime<Utc>,
}

impl Pollster {
    pub fn new(store: Arc<dyn MeteringStore>, polling_period: u64, epoch: DateTime<Utc>) -> Self {
        Self {
            store,
            polling_period,
            epoch,
        }
    }

    /// Value of `policy`'s metric for `tenant` over `window`.
    ///
    /// `Ok(None)` when the window is not observable yet or no resource has
    /// enough data. Store failures propagate.
    #[instrument(skip(self, window), fields(metric = policy.metric_name(), window = %window))]
    pub async fn measure(
        &self,
        policy: CounterPolicy,
        tenant: &str,
        window: &Window,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let extended = window.extended(seconds(self.polling_period));
        if now < extended.end {
            debug!(
                window_end = %format_timestamp(&window.end),
                "Window not observable yet"
            );
            return Ok(None);
        }

        let resources = find_resources(
            self.store.as_ref(),
            tenant,
            policy.counter_name(),
            Some(extended.start),
            Some(extended.end),
        )
        .await?;

        if resources.is_empty() {
            debug!(tenant, "No resources with data in window");
            return Ok(None);
        }

        let query = ObservationQuery {
            tenant: tenant.to_string(),
            counter_name: policy.counter_name().to_string(),
            resource_ids: resources.iter().cloned().collect(),
            start: extended.start,
            end: extended.end,
            projection: policy.field_projection(),
            filters: policy.extra_query_filters(),
        };
        let observations = self.store.query_observations(&query).await?;

        // observations arrive sorted by time, grouping keeps that order
        let mut by_resource: BTreeMap<&str, Vec<Point>> = BTreeMap::new();
        for obs in &observations {
            let Some(value) = obs.value(policy.value_field()) else {
                debug!(resource = %obs.resource_id, "Observation without value field");
                continue;
            };
            by_resource
                .entry(obs.resource_id.as_str())
                .or_default()
                .push(Point::new(epoch_seconds(&obs.timestamp, &self.epoch), value));
        }

        let start = epoch_seconds(&window.start, &self.epoch);
        let end = epoch_seconds(&window.end, &self.epoch);

        let mut total: Option<f64> = None;
        for resource in &resources {
            let points = by_resource.remove(resource.as_str()).unwrap_or_default();
            match policy.aggregate(points, start, end) {
                Some(value) => {
                    debug!(resource = %resource, value, "Resource measured");
                    *total.get_or_insert(0.0) += value;
                }
                None => debug!(resource = %resource, "Not enough data for resource"),
            }
        }

        if total.is_none() {
            info!(tenant, "No resource yielded a value");
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::InMemoryMeteringStore;
    use caos_common::{unix_epoch, RawObservation};
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        unix_epoch() + Duration::seconds(secs)
    }

    fn cpu(resource: &str, secs: i64, ns: f64) -> RawObservation {
        RawObservation::new(resource, "tenant-a", "cpu", at(secs), ns)
    }

    fn pollster(store: Arc<InMemoryMeteringStore>) -> Pollster {
        Pollster::new(store, 600, unix_epoch())
    }

    #[tokio::test]
    async fn test_two_observations_interpolated_difference() {
        let store = Arc::new(InMemoryMeteringStore::new());
        store.insert(cpu("vm-1", 3000, 0.0));
        store.insert(cpu("vm-1", 7800, 4800e9));

        let window = Window::ending_at(at(7200), 3600);
        let value = pollster(store)
            .measure(CounterPolicy::CpuTime, "tenant-a", &window, at(10_000))
            .await
            .unwrap();
        assert_eq!(value, Some(3600.0));
    }

    #[tokio::test]
    async fn test_single_observation_yields_none() {
        let store = Arc::new(InMemoryMeteringStore::new());
        store.insert(cpu("vm-1", 5000, 10e9));

        let window = Window::ending_at(at(7200), 3600);
        let value = pollster(store)
            .measure(CounterPolicy::CpuTime, "tenant-a", &window, at(10_000))
            .await
            .unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_resources_are_summed() {
        let store = Arc::new(InMemoryMeteringStore::new());
        for vm in ["vm-1", "vm-2"] {
            store.insert(cpu(vm, 3000, 0.0));
            store.insert(cpu(vm, 7800, 4800e9));
        }
        // only one point, contributes nothing
        store.insert(cpu("vm-3", 4000, 1e9));

        let window = Window::ending_at(at(7200), 3600);
        let value = pollster(store)
            .measure(CounterPolicy::CpuTime, "tenant-a", &window, at(10_000))
            .await
            .unwrap();
        assert_eq!(value, Some(7200.0));
    }

    #[tokio::test]
    async fn test_guard_skips_unobservable_window() {
        let store = Arc::new(InMemoryMeteringStore::new());
        store.set_offline(true);

        // window end + slack is still in the future, the store is never hit
        let window = Window::ending_at(at(7200), 3600);
        let value = pollster(store)
            .measure(CounterPolicy::CpuTime, "tenant-a", &window, at(7500))
            .await
            .unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = Arc::new(InMemoryMeteringStore::new());
        store.set_offline(true);

        let window = Window::ending_at(at(7200), 3600);
        let result = pollster(store)
            .measure(CounterPolicy::CpuTime, "tenant-a", &window, at(10_000))
            .await;
        assert!(matches!(
            result,
            Err(caos_common::CollectorError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_wallclock_counts_active_vcpus() {
        let store = Arc::new(InMemoryMeteringStore::new());
        for secs in [3000, 5400, 7800] {
            store.insert(
                RawObservation::new("vm-1", "tenant-a", "instance", at(secs), 1.0)
                    .with_metadata("status", "active".into())
                    .with_metadata("vcpus", 4.into()),
            );
        }
        // audit notification without status is filtered out
        store.insert(
            RawObservation::new("vm-1", "tenant-a", "instance", at(6000), 1.0)
                .with_metadata("state", "active".into())
                .with_metadata("vcpus", 64.into()),
        );

        let window = Window::ending_at(at(7200), 3600);
        let value = pollster(store)
            .measure(CounterPolicy::WallClockTime, "tenant-a", &window, at(10_000))
            .await
            .unwrap()
            .unwrap();
        assert!((value - 4.0 * 3600.0).abs() < 1e-6);
    }
}
