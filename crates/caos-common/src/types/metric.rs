//! Metric declarations
//!
//! A metric is identified by name and carries a kind that is fixed once it
//! has been declared to the series store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CollectorError;

/// How a metric's samples are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Difference of a cumulative quantity across a window
    Delta,
    /// Point-in-time measurement
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Delta => "delta",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delta" => Ok(MetricKind::Delta),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(CollectorError::invalid_configuration(format!(
                "unknown metric kind: {other}"
            ))),
        }
    }
}

/// A declared metric
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
}

impl Metric {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

pub const VM_CPU_TIME_USAGE: &str = "cpu";
pub const VM_WALLCLOCK_TIME_USAGE: &str = "wallclocktime";
pub const VM_CPU_EFFICIENCY: &str = "cpu.efficiency";

pub const VM_VCPUS_USAGE: &str = "vm.vcpus.usage";
pub const VM_DISK_USAGE: &str = "vm.disk.usage";
pub const VM_MEMORY_USAGE: &str = "vm.memory.usage";
pub const VM_COUNT_ACTIVE: &str = "vms.active";
pub const VM_COUNT_DELETED: &str = "vms.deleted";

pub const QUOTA_MEMORY: &str = "quota.memory";
pub const QUOTA_VCPUS: &str = "quota.vcpus";
pub const QUOTA_INSTANCES: &str = "quota.instances";

pub const HYPERVISOR_STATUS: &str = "hypervisor.status";
pub const HYPERVISOR_STATE: &str = "hypervisor.state";
pub const HYPERVISOR_CPUS_TOTAL: &str = "hypervisor.cpus.total";
pub const HYPERVISOR_VCPUS_TOTAL: &str = "hypervisor.vcpus.total";
pub const HYPERVISOR_VCPUS_USED: &str = "hypervisor.vcpus.used";
pub const HYPERVISOR_RAM_TOTAL: &str = "hypervisor.ram.total";
pub const HYPERVISOR_MEMORY_TOTAL: &str = "hypervisor.memory.total";
pub const HYPERVISOR_MEMORY_USED: &str = "hypervisor.memory.used";
pub const HYPERVISOR_RUNNING_VMS: &str = "hypervisor.vms.running";
pub const HYPERVISOR_WORKLOAD: &str = "hypervisor.workload";
pub const HYPERVISOR_LOAD_5M: &str = "hypervisor.load.5m";
pub const HYPERVISOR_LOAD_10M: &str = "hypervisor.load.10m";
pub const HYPERVISOR_LOAD_15M: &str = "hypervisor.load.15m";
pub const HYPERVISOR_DISK_TOTAL: &str = "hypervisor.disk.total";
pub const HYPERVISOR_DISK_USED: &str = "hypervisor.disk.used";
pub const HYPERVISOR_DISK_FREE: &str = "hypervisor.disk.free";
pub const HYPERVISOR_DISK_FREE_LEAST: &str = "hypervisor.disk.free.least";

const CATALOG: &[(&str, MetricKind)] = &[
    (VM_CPU_TIME_USAGE, MetricKind::Delta),
    (VM_WALLCLOCK_TIME_USAGE, MetricKind::Delta),
    (VM_CPU_EFFICIENCY, MetricKind::Gauge),
    (VM_VCPUS_USAGE, MetricKind::Delta),
    (VM_DISK_USAGE, MetricKind::Delta),
    (VM_MEMORY_USAGE, MetricKind::Delta),
    (VM_COUNT_ACTIVE, MetricKind::Gauge),
    (VM_COUNT_DELETED, MetricKind::Gauge),
    (QUOTA_MEMORY, MetricKind::Gauge),
    (QUOTA_VCPUS, MetricKind::Gauge),
    (QUOTA_INSTANCES, MetricKind::Gauge),
    (HYPERVISOR_STATUS, MetricKind::Gauge),
    (HYPERVISOR_STATE, MetricKind::Gauge),
    (HYPERVISOR_CPUS_TOTAL, MetricKind::Gauge),
    (HYPERVISOR_VCPUS_TOTAL, MetricKind::Gauge),
    (HYPERVISOR_VCPUS_USED, MetricKind::Gauge),
    (HYPERVISOR_RAM_TOTAL, MetricKind::Gauge),
    (HYPERVISOR_MEMORY_TOTAL, MetricKind::Gauge),
    (HYPERVISOR_MEMORY_USED, MetricKind::Gauge),
    (HYPERVISOR_RUNNING_VMS, MetricKind::Gauge),
    (HYPERVISOR_WORKLOAD, MetricKind::Gauge),
    (HYPERVISOR_LOAD_5M, MetricKind::Gauge),
    (HYPERVISOR_LOAD_10M, MetricKind::Gauge),
    (HYPERVISOR_LOAD_15M, MetricKind::Gauge),
    (HYPERVISOR_DISK_TOTAL, MetricKind::Gauge),
    (HYPERVISOR_DISK_USED, MetricKind::Gauge),
    (HYPERVISOR_DISK_FREE, MetricKind::Gauge),
    (HYPERVISOR_DISK_FREE_LEAST, MetricKind::Gauge),
];

/// Every metric the collector may write.
pub fn catalog() -> Vec<Metric> {
    CATALOG
        .iter()
        .map(|(name, kind)| Metric::new(*name, *kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_names_unique() {
        let metrics = catalog();
        let names: HashSet<_> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names.len(), metrics.len());
    }

    #[test]
    fn test_kind_round_trip_through_str() {
        assert_eq!("delta".parse::<MetricKind>().unwrap(), MetricKind::Delta);
        assert_eq!(MetricKind::Gauge.to_string(), "gauge");
        assert!("counter".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_usage_metrics_are_deltas() {
        let metrics = catalog();
        let cpu = metrics.iter().find(|m| m.name == VM_CPU_TIME_USAGE).unwrap();
        assert_eq!(cpu.kind, MetricKind::Delta);
        let quota = metrics.iter().find(|m| m.name == QUOTA_VCPUS).unwrap();
        assert_eq!(quota.kind, MetricKind::Gauge);
    }
}
