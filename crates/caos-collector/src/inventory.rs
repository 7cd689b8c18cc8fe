//! Cloud inventory
//!
//! Read-only listings of domains, projects and hypervisors plus the
//! per-project quota and compute usage summaries the jobs turn into gauges.

use std::collections::BTreeMap;

use async_trait::async_trait;
use caos_common::{CollectorError, Result, HOUR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::InventoryConfig;

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub domain_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// Hypervisor record as reported by the compute service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypervisor {
    pub id: String,
    pub hostname: String,
    /// `enabled` or `disabled`
    pub status: String,
    /// `up` or `down`
    pub state: String,
    pub vcpus: u64,
    pub vcpus_used: u64,
    pub memory_mb: u64,
    pub memory_mb_used: u64,
    pub local_gb: u64,
    pub local_gb_used: u64,
    /// May be negative on overcommitted hosts
    pub free_disk_gb: i64,
    pub disk_available_least: i64,
    pub running_vms: u64,
    pub current_workload: u64,
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub hypervisor_type: String,
    #[serde(default)]
    pub service: serde_json::Value,
}

/// CPU and RAM allocation ratios advertised for one hypervisor's resource provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProviderRatios {
    pub cpu: f64,
    pub ram: f64,
}

impl Hypervisor {
    pub fn is_enabled(&self) -> bool {
        self.status == "enabled"
    }

    pub fn is_up(&self) -> bool {
        self.state == "up"
    }
}

/// Project quotas; negative values mean unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    pub instances: i64,
    pub cores: i64,
    /// MiB
    pub ram: i64,
}

/// Server lifetime record, the source of compute usage summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeServer {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub name: String,
    pub vcpus: u64,
    pub memory_mb: u64,
    pub local_gb: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerUsage {
    pub instance_id: String,
    pub name: String,
    pub hours: f64,
    pub vcpus: u64,
    pub memory_mb: u64,
    pub local_gb: u64,
    pub started_at: DateTime<Utc>,
    /// Set when the server was deleted before the end of the range
    pub ended_at: Option<DateTime<Utc>>,
}

/// Usage summary of one project over a time range.
///
/// Totals are resource-hours: vcpu-hours, GiB-hours and MiB-hours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeUsage {
    pub total_vcpus_usage: f64,
    pub total_local_gb_usage: f64,
    pub total_memory_mb_usage: f64,
    pub server_usages: Vec<ServerUsage>,
}

impl ComputeUsage {
    pub fn active_servers(&self) -> usize {
        self.server_usages.iter().filter(|s| s.ended_at.is_none()).count()
    }

    pub fn deleted_servers(&self) -> usize {
        self.server_usages.len() - self.active_servers()
    }
}

/// Read-only cloud inventory. Failures are `CollectorError::Inventory`.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn domains(&self) -> Result<Vec<Domain>>;

    /// Projects, optionally limited to one domain
    async fn projects(&self, domain_id: Option<&str>) -> Result<Vec<Project>>;

    async fn project(&self, project_id: &str) -> Result<Project>;

    async fn hypervisors(&self) -> Result<Vec<Hypervisor>>;

    async fn project_quotas(&self, project_id: &str) -> Result<Quotas>;

    async fn compute_usage(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ComputeUsage>;

    /// Raw `uptime` output of a hypervisor, if it reports one
    async fn hypervisor_uptime(&self, hypervisor_id: &str) -> Result<Option<String>>;

    /// Allocation ratios by hypervisor hostname, as advertised by the
    /// placement service
    async fn allocation_ratios(&self) -> Result<BTreeMap<String, ProviderRatios>>;
}

/// Inventory served from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    records: InventoryConfig,
}

impl StaticInventory {
    pub fn new(records: InventoryConfig) -> Self {
        Self { records }
    }
}

fn overlap_hours(
    server: &ComputeServer,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<f64> {
    let from = server.started_at.max(start);
    let to = server.ended_at.map_or(end, |e| e.min(end));
    if to <= from {
        return None;
    }
    Some((to - from).num_seconds() as f64 / HOUR)
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn domains(&self) -> Result<Vec<Domain>> {
        Ok(self.records.domains.clone())
    }

    async fn projects(&self, domain_id: Option<&str>) -> Result<Vec<Project>> {
        Ok(self
            .records
            .projects
            .iter()
            .filter(|p| domain_id.map_or(true, |d| p.domain_id == d))
            .cloned()
            .collect())
    }

    async fn project(&self, project_id: &str) -> Result<Project> {
        self.records
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .cloned()
            .ok_or_else(|| CollectorError::Inventory(format!("project {project_id} not found")))
    }

    async fn hypervisors(&self) -> Result<Vec<Hypervisor>> {
        Ok(self.records.hypervisors.clone())
    }

    async fn project_quotas(&self, project_id: &str) -> Result<Quotas> {
        self.records
            .quotas
            .get(project_id)
            .copied()
            .ok_or_else(|| CollectorError::Inventory(format!("no quotas for project {project_id}")))
    }

    async fn compute_usage(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ComputeUsage> {
        let mut usage = ComputeUsage::default();
        for server in self.records.servers.iter().filter(|s| s.project_id == project_id) {
            let Some(hours) = overlap_hours(server, start, end) else {
                continue;
            };
            usage.total_vcpus_usage += hours * server.vcpus as f64;
            usage.total_local_gb_usage += hours * server.local_gb as f64;
            usage.total_memory_mb_usage += hours * server.memory_mb as f64;
            usage.server_usages.push(ServerUsage {
                instance_id: server.id.clone(),
                name: server.name.clone(),
                hours,
                vcpus: server.vcpus,
                memory_mb: server.memory_mb,
                local_gb: server.local_gb,
                started_at: server.started_at,
                ended_at: server.ended_at.filter(|e| *e <= end),
            });
        }
        Ok(usage)
    }

    async fn hypervisor_uptime(&self, hypervisor_id: &str) -> Result<Option<String>> {
        Ok(self.records.uptimes.get(hypervisor_id).cloned())
    }

    async fn allocation_ratios(&self) -> Result<BTreeMap<String, ProviderRatios>> {
        Ok(self.records.allocation_ratios.clone())
    }
}
