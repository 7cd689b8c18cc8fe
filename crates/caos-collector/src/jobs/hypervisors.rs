//! Hypervisors state job
//!
//! Status and state indicators, capacity and usage gauges for every
//! hypervisor. Capacities are zeroed for disabled hypervisors and scaled by
//! the CPU and RAM allocation ratios. Load averages are only collected from
//! hypervisors that are up.

use std::collections::BTreeMap;

use async_trait::async_trait;
use caos_common::types::metric::*;
use caos_common::{CollectorError, Result, SeriesKey, TagSet, GIBIBYTE, MEBIBYTE};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{absorb_series_error, Job, JobContext, JobReport};
use crate::inventory::{Hypervisor, ProviderRatios};

/// Ratio applied when neither a host entry nor a default is known
const UNIT_RATIO: f64 = 1.0;

/// Allocation ratio with per-hypervisor overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatioTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
    /// Ratio by hypervisor hostname
    #[serde(flatten)]
    pub hosts: BTreeMap<String, f64>,
}

impl RatioTable {
    pub fn for_host(&self, host: &str) -> f64 {
        self.hosts
            .get(host)
            .copied()
            .or(self.default)
            .unwrap_or(UNIT_RATIO)
    }

    /// Entries of `other` win, host by host
    pub fn merge(&mut self, other: &RatioTable) {
        if other.default.is_some() {
            self.default = other.default;
        }
        self.hosts
            .extend(other.hosts.iter().map(|(host, ratio)| (host.clone(), *ratio)));
    }
}

/// CPU and RAM allocation ratios, `{"cpu": {"default": 16, "host-1": 4}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationRatios {
    pub cpu: RatioTable,
    pub ram: RatioTable,
}

impl AllocationRatios {
    pub fn from_providers(providers: &BTreeMap<String, ProviderRatios>) -> Self {
        let mut ratios = Self::default();
        for (host, provider) in providers {
            ratios.cpu.hosts.insert(host.clone(), provider.cpu);
            ratios.ram.hosts.insert(host.clone(), provider.ram);
        }
        ratios
    }

    pub fn merge(&mut self, other: &AllocationRatios) {
        self.cpu.merge(&other.cpu);
        self.ram.merge(&other.ram);
    }
}

fn parse_allocation_ratios(raw: &str) -> std::result::Result<AllocationRatios, String> {
    serde_json::from_str(raw).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Default, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct HypervisorsStateOptions {
    /// Limit by hypervisor hostname
    #[arg(short = 'H', long, value_name = "HOST")]
    pub hypervisor: Option<String>,
    /// Allocation ratios as JSON, overriding the advertised ones
    #[arg(short, long, value_name = "JSON", value_parser = parse_allocation_ratios)]
    pub allocation_ratio: Option<AllocationRatios>,
    /// Ignore the allocation ratios advertised by the inventory
    #[arg(short, long)]
    pub no_placement: bool,
}

/// Extract the 1, 5 and 15 minute loads from `uptime` output, e.g.
/// `17:37:14 up  2:33,  3 users,  load average: 0.33, 0.36, 0.34`
pub fn parse_load_average(uptime: &str) -> Option<(f64, f64, f64)> {
    let (_, loads) = uptime.rsplit_once("load average:")?;
    let mut parts = loads.split(',').map(|p| p.trim().parse::<f64>());
    let loads = (parts.next()?.ok()?, parts.next()?.ok()?, parts.next()?.ok()?);
    parts.next().is_none().then_some(loads)
}

/// Gauges of one hypervisor, load excluded
fn state_values(h: &Hypervisor, cpu_ratio: f64, ram_ratio: f64) -> Vec<(&'static str, f64)> {
    let status = if h.is_enabled() { 1.0 } else { 0.0 };
    let state = if h.is_up() { 1.0 } else { 0.0 };
    let cpus = h.vcpus as f64 * status;
    let ram = h.memory_mb as f64 * MEBIBYTE * status;
    let disk = h.local_gb as f64 * GIBIBYTE * status;

    vec![
        (HYPERVISOR_STATUS, status),
        (HYPERVISOR_STATE, state),
        (HYPERVISOR_CPUS_TOTAL, cpus),
        (HYPERVISOR_VCPUS_TOTAL, cpus * cpu_ratio),
        (HYPERVISOR_VCPUS_USED, h.vcpus_used as f64),
        (HYPERVISOR_RUNNING_VMS, h.running_vms as f64),
        (HYPERVISOR_RAM_TOTAL, ram),
        (HYPERVISOR_MEMORY_TOTAL, ram * ram_ratio),
        (HYPERVISOR_MEMORY_USED, h.memory_mb_used as f64 * MEBIBYTE),
        (HYPERVISOR_DISK_TOTAL, disk),
        (HYPERVISOR_DISK_USED, h.local_gb_used as f64 * GIBIBYTE),
        (HYPERVISOR_DISK_FREE, h.free_disk_gb as f64 * GIBIBYTE),
        (HYPERVISOR_DISK_FREE_LEAST, h.disk_available_least as f64 * GIBIBYTE),
        (HYPERVISOR_WORKLOAD, h.current_workload as f64),
    ]
}

pub struct HypervisorsStateJob {
    options: HypervisorsStateOptions,
}

impl HypervisorsStateJob {
    pub fn new(options: HypervisorsStateOptions) -> Self {
        Self { options }
    }

    /// Advertised ratios overlaid with the ones given on the command line
    async fn allocation_ratios(&self, ctx: &JobContext) -> Result<AllocationRatios> {
        let mut ratios = AllocationRatios::default();
        if !self.options.no_placement {
            let advertised = ctx.inventory.allocation_ratios().await?;
            info!(providers = advertised.len(), "Allocation ratios from placement");
            ratios.merge(&AllocationRatios::from_providers(&advertised));
        }
        if let Some(given) = &self.options.allocation_ratio {
            ratios.merge(given);
        }
        Ok(ratios)
    }

    async fn values(
        &self,
        ctx: &JobContext,
        h: &Hypervisor,
        ratios: &AllocationRatios,
    ) -> Result<Vec<(&'static str, f64)>> {
        let cpu_ratio = ratios.cpu.for_host(&h.hostname);
        let ram_ratio = ratios.ram.for_host(&h.hostname);
        debug!(host = %h.hostname, cpu_ratio, ram_ratio, "Allocation ratios");

        let mut values = state_values(h, cpu_ratio, ram_ratio);
        if h.is_up() {
            let loads = ctx
                .inventory
                .hypervisor_uptime(&h.id)
                .await?
                .as_deref()
                .and_then(parse_load_average);
            if let Some((l5, l10, l15)) = loads {
                values.push((HYPERVISOR_LOAD_5M, l5));
                values.push((HYPERVISOR_LOAD_10M, l10));
                values.push((HYPERVISOR_LOAD_15M, l15));
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl Job for HypervisorsStateJob {
    fn name(&self) -> &'static str {
        "hypervisors_state"
    }

    async fn execute(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<JobReport> {
        let mut hypervisors = ctx.inventory.hypervisors().await?;
        if let Some(host) = &self.options.hypervisor {
            hypervisors.retain(|h| &h.hostname == host);
            if hypervisors.is_empty() {
                return Err(CollectorError::Inventory(format!("hypervisor {host} not found")));
            }
        }

        let ratios = self.allocation_ratios(ctx).await?;
        let mut report = JobReport::default();
        for h in &hypervisors {
            if ctx.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            info!(host = %h.hostname, "Checking hypervisor state");
            let tags = TagSet::single(&ctx.config.collection.hypervisor_tag_key, &h.hostname)?;

            for (metric, value) in self.values(ctx, h, &ratios).await? {
                let key = SeriesKey::new(metric, 0, tags.clone());
                match ctx.series.write_sample(&key, now, value, false).await {
                    Ok(outcome) => report.record(&outcome),
                    Err(err) => {
                        absorb_series_error(err, &key, &mut report)?;
                        break;
                    }
                }
            }
        }
        info!("Hypervisors state updated");
        Ok(report)
    }
}
