//! Tag metadata jobs
//!
//! Publish inventory records as metadata of the project, domain and
//! hypervisor tags.

use async_trait::async_trait;
use caos_common::{AbortScope, Result, Tag};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{DomainScope, Job, JobContext, JobReport};
use crate::inventory::Hypervisor;

/// Hypervisor fields published as metadata
fn hypervisor_metadata(h: &Hypervisor) -> Value {
    json!({
        "vcpus": h.vcpus,
        "host_ip": h.host_ip,
        "hypervisor_type": h.hypervisor_type,
        "service": h.service,
        "state": h.state,
        "status": h.status,
    })
}

async fn publish(
    ctx: &JobContext,
    records: Vec<(Tag, Value)>,
    now: DateTime<Utc>,
) -> Result<JobReport> {
    let mut report = JobReport::default();
    for (tag, metadata) in records {
        if ctx.cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        info!(tag = %tag, "Updating metadata");
        match ctx.series.create_tag_metadata(&tag, &metadata, now).await {
            Ok(()) => report.metadata_written += 1,
            Err(err) if err.abort_scope() == AbortScope::Tick => return Err(err),
            Err(err) => {
                warn!(tag = %tag, error = %err, "Metadata not written");
                report.aborted_series += 1;
            }
        }
    }
    Ok(report)
}

pub struct ProjectsMetadataJob {
    scope: DomainScope,
}

impl ProjectsMetadataJob {
    pub fn new(scope: DomainScope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Job for ProjectsMetadataJob {
    fn name(&self) -> &'static str {
        "projects_metadata"
    }

    async fn execute(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<JobReport> {
        let key = &ctx.config.collection.project_tag_key;
        let mut records = Vec::new();
        for project in ctx.inventory.projects(self.scope.domain.as_deref()).await? {
            let metadata = serde_json::to_value(&project)?;
            records.push((Tag::new(key, &project.id), metadata));
        }
        let report = publish(ctx, records, now).await?;
        info!("Projects metadata updated");
        Ok(report)
    }
}

pub struct DomainsMetadataJob;

#[async_trait]
impl Job for DomainsMetadataJob {
    fn name(&self) -> &'static str {
        "domains_metadata"
    }

    async fn execute(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<JobReport> {
        let key = &ctx.config.collection.domain_tag_key;
        let mut records = Vec::new();
        for domain in ctx.inventory.domains().await? {
            let metadata = serde_json::to_value(&domain)?;
            records.push((Tag::new(key, &domain.id), metadata));
        }
        let report = publish(ctx, records, now).await?;
        info!("Domains metadata updated");
        Ok(report)
    }
}

pub struct HypervisorsMetadataJob;

#[async_trait]
impl Job for HypervisorsMetadataJob {
    fn name(&self) -> &'static str {
        "hypervisors_metadata"
    }

    async fn execute(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<JobReport> {
        let key = &ctx.config.collection.hypervisor_tag_key;
        let records = ctx
            .inventory
            .hypervisors()
            .await?
            .iter()
            .map(|h| (Tag::new(key, &h.hostname), hypervisor_metadata(h)))
            .collect();
        let report = publish(ctx, records, now).await?;
        info!("Hypervisors metadata updated");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hypervisor_metadata_is_limited() {
        let h = Hypervisor {
            id: "7".into(),
            hostname: "cn-07".into(),
            status: "enabled".into(),
            state: "up".into(),
            vcpus: 64,
            vcpus_used: 0,
            memory_mb: 1,
            memory_mb_used: 0,
            local_gb: 1,
            local_gb_used: 0,
            free_disk_gb: 1,
            disk_available_least: 1,
            running_vms: 0,
            current_workload: 0,
            host_ip: "10.0.0.7".into(),
            hypervisor_type: "QEMU".into(),
            service: json!({ "host": "cn-07", "id": 12 }),
        };
        let metadata = hypervisor_metadata(&h);
        let obj = metadata.as_object().unwrap();
        assert_eq!(obj.len(), 6);
        assert_eq!(obj["vcpus"], json!(64));
        assert!(!obj.contains_key("memory_mb"));
    }
}
