//! Project quotas job

use async_trait::async_trait;
use caos_common::types::metric::{QUOTA_INSTANCES, QUOTA_MEMORY, QUOTA_VCPUS};
use caos_common::{Result, SeriesKey, TagSet, MEBIBYTE};
use chrono::{DateTime, Utc};
use tracing::info;

use super::{absorb_series_error, Job, JobContext, JobReport, ProjectScope};
use crate::inventory::Quotas;

/// Quota gauges, unlimited (negative) quotas kept as -1
fn quota_values(quotas: &Quotas) -> [(&'static str, f64); 3] {
    let scaled = |v: i64, unit: f64| if v < 0 { -1.0 } else { v as f64 * unit };
    [
        (QUOTA_MEMORY, scaled(quotas.ram, MEBIBYTE)),
        (QUOTA_VCPUS, scaled(quotas.cores, 1.0)),
        (QUOTA_INSTANCES, scaled(quotas.instances, 1.0)),
    ]
}

pub struct ProjectsQuotasJob {
    scope: ProjectScope,
}

impl ProjectsQuotasJob {
    pub fn new(scope: ProjectScope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Job for ProjectsQuotasJob {
    fn name(&self) -> &'static str {
        "projects_quotas"
    }

    async fn execute(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();
        for project in self.scope.resolve(ctx.inventory.as_ref()).await? {
            if ctx.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            info!(project = %project.id, name = %project.name, "Checking quota");
            let quotas = ctx.inventory.project_quotas(&project.id).await?;
            let tags = TagSet::single(&ctx.config.collection.project_tag_key, &project.id)?;

            for (metric, value) in quota_values(&quotas) {
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
        info!("Projects quotas updated");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_values() {
        let values = quota_values(&Quotas {
            instances: 10,
            cores: 20,
            ram: 51200,
        });
        assert_eq!(values[0], (QUOTA_MEMORY, 51200.0 * MEBIBYTE));
        assert_eq!(values[1], (QUOTA_VCPUS, 20.0));
        assert_eq!(values[2], (QUOTA_INSTANCES, 10.0));
    }

    #[test]
    fn test_unlimited_quota() {
        let values = quota_values(&Quotas {
            instances: -1,
            cores: 4,
            ram: -1,
        });
        assert_eq!(values[0].1, -1.0);
        assert_eq!(values[2].1, -1.0);
    }
}
