//! Collection jobs
//!
//! Every job runs through [`run_job`]: series store connectivity and version
//! check, credential refresh, metric declaration, then the job body. A job
//! returns its error to the caller; the scheduler logs it and moves on, so
//! the next scheduled tick is the retry.

pub mod hypervisors;
pub mod metadata;
pub mod quotas;
pub mod vm_usage;

pub use hypervisors::{parse_load_average, AllocationRatios, HypervisorsStateJob, HypervisorsStateOptions};
pub use metadata::{DomainsMetadataJob, HypervisorsMetadataJob, ProjectsMetadataJob};
pub use quotas::ProjectsQuotasJob;
pub use vm_usage::{VmUsageJob, VmUsageOptions};

use std::sync::Arc;

use async_trait::async_trait;
use caos_common::{AbortScope, CollectorError, Result, SeriesKey};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::CollectorConfig;
use crate::inventory::Inventory;
use crate::metering::MeteringStore;
use crate::tsdb::{check_version, ensure_metrics, SeriesStore, WriteOutcome};

/// Everything a job talks to
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<CollectorConfig>,
    pub series: Arc<dyn SeriesStore>,
    pub metering: Arc<dyn MeteringStore>,
    pub inventory: Arc<dyn Inventory>,
    /// Checked between windows only
    pub cancel: CancellationToken,
}

/// What one job run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub written: usize,
    pub skipped: usize,
    pub overwritten: usize,
    /// Windows without enough data for a value
    pub empty_windows: usize,
    /// Series abandoned after a remote write error
    pub aborted_series: usize,
    pub metadata_written: usize,
    pub cancelled: bool,
}

impl JobReport {
    pub fn record(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Written(_) => self.written += 1,
            WriteOutcome::Skipped { .. } => self.skipped += 1,
            WriteOutcome::Overwritten { .. } => self.overwritten += 1,
        }
    }
}

/// A collection job
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Job body; prerequisites are handled by [`run_job`].
    async fn execute(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<JobReport>;
}

/// Run `job` with its prerequisites.
#[instrument(skip_all, fields(job = job.name()))]
pub async fn run_job(job: &dyn Job, ctx: &JobContext, now: DateTime<Utc>) -> Result<JobReport> {
    info!("Checking series store connectivity");
    let status = ctx.series.status().await?;
    info!(version = %status.version, status = %status.status, "Series store reachable");
    check_version(&status)?;

    ctx.series.refresh_auth().await?;

    let declared = ensure_metrics(ctx.series.as_ref()).await?;
    if declared > 0 {
        info!(declared, "Declared missing metrics");
    }

    let report = job.execute(ctx, now).await?;
    info!(
        written = report.written,
        skipped = report.skipped,
        overwritten = report.overwritten,
        aborted_series = report.aborted_series,
        cancelled = report.cancelled,
        "Job finished"
    );
    Ok(report)
}

/// Outcome of a per-series error: `Ok` when the rest of the job may go on.
pub(crate) fn absorb_series_error(
    err: CollectorError,
    series: &SeriesKey,
    report: &mut JobReport,
) -> Result<()> {
    match err.abort_scope() {
        AbortScope::Series => {
            warn!(series = %series, error = %err, "Abandoning series for this tick");
            report.aborted_series += 1;
            Ok(())
        }
        AbortScope::Call => {
            error!(series = %series, error = %err, "Invalid series request");
            report.aborted_series += 1;
            Ok(())
        }
        AbortScope::Tick => Err(err),
    }
}

/// Limit a run to a domain
#[derive(Debug, Clone, Default, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainScope {
    /// Limit by domain id
    #[arg(short, long, value_name = "ID")]
    pub domain: Option<String>,
}

/// Limit a run to a domain or a single project
#[derive(Debug, Clone, Default, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectScope {
    /// Limit by domain id
    #[arg(short, long, value_name = "ID")]
    pub domain: Option<String>,
    /// Limit by project id
    #[arg(short, long, value_name = "ID")]
    pub project: Option<String>,
}

impl ProjectScope {
    pub(crate) async fn resolve(&self, inventory: &dyn Inventory) -> Result<Vec<crate::inventory::Project>> {
        match &self.project {
            Some(id) => Ok(vec![inventory.project(id).await?]),
            None => inventory.projects(self.domain.as_deref()).await,
        }
    }
}

/// Job selection, shared by the CLI and the schedule configuration
#[derive(Debug, Clone, Subcommand, Serialize, Deserialize)]
#[command(rename_all = "snake_case")]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobSpec {
    /// Project VM usage: compute summaries, cpu time and wall-clock time
    VmUsage(VmUsageOptions),
    /// Project quotas
    ProjectsQuotas(ProjectScope),
    /// Hypervisor capacity, usage and load
    HypervisorsState(HypervisorsStateOptions),
    /// Project records as tag metadata
    ProjectsMetadata(DomainScope),
    /// Domain records as tag metadata
    DomainsMetadata,
    /// Hypervisor records as tag metadata
    HypervisorsMetadata,
}

impl JobSpec {
    pub fn build(&self) -> Box<dyn Job> {
        match self {
            JobSpec::VmUsage(opts) => Box::new(VmUsageJob::new(opts.clone())),
            JobSpec::ProjectsQuotas(scope) => Box::new(ProjectsQuotasJob::new(scope.clone())),
            JobSpec::HypervisorsState(opts) => Box::new(HypervisorsStateJob::new(opts.clone())),
            JobSpec::ProjectsMetadata(scope) => Box::new(ProjectsMetadataJob::new(scope.clone())),
            JobSpec::DomainsMetadata => Box::new(DomainsMetadataJob),
            JobSpec::HypervisorsMetadata => Box::new(HypervisorsMetadataJob),
        }
    }
}

/// clap value parser for timestamps
pub fn parse_cli_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    caos_common::parse_timestamp(raw).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_from_yaml_tag() {
        let spec: JobSpec = serde_json::from_value(serde_json::json!({
            "job": "vm_usage",
            "period": 86400,
            "misfire": 172800,
        }))
        .unwrap();
        match spec {
            JobSpec::VmUsage(opts) => {
                assert_eq!(opts.period, 86400);
                assert_eq!(opts.misfire, 172800);
                assert!(!opts.overwrite);
            }
            other => panic!("unexpected spec {other:?}"),
        }

        let spec: JobSpec = serde_json::from_value(serde_json::json!({ "job": "domains_metadata" })).unwrap();
        assert_eq!(spec.build().name(), "domains_metadata");
    }

    #[test]
    fn test_absorb_series_error_scopes() {
        let key = SeriesKey::new("cpu", 3600, caos_common::TagSet::single("project", "p").unwrap());
        let mut report = JobReport::default();

        assert!(absorb_series_error(CollectorError::RemoteWrite("x".into()), &key, &mut report).is_ok());
        assert!(absorb_series_error(CollectorError::StoreUnavailable("x".into()), &key, &mut report).is_err());
        assert_eq!(report.aborted_series, 1);
    }
}
