//! VM usage job
//!
//! Per project:
//! - compute usage summaries (vcpu, disk and memory hours, active and
//!   deleted server counts) over a plain range grid
//! - cpu time and wall-clock time from metering counters over the
//!   misfire-aware grid resumed from each series' last timestamp

use async_trait::async_trait;
use caos_common::types::metric::{
    VM_COUNT_ACTIVE, VM_COUNT_DELETED, VM_DISK_USAGE, VM_MEMORY_USAGE, VM_VCPUS_USAGE,
};
use caos_common::types::window::span;
use caos_common::{
    format_timestamp, CollectorError, Result, SeriesKey, TagSet, Window, GIBIBYTE, HOUR, MEBIBYTE,
};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{absorb_series_error, parse_cli_timestamp, Job, JobContext, JobReport, ProjectScope};
use crate::grid::{self, GridMode, GridRequest};
use crate::inventory::Project;
use crate::pollster::{CounterPolicy, Pollster};

pub const DEFAULT_PERIOD: u64 = 3600;

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct VmUsageOptions {
    #[command(flatten)]
    #[serde(flatten)]
    pub scope: ProjectScope,
    /// Compute usage since this timestamp (default now)
    #[arg(short, long, value_name = "TS", value_parser = parse_cli_timestamp)]
    pub start: Option<DateTime<Utc>>,
    /// Collect up to this timestamp (default now)
    #[arg(short, long, value_name = "TS", value_parser = parse_cli_timestamp)]
    pub end: Option<DateTime<Utc>>,
    /// Window length in seconds
    #[arg(short = 'P', long, default_value_t = DEFAULT_PERIOD)]
    pub period: u64,
    /// Misfire grace time in seconds, 0 disables
    #[arg(short, long, value_name = "SECONDS", default_value_t = 0)]
    pub misfire: u64,
    /// Overwrite existing samples
    #[arg(short, long)]
    pub overwrite: bool,
    /// Only update the current period; implies overwrite
    #[arg(short = 'C', long)]
    pub current: bool,
}

impl Default for VmUsageOptions {
    fn default() -> Self {
        Self {
            scope: ProjectScope::default(),
            start: None,
            end: None,
            period: DEFAULT_PERIOD,
            misfire: 0,
            overwrite: false,
            current: false,
        }
    }
}

/// Settings resolved for one run
#[derive(Debug, Clone, Copy)]
struct RunPlan {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
    period: u64,
    misfire: u64,
    overwrite: bool,
    mode: GridMode,
}

pub struct VmUsageJob {
    options: VmUsageOptions,
}

impl VmUsageJob {
    pub fn new(options: VmUsageOptions) -> Self {
        Self { options }
    }

    fn plan(&self, now: DateTime<Utc>) -> Result<RunPlan> {
        if self.options.period == 0 {
            return Err(CollectorError::invalid_configuration(
                "period must be positive",
            ));
        }
        span("period", self.options.period)?;
        span("misfire grace time", self.options.misfire)?;

        let mut start = self.options.start.unwrap_or(now);
        if start > now {
            warn!("Start date is in the future, resetting to now");
            start = now;
        }
        let mut end = self.options.end.unwrap_or(now);
        if end < start {
            warn!("End date is before start date, resetting to start date");
            end = start;
        }
        Ok(RunPlan {
            start,
            end,
            now,
            period: self.options.period,
            misfire: self.options.misfire,
            overwrite: self.options.overwrite || self.options.current,
            mode: if self.options.current {
                GridMode::Current
            } else {
                GridMode::Backfill
            },
        })
    }

    fn usage_grid(plan: &RunPlan, ctx: &JobContext) -> Result<Vec<DateTime<Utc>>> {
        let epoch = ctx.config.collection.epoch;
        match plan.mode {
            GridMode::Current => grid::timeline(&GridRequest {
                last_timestamp: None,
                period: plan.period,
                now: plan.now,
                misfire_grace: 0,
                epoch,
                mode: GridMode::Current,
            }),
            GridMode::Backfill => grid::range(plan.start, plan.end, plan.period, epoch),
        }
    }

    /// Compute usage summaries; a failing window abandons the rest.
    #[instrument(skip_all, fields(project = %project.id))]
    async fn collect_compute_usage(
        &self,
        ctx: &JobContext,
        plan: &RunPlan,
        project: &Project,
        tags: &TagSet,
        report: &mut JobReport,
    ) -> Result<()> {
        for ts in Self::usage_grid(plan, ctx)? {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }
            let window = Window::ending_at(ts, plan.period);
            info!(window = %window, "Checking compute usage");
            let usage = ctx
                .inventory
                .compute_usage(&project.id, window.start, window.end)
                .await?;

            let values = [
                (VM_VCPUS_USAGE, usage.total_vcpus_usage * HOUR),
                (VM_DISK_USAGE, usage.total_local_gb_usage * GIBIBYTE * HOUR),
                (VM_MEMORY_USAGE, usage.total_memory_mb_usage * MEBIBYTE * HOUR),
                (VM_COUNT_ACTIVE, usage.active_servers() as f64),
                (VM_COUNT_DELETED, usage.deleted_servers() as f64),
            ];
            for (metric, value) in values {
                let key = SeriesKey::new(metric, plan.period, tags.clone());
                match ctx.series.write_sample(&key, ts, value, plan.overwrite).await {
                    Ok(outcome) => report.record(&outcome),
                    Err(err) => return absorb_series_error(err, &key, report),
                }
            }
        }
        Ok(())
    }

    /// One counter-derived series, resumed from its last timestamp
    #[instrument(skip_all, fields(project = %project.id, metric = policy.metric_name()))]
    async fn collect_counter(
        &self,
        ctx: &JobContext,
        plan: &RunPlan,
        pollster: &Pollster,
        policy: CounterPolicy,
        project: &Project,
        tags: &TagSet,
        report: &mut JobReport,
    ) -> Result<()> {
        let key = SeriesKey::new(policy.metric_name(), plan.period, tags.clone());
        let series = match ctx.series.ensure_series(&key).await {
            Ok(series) => series,
            Err(err) => return absorb_series_error(err, &key, report),
        };

        let windows = grid::timeline(&GridRequest {
            last_timestamp: series.last_timestamp,
            period: plan.period,
            now: plan.end,
            misfire_grace: plan.misfire,
            epoch: ctx.config.collection.epoch,
            mode: plan.mode,
        })?;
        if windows.is_empty() {
            info!(series = %key, "Series is up to date");
        }

        for ts in windows {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }
            let window = Window::ending_at(ts, plan.period);
            let Some(value) = pollster.measure(policy, &project.id, &window, plan.now).await? else {
                info!(
                    window_end = %format_timestamp(&ts),
                    "Skipping window without value"
                );
                report.empty_windows += 1;
                continue;
            };
            match ctx.series.write_sample(&key, ts, value, plan.overwrite).await {
                Ok(outcome) => report.record(&outcome),
                Err(err) => return absorb_series_error(err, &key, report),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Job for VmUsageJob {
    fn name(&self) -> &'static str {
        "vm_usage"
    }

    async fn execute(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<JobReport> {
        let plan = self.plan(now)?;
        let pollster = Pollster::new(
            ctx.metering.clone(),
            ctx.config.metering.polling_period,
            ctx.config.collection.epoch,
        );
        let projects = self.options.scope.resolve(ctx.inventory.as_ref()).await?;

        let mut report = JobReport::default();
        for project in &projects {
            if ctx.cancel.is_cancelled() {
                break;
            }
            info!(project = %project.id, name = %project.name, "Checking VM usages");
            let tags = TagSet::single(&ctx.config.collection.project_tag_key, &project.id)?;

            self.collect_compute_usage(ctx, &plan, project, &tags, &mut report)
                .await?;
            for policy in CounterPolicy::ALL {
                self.collect_counter(ctx, &plan, &pollster, policy, project, &tags, &mut report)
                    .await?;
            }
        }

        report.cancelled = ctx.cancel.is_cancelled();
        if report.cancelled {
            warn!("VM usage collection interrupted");
        } else {
            info!("VM usages updated");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caos_common::unix_epoch;
    use chrono::Duration;

    #[test]
    fn test_plan_resets_inconsistent_range() {
        let now = unix_epoch() + Duration::days(10);
        let job = VmUsageJob::new(VmUsageOptions {
            start: Some(now + Duration::hours(1)),
            end: Some(now - Duration::hours(5)),
            ..Default::default()
        });
        let plan = job.plan(now).unwrap();
        assert_eq!(plan.start, now);
        assert_eq!(plan.end, now);
    }

    #[test]
    fn test_current_implies_overwrite() {
        let job = VmUsageJob::new(VmUsageOptions {
            current: true,
            ..Default::default()
        });
        let plan = job.plan(unix_epoch() + Duration::days(1)).unwrap();
        assert!(plan.overwrite);
        assert_eq!(plan.mode, GridMode::Current);
    }

    #[test]
    fn test_plan_rejects_unbounded_periods() {
        let now = unix_epoch() + Duration::days(1);
        for options in [
            VmUsageOptions { period: 0, ..Default::default() },
            VmUsageOptions { period: u64::MAX, ..Default::default() },
            VmUsageOptions { misfire: 1 << 50, ..Default::default() },
        ] {
            let err = VmUsageJob::new(options).plan(now).unwrap_err();
            assert!(matches!(err, CollectorError::InvalidConfiguration(_)));
        }
    }
}
