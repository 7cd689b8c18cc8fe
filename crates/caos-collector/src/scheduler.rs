//! Sequential job scheduler
//!
//! One worker, one job at a time. Each schedule fires at
//! `epoch + offset + k * interval`; fire times missed while another job was
//! running are coalesced into a single run. A failed run is simply retried
//! at its next fire time.

use std::time::Duration as StdDuration;

use caos_common::types::window::{seconds, span};
use caos_common::{format_timestamp, AbortScope, CollectorError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::jobs::{run_job, JobContext, JobSpec};

/// One scheduled job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(flatten)]
    pub job: JobSpec,
    /// Seconds between runs
    pub interval: u64,
    /// Seconds after each aligned interval boundary
    #[serde(default)]
    pub offset: u64,
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(CollectorError::invalid_configuration(
                "schedule interval must be positive",
            ));
        }
        span("schedule interval", self.interval)?;
        span("schedule offset", self.offset)?;
        Ok(())
    }

    /// First fire time strictly after `after`
    pub fn next_fire_after(&self, after: DateTime<Utc>, epoch: DateTime<Utc>) -> DateTime<Utc> {
        let interval = seconds(self.interval.max(1)).num_seconds();
        let base = epoch
            .checked_add_signed(seconds(self.offset % self.interval.max(1)))
            .unwrap_or(epoch);
        let k = (after - base).num_seconds().div_euclid(interval) + 1;
        k.checked_mul(interval)
            .and_then(Duration::try_seconds)
            .and_then(|d| base.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

pub struct Scheduler {
    ctx: JobContext,
    schedules: Vec<ScheduleConfig>,
}

impl Scheduler {
    pub fn new(ctx: JobContext, schedules: Vec<ScheduleConfig>) -> Self {
        Self { ctx, schedules }
    }

    /// Run until the context's cancellation token fires. Returns the number
    /// of job runs.
    pub async fn run(&self) -> usize {
        let epoch = self.ctx.config.collection.epoch;
        if self.schedules.is_empty() {
            warn!("No schedules configured");
            return 0;
        }

        let mut next: Vec<DateTime<Utc>> = self
            .schedules
            .iter()
            .map(|s| s.next_fire_after(Utc::now(), epoch))
            .collect();
        let mut runs = 0;

        loop {
            let Some((idx, due)) = next.iter().copied().enumerate().min_by_key(|(_, t)| *t) else {
                return runs;
            };
            let schedule = &self.schedules[idx];
            info!(
                job = ?schedule.job,
                at = %format_timestamp(&due),
                "Next job scheduled"
            );

            let wait = (due - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    info!("Scheduler stopped");
                    return runs;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let job = schedule.job.build();
            let started = Utc::now();
            match run_job(job.as_ref(), &self.ctx, started).await {
                Ok(_) => {}
                Err(err) => match err.abort_scope() {
                    AbortScope::Tick => warn!(
                        job = job.name(),
                        error = %err,
                        "Job aborted, retrying at next tick"
                    ),
                    _ => error!(job = job.name(), error = %err, "Job failed"),
                },
            }
            runs += 1;

            if self.ctx.cancel.is_cancelled() {
                info!("Scheduler stopped");
                return runs;
            }
            // missed fire times collapse into the next one
            next[idx] = schedule.next_fire_after(Utc::now(), epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::DomainScope;
    use caos_common::unix_epoch;

    fn schedule(interval: u64, offset: u64) -> ScheduleConfig {
        ScheduleConfig {
            job: JobSpec::ProjectsMetadata(DomainScope::default()),
            interval,
            offset,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        unix_epoch() + Duration::seconds(secs)
    }

    #[test]
    fn test_next_fire_is_aligned_and_strictly_after() {
        let s = schedule(3600, 0);
        assert_eq!(s.next_fire_after(at(0), unix_epoch()), at(3600));
        assert_eq!(s.next_fire_after(at(3599), unix_epoch()), at(3600));
        assert_eq!(s.next_fire_after(at(3600), unix_epoch()), at(7200));
    }

    #[test]
    fn test_next_fire_with_offset() {
        let s = schedule(3600, 300);
        assert_eq!(s.next_fire_after(at(0), unix_epoch()), at(300));
        assert_eq!(s.next_fire_after(at(400), unix_epoch()), at(3900));
    }

    #[test]
    fn test_missed_fires_coalesce() {
        // a run that overran three intervals schedules only the next one
        let s = schedule(600, 0);
        assert_eq!(s.next_fire_after(at(2000), unix_epoch()), at(2400));
    }

    #[test]
    fn test_invalid_intervals_rejected() {
        assert!(schedule(0, 0).validate().is_err());
        assert!(schedule(60, 0).validate().is_ok());
        assert!(schedule(1 << 50, 0).validate().is_err());
        assert!(schedule(60, u64::MAX).validate().is_err());
    }

    #[test]
    fn test_schedule_from_config_tag() {
        let raw = serde_json::json!({
            "job": "vm_usage",
            "interval": 3600,
            "offset": 600,
            "period": 3600,
            "misfire": 7200,
        });
        let s: ScheduleConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(s.interval, 3600);
        assert_eq!(s.offset, 600);
        assert!(matches!(s.job, JobSpec::VmUsage(ref o) if o.misfire == 7200));
    }

    #[test]
    fn test_next_fire_saturates_at_end_of_time() {
        let s = schedule(3600, 0);
        let last = DateTime::<Utc>::MAX_UTC - Duration::seconds(10);
        assert_eq!(s.next_fire_after(last, unix_epoch()), DateTime::<Utc>::MAX_UTC);
    }
}
