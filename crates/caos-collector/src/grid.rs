//! Time grid generation
//!
//! Window ends are instants `epoch + k * period`. The grid for a series is
//! every such instant after its checkpoint up to `now`, optionally clamped
//! by a misfire grace time so that unreachable history is abandoned rather
//! than backfilled.

use caos_common::types::window::span;
use caos_common::{format_timestamp, CollectorError, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

/// Which windows a grid covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridMode {
    /// Every complete window after the checkpoint
    #[default]
    Backfill,
    /// Only the upcoming window, pre-created in the future
    Current,
}

/// Inputs of one grid computation
#[derive(Debug, Clone, Copy)]
pub struct GridRequest {
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Seconds
    pub period: u64,
    pub now: DateTime<Utc>,
    /// Seconds, 0 disables
    pub misfire_grace: u64,
    pub epoch: DateTime<Utc>,
    pub mode: GridMode,
}

/// Ascending window ends to collect for one series.
///
/// An empty result means the series is up to date.
pub fn timeline(req: &GridRequest) -> Result<Vec<DateTime<Utc>>> {
    let period = checked_period(req.period)?;
    let grace = span("misfire grace time", req.misfire_grace)?;

    let (candidate, upper) = match req.mode {
        GridMode::Current => (req.now, shift(req.now, period)?),
        GridMode::Backfill => {
            let mut candidate = req.last_timestamp.unwrap_or(req.epoch);
            let enabled = req.misfire_grace > 0 && req.misfire_grace > req.period;
            if enabled && req.now - candidate > grace {
                let clamped = shift(req.now, -grace)?;
                info!(
                    misfire = req.misfire_grace,
                    dropped_from = %format_timestamp(&candidate),
                    resume_at = %format_timestamp(&clamped),
                    "Dropping history collection due to misfire grace time"
                );
                candidate = clamped;
            }
            (candidate, req.now)
        }
    };

    let grid = aligned_between(candidate, upper, period, req.epoch)?;
    if grid.is_empty() {
        debug!(period = req.period, "Series is up to date");
    }
    Ok(grid)
}

/// Window ends `t` with `start <= t <= end`.
pub fn range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    period: u64,
    epoch: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let period = checked_period(period)?;
    Ok(aligned_between(shift(start, -period)?, end, period, epoch)?
        .into_iter()
        .filter(|t| *t >= start)
        .collect())
}

fn checked_period(period: u64) -> Result<Duration> {
    if period == 0 {
        return Err(CollectorError::invalid_configuration(
            "period must be positive",
        ));
    }
    span("period", period)
}

fn shift(ts: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    ts.checked_add_signed(by).ok_or_else(|| {
        CollectorError::invalid_configuration(format!(
            "{} shifted by {}s leaves the supported time range",
            format_timestamp(&ts),
            by.num_seconds()
        ))
    })
}

/// Aligned instants `t` with `lower < t <= upper`
fn aligned_between(
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
    period: Duration,
    epoch: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let period_ms = period.num_milliseconds();
    let lower_ms = (lower - epoch).num_milliseconds();
    let upper_ms = (upper - epoch).num_milliseconds();

    let first = lower_ms.div_euclid(period_ms) + 1;
    let last = upper_ms.div_euclid(period_ms);

    (first..=last)
        .map(|k| {
            let offset = k.checked_mul(period_ms).map(Duration::milliseconds);
            offset
                .and_then(|d| epoch.checked_add_signed(d))
                .ok_or_else(|| {
                    CollectorError::invalid_configuration(format!(
                        "window {k} of {}s leaves the supported time range",
                        period.num_seconds()
                    ))
                })
        })
        .collect()
}
