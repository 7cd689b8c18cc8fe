//! Collection windows and timestamp formatting

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CollectorError, Result};

/// Wire format for timestamps sent to the series store
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// The fixed reference instant window boundaries are aligned to.
pub fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// `[start, end]` interval for which one sample is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Window of `period` seconds ending at `end`
    pub fn ending_at(end: DateTime<Utc>, period: u64) -> Self {
        Self {
            start: end
                .checked_sub_signed(seconds(period))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end,
        }
    }

    /// Both sides widened by `slack`, saturating at the representable range
    pub fn extended(&self, slack: Duration) -> Self {
        Self {
            start: self
                .start
                .checked_sub_signed(slack)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: self
                .end
                .checked_add_signed(slack)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

/// Longest period, grace time or schedule interval accepted, in seconds (1000 years)
pub const MAX_SPAN_SECS: u64 = 1_000 * 366 * 86_400;

/// Convert a second count into a chrono duration, saturating at `MAX_SPAN_SECS`
pub fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_SPAN_SECS) as i64)
}

/// Like [`seconds`] but rejects counts above `MAX_SPAN_SECS`
pub fn span(what: &str, secs: u64) -> Result<Duration> {
    if secs > MAX_SPAN_SECS {
        return Err(CollectorError::invalid_configuration(format!(
            "{what} of {secs}s exceeds the maximum of {MAX_SPAN_SECS}s"
        )));
    }
    Ok(seconds(secs))
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse an RFC 3339 timestamp, or a naive one which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(CollectorError::Serialization(format!(
        "invalid timestamp: {raw:?}"
    )))
}

/// Seconds since the epoch as a float, keeping sub-second precision
pub fn epoch_seconds(ts: &DateTime<Utc>, epoch: &DateTime<Utc>) -> f64 {
    let delta = *ts - *epoch;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}
