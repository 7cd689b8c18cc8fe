//! Per-metric aggregation policies
//!
//! Each counter-derived metric is one variant. The variant decides which
//! counter to read, which field carries the value, how to narrow the query,
//! and how one resource's observations collapse into one window value.

use caos_common::types::metric::{VM_CPU_TIME_USAGE, VM_WALLCLOCK_TIME_USAGE};
use caos_common::{COUNTER_VOLUME, NANOS_PER_SECOND};

use crate::metering::{correct_monotonicity, integrate, interpolate, FieldFilter, Point};

/// Counter aggregation policy, selected per metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterPolicy {
    /// Cumulative CPU time in ns. Value: interpolated difference across the
    /// window after reset correction, in seconds.
    CpuTime,
    /// Instance membership weighted by vcpus. Value: vcpu-seconds the
    /// instance was active inside the window.
    WallClockTime,
}

impl CounterPolicy {
    pub const ALL: [CounterPolicy; 2] = [CounterPolicy::CpuTime, CounterPolicy::WallClockTime];

    /// Metric written to the series store
    pub fn metric_name(&self) -> &'static str {
        match self {
            CounterPolicy::CpuTime => VM_CPU_TIME_USAGE,
            CounterPolicy::WallClockTime => VM_WALLCLOCK_TIME_USAGE,
        }
    }

    /// Counter read from the metering store
    pub fn counter_name(&self) -> &'static str {
        match self {
            CounterPolicy::CpuTime => "cpu",
            CounterPolicy::WallClockTime => "instance",
        }
    }

    pub fn value_field(&self) -> &'static str {
        match self {
            CounterPolicy::CpuTime => COUNTER_VOLUME,
            CounterPolicy::WallClockTime => "resource_metadata.vcpus",
        }
    }

    /// Fields to fetch. Always includes identity, time and the value field.
    pub fn field_projection(&self) -> Vec<String> {
        let mut fields = vec![
            "resource_id".to_string(),
            "timestamp".to_string(),
            self.value_field().to_string(),
        ];
        if let CounterPolicy::WallClockTime = self {
            fields.push("resource_metadata.status".to_string());
        }
        fields
    }

    pub fn extra_query_filters(&self) -> Vec<FieldFilter> {
        match self {
            CounterPolicy::CpuTime => Vec::new(),
            // instance samples are mixed with audit notifications, which
            // carry `state` instead of `status`
            CounterPolicy::WallClockTime => {
                vec![FieldFilter::new("resource_metadata.status", "active")]
            }
        }
    }

    /// Collapse one resource's time-ordered points into a window value.
    ///
    /// `None` when fewer than two points are available: the resource may not
    /// exist yet, may be gone, or the metering data may be missing.
    pub fn aggregate(&self, points: Vec<Point>, window_start: f64, window_end: f64) -> Option<f64> {
        if points.len() < 2 {
            return None;
        }

        match self {
            CounterPolicy::CpuTime => {
                let corrected = correct_monotonicity(points);
                let v1 = interpolate(&corrected, window_start)?;
                let v2 = interpolate(&corrected, window_end)?;
                Some((v2 - v1) / NANOS_PER_SECOND)
            }
            CounterPolicy::WallClockTime => {
                let total = integrate(&points);
                let first = points.first()?.t;
                let last = points.last()?.t;
                let curve = [Point::new(first, 0.0), Point::new(last, total)];
                let v1 = interpolate(&curve, window_start)?;
                let v2 = interpolate(&curve, window_end)?;
                Some(v2 - v1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_point_yields_none() {
        for policy in CounterPolicy::ALL {
            assert_eq!(policy.aggregate(vec![Point::new(0.0, 1.0)], 0.0, 10.0), None);
        }
    }

    #[test]
    fn test_cpu_time_interpolated_difference() {
        // t0 < start < end < t1
        let points = vec![Point::new(0.0, 0.0), Point::new(4000.0, 4e12)];
        let value = CounterPolicy::CpuTime
            .aggregate(points, 1000.0, 3000.0)
            .unwrap();
        // slope 1e9 ns/s over 2000 s
        assert_eq!(value, 2000.0);
    }

    #[test]
    fn test_cpu_time_survives_reset() {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 100e9),
            Point::new(200.0, 0.0),
            Point::new(300.0, 100e9),
        ];
        let value = CounterPolicy::CpuTime.aggregate(points, 0.0, 300.0).unwrap();
        assert_eq!(value, 200.0);
    }

    #[test]
    fn test_wallclock_full_activity() {
        // 2 vcpus active for the full 3600 s window and beyond
        let points = vec![
            Point::new(-600.0, 2.0),
            Point::new(1800.0, 2.0),
            Point::new(4200.0, 2.0),
        ];
        let value = CounterPolicy::WallClockTime
            .aggregate(points, 0.0, 3600.0)
            .unwrap();
        assert!((value - 7200.0).abs() < 1e-9);
    }

    #[test]
    fn test_wallclock_filters_active_status() {
        let filters = CounterPolicy::WallClockTime.extra_query_filters();
        assert_eq!(filters[0].equals, "active");
        assert!(CounterPolicy::CpuTime.extra_query_filters().is_empty());
        assert!(CounterPolicy::WallClockTime
            .field_projection()
            .contains(&"resource_metadata.vcpus".to_string()));
    }
}
