//! Numeric aggregation over irregular counter series
//!
//! Pure functions over `(t, v)` points where `t` is seconds since the
//! collection epoch:
//! - [`correct_monotonicity`]: compensate spurious counter decreases
//! - [`interpolate`]: linear interpolation, clamped at the boundaries
//! - [`integrate`]: trapezoidal integral over the whole span

use std::cmp::Ordering;

/// One observation reduced to time and value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Seconds since the epoch
    pub t: f64,
    pub v: f64,
}

impl Point {
    pub fn new(t: f64, v: f64) -> Self {
        Self { t, v }
    }
}

fn by_time(a: &Point, b: &Point) -> Ordering {
    a.t.total_cmp(&b.t)
}

fn is_ascending(points: &[Point]) -> bool {
    points.windows(2).all(|w| w[0].t <= w[1].t)
}

/// Remove counter resets from a time-ordered series.
///
/// Whenever a raw value drops below the previous raw value, the drop is added
/// to a running offset that applies to that point and every later one. The
/// output is non-decreasing and keeps every increment between resets.
/// Already non-decreasing input comes back unchanged.
pub fn correct_monotonicity(points: Vec<Point>) -> Vec<Point> {
    let mut points = points;
    let Some(first) = points.first() else {
        return points;
    };

    let mut previous = first.v;
    let mut delta = 0.0;
    for point in points.iter_mut().skip(1) {
        let raw = point.v;
        if raw < previous {
            tracing::debug!(t = point.t, raw, previous, "Correcting monotonicity");
            delta += (raw - previous).abs();
        }
        point.v = raw + delta;
        previous = raw;
    }
    points
}

/// Sort by time and drop later duplicates of the same timestamp. Points
/// with a non-finite time are dropped.
fn normalized(points: &[Point]) -> Vec<Point> {
    let mut sorted: Vec<Point> = points.iter().copied().filter(|p| p.t.is_finite()).collect();
    if !is_ascending(&sorted) {
        sorted.sort_by(by_time);
    }
    // sort_by is stable, so the first reported point for a timestamp wins
    sorted.dedup_by(|later, earlier| later.t == earlier.t);
    sorted
}

/// Linear interpolation of the series at `at`.
///
/// Outside the sampled range the nearest boundary value is returned; there is
/// no extrapolation. Input need not be sorted. `None` for an empty series
/// or a non-finite `at`.
pub fn interpolate(points: &[Point], at: f64) -> Option<f64> {
    if !at.is_finite() {
        return None;
    }
    let points = normalized(points);
    let first = points.first()?;
    let last = points.last()?;

    if at <= first.t {
        return Some(first.v);
    }
    if at >= last.t {
        return Some(last.v);
    }

    // first index with t > at; at least 1 and at most len - 1 here
    let idx = points.partition_point(|p| p.t <= at);
    let (left, right) = (points[idx - 1], points[idx]);
    if left.t == at {
        return Some(left.v);
    }
    let ratio = (at - left.t) / (right.t - left.t);
    Some(left.v + ratio * (right.v - left.v))
}

/// Trapezoidal integral over the full span of the series.
pub fn integrate(points: &[Point]) -> f64 {
    let mut sorted = points.to_vec();
    if !is_ascending(&sorted) {
        sorted.sort_by(by_time);
    }
    sorted
        .windows(2)
        .map(|w| (w[1].t - w[0].t) * (w[0].v + w[1].v) / 2.0)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(raw: &[(f64, f64)]) -> Vec<Point> {
        raw.iter().map(|&(t, v)| Point::new(t, v)).collect()
    }

    fn values(points: &[Point]) -> Vec<f64> {
        points.iter().map(|p| p.v).collect()
    }

    #[test]
    fn test_correct_single_reset() {
        let corrected = correct_monotonicity(points(&[(0.0, 100.0), (10.0, 40.0)]));
        assert_eq!(values(&corrected), vec![100.0, 100.0]);
    }

    #[test]
    fn test_correct_keeps_increments_after_reset() {
        let corrected = correct_monotonicity(points(&[
            (0.0, 10.0),
            (10.0, 20.0),
            (20.0, 5.0),
            (30.0, 15.0),
            (40.0, 3.0),
            (50.0, 4.0),
        ]));
        assert_eq!(values(&corrected), vec![10.0, 20.0, 20.0, 30.0, 30.0, 31.0]);
        assert!(corrected.windows(2).all(|w| w[0].v <= w[1].v));
    }

    #[test]
    fn test_correct_non_decreasing_is_unchanged() {
        let input = points(&[(0.0, 1.0), (1.0, 1.0), (2.0, 5.0), (3.0, 8.5)]);
        assert_eq!(correct_monotonicity(input.clone()), input);
    }

    #[test]
    fn test_correct_single_and_empty() {
        let single = points(&[(0.0, 42.0)]);
        assert_eq!(correct_monotonicity(single.clone()), single);
        assert!(correct_monotonicity(Vec::new()).is_empty());
    }

    #[test]
    fn test_interpolate_interior_is_linear_blend() {
        let series = points(&[(0.0, 0.0), (100.0, 50.0)]);
        assert_eq!(interpolate(&series, 25.0), Some(12.5));
        assert_eq!(interpolate(&series, 100.0), Some(50.0));
    }

    #[test]
    fn test_interpolate_clamps_outside_range() {
        let series = points(&[(10.0, 5.0), (20.0, 15.0)]);
        assert_eq!(interpolate(&series, 0.0), Some(5.0));
        assert_eq!(interpolate(&series, 1e9), Some(15.0));
    }

    #[test]
    fn test_interpolate_unsorted_with_duplicates() {
        let series = points(&[(20.0, 20.0), (10.0, 10.0), (10.0, 99.0), (0.0, 0.0)]);
        // (10, 10) is reported before (10, 99) and wins the tie
        assert_eq!(interpolate(&series, 10.0), Some(10.0));
        assert_eq!(interpolate(&series, 15.0), Some(15.0));
    }

    #[test]
    fn test_interpolate_empty() {
        assert_eq!(interpolate(&[], 1.0), None);
    }

    #[test]
    fn test_interpolate_non_finite_inputs() {
        let series = points(&[(0.0, 0.0), (100.0, 50.0)]);
        assert_eq!(interpolate(&series, f64::NAN), None);
        assert_eq!(interpolate(&series, f64::INFINITY), None);

        // points without a usable time are ignored
        let series = points(&[(-f64::NAN, 7.0), (0.0, 0.0), (100.0, 50.0), (f64::NAN, 9.0)]);
        assert_eq!(interpolate(&series, 50.0), Some(25.0));
        assert_eq!(interpolate(&points(&[(f64::NAN, 1.0)]), 0.0), None);
    }

    #[test]
    fn test_integrate_constant_indicator() {
        let series = points(&[(0.0, 1.0), (600.0, 1.0), (3600.0, 1.0)]);
        assert_eq!(integrate(&series), 3600.0);
    }

    #[test]
    fn test_integrate_ramp() {
        let series = points(&[(10.0, 10.0), (0.0, 0.0)]);
        assert_eq!(integrate(&series), 50.0);
        assert_eq!(integrate(&series[..1]), 0.0);
    }
}
