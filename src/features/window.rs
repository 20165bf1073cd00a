//! Time-bounded lookups over an ordered observation history.
//!
//! Every function here receives the history up to and including the current
//! observation and never looks past `end`, so callers cannot leak future
//! values into a feature by construction.

use crate::data::Observation;
use chrono::{DateTime, Duration, Utc};

/// Summary statistics of the index over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator), 0 for a single sample
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Samples a fully populated `window_hours` window holds at hourly cadence.
pub fn expected_samples(window_hours: u32) -> usize {
    window_hours as usize
}

/// Samples required before a window counts as complete.
pub fn required_samples(window_hours: u32, min_fraction: f64) -> usize {
    ((expected_samples(window_hours) as f64 * min_fraction).ceil() as usize).max(1)
}

/// Index statistics over `(end - window_hours, end]`.
///
/// Returns `None` when fewer than [`required_samples`] observations fall
/// inside the window.
pub fn trailing_stats(
    history: &[Observation],
    end: DateTime<Utc>,
    window_hours: u32,
    min_fraction: f64,
) -> Option<WindowStats> {
    let start = end - Duration::hours(window_hours as i64);
    let lo = history.partition_point(|obs| obs.timestamp <= start);
    let hi = history.partition_point(|obs| obs.timestamp <= end);
    let window = &history[lo..hi.max(lo)];

    if window.len() < required_samples(window_hours, min_fraction) {
        return None;
    }

    let count = window.len();
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for obs in window {
        sum += obs.index_value;
        min = min.min(obs.index_value);
        max = max.max(obs.index_value);
    }
    let mean = sum / count as f64;
    let std = if count < 2 {
        0.0
    } else {
        let squared: f64 = window
            .iter()
            .map(|obs| {
                let diff = obs.index_value - mean;
                diff * diff
            })
            .sum();
        (squared / (count - 1) as f64).sqrt()
    };

    Some(WindowStats {
        mean,
        std,
        min,
        max,
        count,
    })
}

/// Index value recorded exactly `hours` before `end`.
pub fn lagged_value(history: &[Observation], end: DateTime<Utc>, hours: u32) -> Option<f64> {
    let target = end - Duration::hours(hours as i64);
    history
        .binary_search_by(|obs| obs.timestamp.cmp(&target))
        .ok()
        .map(|pos| history[pos].index_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn history(hours: &[i64]) -> Vec<Observation> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        hours
            .iter()
            .map(|&h| Observation {
                timestamp: base + Duration::hours(h),
                index_value: h as f64,
                pollutants: [0.0; 6],
                temperature: 0.0,
                humidity: 0.0,
                pressure: 0.0,
                wind_speed: 0.0,
                latitude: 0.0,
                longitude: 0.0,
            })
            .collect()
    }

    #[test]
    fn window_is_trailing_and_inclusive_of_end() {
        let obs = history(&[0, 1, 2, 3, 4, 5]);
        let end = obs[5].timestamp;
        let stats = trailing_stats(&obs, end, 3, 0.75).unwrap();

        assert_eq!(stats.count, 3);
        assert_eq!(stats.mean, 4.0);
        assert_eq!(stats.min, 3.0);
        assert_eq!(stats.max, 5.0);
        assert!((stats.std - 1.0).abs() < 1e-12);
    }

    #[test]
    fn gaps_shrink_sample_count_not_window_span() {
        // hours 2..=4 missing; a 6h window ending at 6 only sees 1, 5, 6
        let obs = history(&[0, 1, 5, 6]);
        let end = obs[3].timestamp;

        assert!(trailing_stats(&obs, end, 6, 0.75).is_none());
        let loose = trailing_stats(&obs, end, 6, 0.5).unwrap();
        assert_eq!(loose.count, 3);
    }

    #[test]
    fn required_samples_rounds_up() {
        assert_eq!(required_samples(3, 0.75), 3);
        assert_eq!(required_samples(6, 0.75), 5);
        assert_eq!(required_samples(24, 0.75), 18);
        assert_eq!(required_samples(1, 0.01), 1);
    }

    #[test]
    fn lag_requires_exact_timestamp() {
        let obs = history(&[0, 1, 3]);
        let end = obs[2].timestamp;

        assert_eq!(lagged_value(&obs, end, 2), Some(1.0));
        assert_eq!(lagged_value(&obs, end, 1), None);
        assert_eq!(lagged_value(&obs, end, 5), None);
    }
}
