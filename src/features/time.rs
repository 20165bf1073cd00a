//! Calendar features derived from a single timestamp.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::PI;

/// Hours treated as commuting peaks.
pub const RUSH_HOURS: [u32; 6] = [7, 8, 9, 17, 18, 19];

/// Feature names in the order produced by [`TimeFeatures::values`].
pub const TIME_FEATURE_NAMES: [&str; 12] = [
    "hour",
    "day_of_week",
    "day_of_month",
    "month",
    "year",
    "is_weekend",
    "is_rush_hour",
    "season",
    "hour_sin",
    "hour_cos",
    "month_sin",
    "month_cos",
];

/// Calendar decomposition of a timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeFeatures {
    pub hour: u32,
    /// Monday = 0
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub month: u32,
    pub year: i32,
    pub is_weekend: bool,
    pub is_rush_hour: bool,
    pub season: u8,
    pub hour_sin: f64,
    pub hour_cos: f64,
    pub month_sin: f64,
    pub month_cos: f64,
}

impl TimeFeatures {
    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        let hour = timestamp.hour();
        let month = timestamp.month();
        let day_of_week = timestamp.weekday().num_days_from_monday();
        let (hour_sin, hour_cos) = cyclical(hour as f64, 24.0);
        let (month_sin, month_cos) = cyclical(month as f64, 12.0);

        Self {
            hour,
            day_of_week,
            day_of_month: timestamp.day(),
            month,
            year: timestamp.year(),
            is_weekend: day_of_week >= 5,
            is_rush_hour: RUSH_HOURS.contains(&hour),
            season: season(month),
            hour_sin,
            hour_cos,
            month_sin,
            month_cos,
        }
    }

    /// Numeric encoding, ordered like [`TIME_FEATURE_NAMES`].
    pub fn values(&self) -> [f64; 12] {
        [
            self.hour as f64,
            self.day_of_week as f64,
            self.day_of_month as f64,
            self.month as f64,
            self.year as f64,
            flag(self.is_weekend),
            flag(self.is_rush_hour),
            self.season as f64,
            self.hour_sin,
            self.hour_cos,
            self.month_sin,
            self.month_cos,
        ]
    }
}

/// Meteorological season for the northern hemisphere: 0 winter, 1 spring, 2 summer, 3 autumn.
pub fn season(month: u32) -> u8 {
    match month {
        12 | 1 | 2 => 0,
        3..=5 => 1,
        6..=8 => 2,
        _ => 3,
    }
}

/// Sine/cosine encoding of a periodic value.
pub fn cyclical(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.sin(), angle.cos())
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
