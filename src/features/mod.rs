//! Feature derivation for the index forecasting pipeline.
//!
//! The module turns an [`ObservationSeries`] into one [`FeatureVector`] per
//! observation. All vectors share a [`FeatureSchema`] that fixes the name and
//! position of every field, so the vectors form a fixed-width table that the
//! dataset builder and the models can consume without further lookups.
//!
//! Fields are grouped as follows:
//!
//! - raw readings of the current observation,
//! - calendar fields and their cyclical encodings ([`time`]),
//! - lags of the index at fixed hour offsets,
//! - trailing rolling statistics measured in wall-clock hours ([`window`]),
//! - change fields (first difference, rate per elapsed hour, fixed horizons),
//! - pollutant and weather interactions.
//!
//! Every lagged or windowed field is computed from observations at or before
//! the vector's own timestamp. When the history needed for a field is missing
//! the field is set to NaN and listed in [`FeatureVector::missing`]; such a
//! vector is incomplete and the dataset builder excludes it.
//!
//! [`FeatureDeriver::derive`] is lazy and restartable: each call returns a
//! fresh iterator over the same series and yields bit-identical vectors.

pub mod time;
pub mod window;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{Observation, ObservationSeries, Pollutant};
use crate::errors::{AqiForecastError, Result};
use self::time::{TimeFeatures, TIME_FEATURE_NAMES};
use self::window::{lagged_value, trailing_stats};

/// Name of the current index value field, always the first column.
pub const INDEX_FIELD: &str = "index_value";

const RATIO_EPSILON: f64 = 1e-6;

/// Configuration of the derived feature set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Offsets (hours) for lag fields.
    pub lag_hours: Vec<u32>,
    /// Trailing window lengths (hours) for rolling statistics.
    pub window_hours: Vec<u32>,
    /// Horizons (hours) for fixed-horizon differences.
    pub change_horizons: Vec<u32>,
    /// Fraction of expected samples a window needs to be complete.
    pub min_window_fraction: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lag_hours: vec![1, 3, 6, 12, 24],
            window_hours: vec![3, 6, 12, 24],
            change_horizons: vec![3, 24],
            min_window_fraction: 0.75,
        }
    }
}

impl FeatureConfig {
    /// Validate offsets and the completeness threshold.
    pub fn validate(&self) -> Result<()> {
        for (label, hours) in [
            ("lag_hours", &self.lag_hours),
            ("window_hours", &self.window_hours),
            ("change_horizons", &self.change_horizons),
        ] {
            if hours.iter().any(|&h| h == 0) {
                return Err(AqiForecastError::config_error(format!(
                    "{} must be positive",
                    label
                )));
            }
            let mut sorted = hours.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != hours.len() {
                return Err(AqiForecastError::config_error(format!(
                    "{} contains duplicates",
                    label
                )));
            }
        }
        if !(self.min_window_fraction > 0.0 && self.min_window_fraction <= 1.0) {
            return Err(AqiForecastError::config_error(format!(
                "min_window_fraction must be in (0, 1], got {}",
                self.min_window_fraction
            )));
        }
        Ok(())
    }
}

/// Ordered field names shared by every vector of a derivation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    /// Build the schema implied by a feature configuration.
    pub fn from_config(config: &FeatureConfig) -> Self {
        let mut names = vec![INDEX_FIELD.to_string()];
        names.extend(Pollutant::ALL.iter().map(|p| p.column().to_string()));
        names.extend(
            ["temperature", "humidity", "pressure", "wind_speed"]
                .iter()
                .map(|name| name.to_string()),
        );
        names.extend(TIME_FEATURE_NAMES.iter().map(|name| name.to_string()));
        for lag in &config.lag_hours {
            names.push(format!("index_lag_{}h", lag));
        }
        for window in &config.window_hours {
            for stat in ["mean", "std", "min", "max"] {
                names.push(format!("index_rolling_{}_{}h", stat, window));
            }
        }
        names.push("index_change".to_string());
        names.push("index_change_rate".to_string());
        for horizon in &config.change_horizons {
            names.push(format!("index_change_{}h", horizon));
        }
        names.push("pm25_pm10_ratio".to_string());
        names.push("temp_humidity_interaction".to_string());
        Self { names }
    }

    /// Field names in column order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Column position of a field.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }
}

/// Fixed-width feature vector for one timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureVector {
    timestamp: DateTime<Utc>,
    values: Vec<f64>,
    missing: Vec<usize>,
}

impl FeatureVector {
    /// Timestamp the vector describes.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Field values in schema order; missing fields are NaN.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value at a schema position.
    pub fn get(&self, position: usize) -> Option<f64> {
        self.values.get(position).copied()
    }

    /// Current index value (never missing).
    pub fn index_value(&self) -> f64 {
        self.values[0]
    }

    /// Schema positions of fields lacking the history they need.
    pub fn missing(&self) -> &[usize] {
        &self.missing
    }

    /// Whether all lag, window and change fields are populated.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Names of the missing fields.
    pub fn missing_fields<'s>(&self, schema: &'s FeatureSchema) -> Vec<&'s str> {
        self.missing
            .iter()
            .filter_map(|&pos| schema.names().get(pos).map(String::as_str))
            .collect()
    }

    /// `InsufficientHistory` describing why the vector is incomplete.
    pub fn history_error(&self, schema: &FeatureSchema) -> Option<AqiForecastError> {
        if self.is_complete() {
            return None;
        }
        Some(AqiForecastError::InsufficientHistory {
            timestamp: self.timestamp,
            missing: self
                .missing_fields(schema)
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    /// Plain name → value record for external sinks. Missing fields map to `None`.
    pub fn to_record(&self, schema: &FeatureSchema) -> FeatureRecord {
        let fields = schema
            .names()
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| {
                let value = if value.is_finite() { Some(*value) } else { None };
                (name.clone(), value)
            })
            .collect();
        FeatureRecord {
            timestamp: self.timestamp,
            complete: self.is_complete(),
            fields,
        }
    }
}

/// Storage-agnostic representation of a feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub timestamp: DateTime<Utc>,
    pub complete: bool,
    pub fields: BTreeMap<String, Option<f64>>,
}

#[derive(Default)]
struct VectorBuilder {
    values: Vec<f64>,
    missing: Vec<usize>,
}

impl VectorBuilder {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            missing: Vec::new(),
        }
    }

    fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    fn push_optional(&mut self, value: Option<f64>) {
        match value {
            Some(v) => self.values.push(v),
            None => {
                self.missing.push(self.values.len());
                self.values.push(f64::NAN);
            }
        }
    }
}

/// Converts an observation series into feature vectors.
#[derive(Debug, Clone)]
pub struct FeatureDeriver {
    config: FeatureConfig,
    schema: FeatureSchema,
}

impl FeatureDeriver {
    /// Create a deriver for a validated configuration.
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        let schema = FeatureSchema::from_config(&config);
        Ok(Self { config, schema })
    }

    /// Configuration used by the deriver.
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Schema of the vectors produced by the deriver.
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Lazily derive one vector per observation, in timestamp order.
    pub fn derive<'a>(&'a self, series: &'a ObservationSeries) -> FeatureIter<'a> {
        FeatureIter {
            deriver: self,
            observations: series.as_slice(),
            position: 0,
        }
    }

    /// Derive the vector for the last observation of `history`.
    ///
    /// `history` must be timestamp ordered; nothing after its last element is
    /// ever consulted.
    pub fn derive_at(&self, history: &[Observation]) -> Option<FeatureVector> {
        let current = history.last()?;
        let t = current.timestamp;
        let mut builder = VectorBuilder::with_capacity(self.schema.len());

        builder.push(current.index_value);
        for pollutant in Pollutant::ALL {
            builder.push(current.pollutant(pollutant));
        }
        builder.push(current.temperature);
        builder.push(current.humidity);
        builder.push(current.pressure);
        builder.push(current.wind_speed);

        for value in TimeFeatures::from_timestamp(t).values() {
            builder.push(value);
        }

        for &lag in &self.config.lag_hours {
            builder.push_optional(lagged_value(history, t, lag));
        }

        for &hours in &self.config.window_hours {
            match trailing_stats(history, t, hours, self.config.min_window_fraction) {
                Some(stats) => {
                    builder.push(stats.mean);
                    builder.push(stats.std);
                    builder.push(stats.min);
                    builder.push(stats.max);
                }
                None => {
                    for _ in 0..4 {
                        builder.push_optional(None);
                    }
                }
            }
        }

        let previous = history.len().checked_sub(2).map(|pos| &history[pos]);
        match previous {
            Some(prev) => {
                let elapsed_hours = (t - prev.timestamp).num_seconds() as f64 / 3600.0;
                let change = current.index_value - prev.index_value;
                let rate = change / prev.index_value.abs().max(RATIO_EPSILON) / elapsed_hours;
                builder.push(change);
                builder.push(rate);
            }
            None => {
                builder.push_optional(None);
                builder.push_optional(None);
            }
        }
        for &horizon in &self.config.change_horizons {
            builder.push_optional(
                lagged_value(history, t, horizon).map(|past| current.index_value - past),
            );
        }

        builder.push(
            current.pollutant(Pollutant::Pm25) / (current.pollutant(Pollutant::Pm10) + RATIO_EPSILON),
        );
        builder.push(current.temperature * current.humidity);

        Some(FeatureVector {
            timestamp: t,
            values: builder.values,
            missing: builder.missing,
        })
    }
}

/// Lazy iterator produced by [`FeatureDeriver::derive`].
pub struct FeatureIter<'a> {
    deriver: &'a FeatureDeriver,
    observations: &'a [Observation],
    position: usize,
}

impl<'a> Iterator for FeatureIter<'a> {
    type Item = FeatureVector;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.observations.len() {
            return None;
        }
        let history = &self.observations[..=self.position];
        self.position += 1;
        self.deriver.derive_at(history)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.observations.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for FeatureIter<'a> {}

/// Completeness counts for a derived sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub total: usize,
    pub complete: usize,
    pub incomplete: usize,
}

impl FeatureSummary {
    /// Count complete and incomplete vectors.
    pub fn from_vectors(vectors: &[FeatureVector]) -> Self {
        let complete = vectors.iter().filter(|v| v.is_complete()).count();
        Self {
            total: vectors.len(),
            complete,
            incomplete: vectors.len() - complete,
        }
    }
}
