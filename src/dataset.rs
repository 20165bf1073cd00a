//! Supervised dataset construction with a chronological train/test split.
//!
//! Each row pairs a complete feature vector with the index value observed
//! `horizon_hours` after the vector's timestamp. Rows are split by time only:
//! every train timestamp precedes every test timestamp. Both sides are held
//! as a [`SplitTable`], a feature matrix with aligned targets.

use chrono::{DateTime, Duration, Utc};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{AqiForecastError, Result};
use crate::features::{FeatureSchema, FeatureVector};

/// Default number of usable rows required before training.
pub const DEFAULT_MIN_SAMPLES: usize = 100;

/// How rows are divided between training and evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitPolicy {
    /// Fraction of rows (rounded up) held out for testing.
    pub test_fraction: f64,
    /// Drop train rows whose target timestamp falls inside the test period.
    pub purge_target_overlap: bool,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            purge_target_overlap: true,
        }
    }
}

/// Dataset builder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Forecast horizon in hours.
    pub horizon_hours: u32,
    /// Minimum rows with a realizable target.
    pub min_samples: usize,
    pub split: SplitPolicy,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            horizon_hours: 24,
            min_samples: DEFAULT_MIN_SAMPLES,
            split: SplitPolicy::default(),
        }
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.horizon_hours == 0 {
            return Err(AqiForecastError::config_error(
                "horizon_hours must be positive",
            ));
        }
        let fraction = self.split.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(AqiForecastError::config_error(format!(
                "test_fraction must be in (0, 1), got {}",
                fraction
            )));
        }
        Ok(())
    }
}

/// Feature values plus the index observed at the forecast horizon.
#[derive(Debug, Clone, PartialEq)]
struct DatasetRow {
    timestamp: DateTime<Utc>,
    features: Vec<f64>,
    target: f64,
}

/// Row accounting for a built dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    /// Vectors with a realizable target, complete or not.
    pub usable_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    /// `test_rows / (train_rows + test_rows)`
    pub realized_test_ratio: f64,
    pub dropped_incomplete: usize,
    pub dropped_no_target: usize,
    pub purged: usize,
}

/// One side of the split: an `n x p` feature matrix with aligned targets and
/// timestamps, in time order.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitTable {
    timestamps: Vec<DateTime<Utc>>,
    features: Array2<f64>,
    targets: Array1<f64>,
}

impl SplitTable {
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        features: Array2<f64>,
        targets: Array1<f64>,
    ) -> Result<Self> {
        if features.nrows() != timestamps.len() || targets.len() != timestamps.len() {
            return Err(AqiForecastError::malformed_input(format!(
                "{} timestamps, {} feature rows and {} targets",
                timestamps.len(),
                features.nrows(),
                targets.len()
            )));
        }
        Ok(Self {
            timestamps,
            features,
            targets,
        })
    }

    fn from_rows(rows: Vec<DatasetRow>, width: usize) -> Result<Self> {
        let n = rows.len();
        let mut timestamps = Vec::with_capacity(n);
        let mut flat = Vec::with_capacity(n * width);
        let mut targets = Vec::with_capacity(n);
        for row in rows {
            timestamps.push(row.timestamp);
            flat.extend(row.features);
            targets.push(row.target);
        }
        let features = Array2::from_shape_vec((n, width), flat).map_err(|err| {
            AqiForecastError::malformed_input(format!("feature rows do not match the schema: {err}"))
        })?;
        Self::new(timestamps, features, Array1::from(targets))
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    pub fn targets(&self) -> ArrayView1<'_, f64> {
        self.targets.view()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied()
    }
}

/// Chronologically split training table.
#[derive(Debug, Clone)]
pub struct Dataset {
    feature_names: Vec<String>,
    horizon_hours: u32,
    train: SplitTable,
    test: SplitTable,
    summary: SplitSummary,
}

impl Dataset {
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn horizon_hours(&self) -> u32 {
        self.horizon_hours
    }

    pub fn train(&self) -> &SplitTable {
        &self.train
    }

    pub fn test(&self) -> &SplitTable {
        &self.test
    }

    pub fn summary(&self) -> SplitSummary {
        self.summary
    }

    /// Mean target over the held-out rows.
    pub fn mean_test_target(&self) -> Option<f64> {
        self.test.targets().mean()
    }
}

/// Builds [`Dataset`]s from derived feature vectors.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    config: DatasetConfig,
}

impl DatasetBuilder {
    pub fn new(config: DatasetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Attach targets, drop incomplete rows and split by time.
    ///
    /// `vectors` must be in timestamp order, as produced by
    /// [`crate::features::FeatureDeriver::derive`]. Targets are looked up
    /// among all vectors, so an incomplete vector can still supply the target
    /// of an earlier complete one.
    pub fn build(&self, vectors: &[FeatureVector], schema: &FeatureSchema) -> Result<Dataset> {
        if vectors.is_empty() {
            return Err(AqiForecastError::EmptyInput(
                "no feature vectors to build a dataset from".to_string(),
            ));
        }
        if let Some(pair) = vectors
            .windows(2)
            .find(|pair| pair[1].timestamp() <= pair[0].timestamp())
        {
            return Err(AqiForecastError::malformed_input(format!(
                "feature vectors out of order at {}",
                pair[1].timestamp()
            )));
        }

        let horizon = Duration::hours(self.config.horizon_hours as i64);
        let target_of = |timestamp: DateTime<Utc>| -> Option<f64> {
            let wanted = timestamp + horizon;
            vectors
                .binary_search_by(|vector| vector.timestamp().cmp(&wanted))
                .ok()
                .map(|pos| vectors[pos].index_value())
        };

        let mut usable_rows = 0;
        let mut dropped_incomplete = 0;
        let mut dropped_no_target = 0;
        let mut rows = Vec::new();
        for vector in vectors {
            let Some(target) = target_of(vector.timestamp()) else {
                dropped_no_target += 1;
                continue;
            };
            usable_rows += 1;
            if !vector.is_complete() {
                dropped_incomplete += 1;
                continue;
            }
            rows.push(DatasetRow {
                timestamp: vector.timestamp(),
                features: vector.values().to_vec(),
                target,
            });
        }

        if usable_rows < self.config.min_samples {
            return Err(AqiForecastError::insufficient_data(
                usable_rows,
                self.config.min_samples,
                "rows with a realizable target",
            ));
        }

        let total = rows.len();
        let test_rows = (total as f64 * self.config.split.test_fraction - 1e-9).ceil() as usize;
        let train_rows = total.saturating_sub(test_rows);
        if train_rows == 0 || test_rows == 0 {
            return Err(AqiForecastError::insufficient_data(
                total,
                2,
                "complete rows available for a train/test split",
            ));
        }

        let test = rows.split_off(train_rows);
        let mut train = rows;
        let mut purged = 0;
        if self.config.split.purge_target_overlap {
            let test_start = test[0].timestamp;
            let before = train.len();
            train.retain(|row| row.timestamp + horizon < test_start);
            purged = before - train.len();
            if purged > 0 {
                debug!(purged, "removed train rows whose target overlaps the test period");
            }
            if train.is_empty() {
                return Err(AqiForecastError::insufficient_data(
                    0,
                    1,
                    "train rows left after purging target overlap",
                ));
            }
        }

        let summary = SplitSummary {
            usable_rows,
            train_rows: train.len(),
            test_rows: test.len(),
            realized_test_ratio: test.len() as f64 / (train.len() + test.len()) as f64,
            dropped_incomplete,
            dropped_no_target,
            purged,
        };
        info!(
            train = summary.train_rows,
            test = summary.test_rows,
            incomplete = dropped_incomplete,
            no_target = dropped_no_target,
            "built chronological dataset"
        );

        Ok(Dataset {
            feature_names: schema.names().to_vec(),
            horizon_hours: self.config.horizon_hours,
            train: SplitTable::from_rows(train, schema.len())?,
            test: SplitTable::from_rows(test, schema.len())?,
            summary,
        })
    }
}
