//! Global feature-importance ranking for the selected model.
//!
//! Attribution decomposes each sampled prediction into per-feature
//! contributions (coefficient times standardized value for linear models,
//! decision-path deltas for tree ensembles) and ranks features by mean
//! absolute contribution. When attribution cannot be computed the ranking
//! falls back to the model's native importances and is marked degraded.

use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dataset::SplitTable;
use crate::errors::{AqiForecastError, Result};
use crate::training::FittedModel;

/// Which importance source to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMode {
    /// Per-row attribution, native importances on failure.
    Auto,
    NativeOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    /// Maximum number of test rows attributed.
    pub sample_size: usize,
    pub seed: u64,
    pub mode: AttributionMode,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            sample_size: 100,
            seed: 42,
            mode: AttributionMode::Auto,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub score: f64,
}

/// Read-only ranking handed to reporting consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportanceReport {
    pub candidate_id: String,
    pub algorithm: String,
    pub method: String,
    /// Highest score first; equal scores keep feature order.
    pub ranking: Vec<FeatureImportance>,
    /// Rows attributed; 0 when native importances were used.
    pub sample_size: usize,
    pub degraded: bool,
    pub fallback_reason: Option<String>,
}

impl FeatureImportanceReport {
    pub fn top(&self, limit: usize) -> &[FeatureImportance] {
        &self.ranking[..limit.min(self.ranking.len())]
    }
}

/// Computes feature-importance reports.
#[derive(Debug, Clone, Default)]
pub struct Explainer {
    config: ExplainConfig,
}

impl Explainer {
    pub fn new(config: ExplainConfig) -> Self {
        Self { config }
    }

    /// Rank features for `model` over a sample of `rows`. Never fails.
    pub fn explain(&self, model: &FittedModel, rows: &SplitTable) -> FeatureImportanceReport {
        let attributed = match self.config.mode {
            AttributionMode::NativeOnly => Err(AqiForecastError::attribution_unavailable(
                model.id.clone(),
                "attribution disabled by configuration",
            )),
            AttributionMode::Auto => self.attribute(model, rows),
        };

        match attributed {
            Ok((scores, sample_size)) => FeatureImportanceReport {
                candidate_id: model.id.clone(),
                algorithm: model.algorithm.clone(),
                method: model.parameters.attribution_method().to_string(),
                ranking: rank(&model.feature_names, &scores),
                sample_size,
                degraded: false,
                fallback_reason: None,
            },
            Err(err) => {
                if self.config.mode == AttributionMode::Auto {
                    warn!(candidate = %model.id, error = %err, "falling back to native importances");
                }
                let native = model.parameters.native_importances();
                let ranking = if native.len() == model.feature_names.len() {
                    rank(&model.feature_names, &native)
                } else {
                    Vec::new()
                };
                FeatureImportanceReport {
                    candidate_id: model.id.clone(),
                    algorithm: model.algorithm.clone(),
                    method: model.parameters.native_method().to_string(),
                    ranking,
                    sample_size: 0,
                    degraded: true,
                    fallback_reason: Some(err.to_string()),
                }
            }
        }
    }

    /// Mean absolute contribution per feature over the sampled rows.
    pub fn attribute(&self, model: &FittedModel, rows: &SplitTable) -> Result<(Vec<f64>, usize)> {
        if rows.is_empty() || self.config.sample_size == 0 {
            return Err(AqiForecastError::attribution_unavailable(
                model.id.clone(),
                "no rows to attribute",
            ));
        }
        let n_features = model.feature_names.len();
        if rows.features().ncols() != n_features {
            return Err(AqiForecastError::attribution_unavailable(
                model.id.clone(),
                format!(
                    "{} feature columns for {} features",
                    rows.features().ncols(),
                    n_features
                ),
            ));
        }
        let picked = self.sample_rows(rows.len());
        let mut totals = vec![0.0; n_features];

        for &pos in &picked {
            let (_, contributions) = model
                .parameters
                .contributions(rows.features().row(pos))
                .ok_or_else(|| {
                    AqiForecastError::attribution_unavailable(
                        model.id.clone(),
                        format!("non-finite contributions for row at {}", rows.timestamps()[pos]),
                    )
                })?;
            if contributions.len() != n_features {
                return Err(AqiForecastError::attribution_unavailable(
                    model.id.clone(),
                    format!(
                        "{} contributions for {} features",
                        contributions.len(),
                        n_features
                    ),
                ));
            }
            for (total, value) in totals.iter_mut().zip(contributions) {
                *total += value.abs();
            }
        }

        let count = picked.len() as f64;
        debug!(candidate = %model.id, rows = picked.len(), "computed attributions");
        Ok((totals.into_iter().map(|t| t / count).collect(), picked.len()))
    }

    /// Sorted positions of the rows to attribute, seeded for repeatability.
    fn sample_rows(&self, available: usize) -> Vec<usize> {
        if available <= self.config.sample_size {
            return (0..available).collect();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut picked = sample(&mut rng, available, self.config.sample_size).into_vec();
        picked.sort_unstable();
        picked
    }
}

fn rank(names: &[String], scores: &[f64]) -> Vec<FeatureImportance> {
    let mut ranking: Vec<FeatureImportance> = names
        .iter()
        .zip(scores.iter())
        .map(|(feature, score)| FeatureImportance {
            feature: feature.clone(),
            score: *score,
        })
        .collect();
    ranking.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranking
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RegressionMetrics;
    use crate::training::linear::{LinearModel, Standardizer};
    use crate::training::LearnedParameters;
    use chrono::{Duration, TimeZone, Utc};
    use ndarray::{array, Array1, Array2};

    fn rows(n: usize) -> SplitTable {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let timestamps = (0..n).map(|i| base + Duration::hours(i as i64)).collect();
        let features = Array2::from_shape_fn((n, 3), |(i, j)| match j {
            0 => i as f64,
            1 => (i % 2) as f64,
            _ => 1.0,
        });
        let targets = Array1::from_shape_fn(n, |i| i as f64);
        SplitTable::new(timestamps, features, targets).unwrap()
    }

    fn model() -> FittedModel {
        let data = rows(10);
        let metrics = RegressionMetrics {
            rmse: 0.0,
            mae: 0.0,
            r2: 1.0,
        };
        FittedModel {
            id: "ridge".to_string(),
            algorithm: "ridge".to_string(),
            parameters: LearnedParameters::Linear(LinearModel {
                standardizer: Standardizer::fit(data.features()),
                coefficients: array![3.0, -0.5, 0.0],
                intercept: 4.5,
            }),
            feature_names: vec!["a".into(), "b".into(), "c".into()],
            train_metrics: metrics,
            cross_validation: None,
            test_metrics: Some(metrics),
        }
    }

    #[test]
    fn ranks_by_mean_absolute_contribution() {
        let report = Explainer::default().explain(&model(), &rows(10));

        assert!(!report.degraded);
        assert_eq!(report.method, "linear_contribution");
        assert_eq!(report.sample_size, 10);
        let order: Vec<&str> = report.ranking.iter().map(|r| r.feature.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(report.ranking[2].score, 0.0);
    }

    #[test]
    fn empty_rows_fall_back_to_native() {
        let report = Explainer::default().explain(&model(), &rows(0));

        assert!(report.degraded);
        assert_eq!(report.method, "coefficient_magnitude");
        assert_eq!(report.ranking[0].feature, "a");
        assert_eq!(report.ranking[0].score, 3.0);
        assert!(report.fallback_reason.is_some());
    }

    #[test]
    fn sampling_is_bounded_and_seeded() {
        let explainer = Explainer::new(ExplainConfig {
            sample_size: 5,
            ..ExplainConfig::default()
        });
        let first = explainer.sample_rows(50);
        let second = explainer.sample_rows(50);

        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
        assert!(first.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn native_only_mode() {
        let explainer = Explainer::new(ExplainConfig {
            mode: AttributionMode::NativeOnly,
            ..ExplainConfig::default()
        });
        let report = explainer.explain(&model(), &rows(10));
        assert!(report.degraded);
        assert_eq!(report.top(1)[0].feature, "a");
    }
}
