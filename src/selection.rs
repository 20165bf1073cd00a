//! Held-out evaluation and winner selection.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::errors::{AqiForecastError, Result};
use crate::metrics::RegressionMetrics;
use crate::training::FittedModel;

/// Secondary criteria applied when test RMSEs are within tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreaker {
    HigherR2,
    /// Candidates without a CV estimate rank last.
    LowerCvVariance,
    LowerMae,
}

/// How candidates are ranked and when overfitting is reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    /// RMSEs closer than this count as tied.
    pub rmse_tolerance: f64,
    pub tie_breakers: Vec<TieBreaker>,
    /// Warn when `train_rmse < overfit_ratio * test_rmse`.
    pub overfit_ratio: f64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            rmse_tolerance: 1e-6,
            tie_breakers: vec![TieBreaker::HigherR2, TieBreaker::LowerCvVariance],
            overfit_ratio: 0.7,
        }
    }
}

impl SelectionPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(self.rmse_tolerance >= 0.0) {
            return Err(AqiForecastError::config_error(
                "rmse_tolerance must be non-negative",
            ));
        }
        if !(self.overfit_ratio > 0.0 && self.overfit_ratio <= 1.0) {
            return Err(AqiForecastError::config_error(format!(
                "overfit_ratio must be in (0, 1], got {}",
                self.overfit_ratio
            )));
        }
        Ok(())
    }

    /// `Less` when `a` ranks ahead of `b`.
    pub fn compare(&self, a: &CandidateMetrics, b: &CandidateMetrics) -> Ordering {
        if (a.test.rmse - b.test.rmse).abs() > self.rmse_tolerance {
            return a.test.rmse.total_cmp(&b.test.rmse);
        }
        for breaker in &self.tie_breakers {
            let ordering = match breaker {
                TieBreaker::HigherR2 => b.test.r2.total_cmp(&a.test.r2),
                TieBreaker::LowerMae => a.test.mae.total_cmp(&b.test.mae),
                TieBreaker::LowerCvVariance => {
                    let a_var = a.cv_variance.unwrap_or(f64::INFINITY);
                    let b_var = b.cv_variance.unwrap_or(f64::INFINITY);
                    a_var.total_cmp(&b_var)
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// One row of the audit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetrics {
    pub id: String,
    pub algorithm: String,
    pub train: RegressionMetrics,
    pub test: RegressionMetrics,
    pub cv_mean_rmse: Option<f64>,
    pub cv_variance: Option<f64>,
}

/// Train/test RMSE gap of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverfitSignal {
    pub id: String,
    pub train_rmse: f64,
    pub test_rmse: f64,
    /// `test_rmse - train_rmse`
    pub gap: f64,
    pub warning: bool,
}

/// Evaluation outcome: the winner, every candidate's metrics and the overfitting signals.
#[derive(Debug, Serialize)]
pub struct Selection {
    pub selected: FittedModel,
    /// Roster order, independent of fit completion order.
    pub table: Vec<CandidateMetrics>,
    pub overfitting: Vec<OverfitSignal>,
    /// Candidates dropped because their held-out predictions were unusable.
    #[serde(skip)]
    pub rejected: Vec<AqiForecastError>,
}

impl Selection {
    pub fn selected_metrics(&self) -> Option<&CandidateMetrics> {
        self.table.iter().find(|row| row.id == self.selected.id)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &OverfitSignal> {
        self.overfitting.iter().filter(|signal| signal.warning)
    }
}

/// Scores candidates on the test split and picks one.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    policy: SelectionPolicy,
}

impl ModelSelector {
    pub fn new(policy: SelectionPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    pub fn select(&self, candidates: Vec<FittedModel>, dataset: &Dataset) -> Result<Selection> {
        let x = dataset.test().features();
        let y = dataset.test().targets();
        let mut evaluated: Vec<(FittedModel, CandidateMetrics)> = Vec::new();
        let mut rejected = Vec::new();

        for model in candidates {
            let predictions = model.predict(x);
            let metrics = RegressionMetrics::compute(y, predictions.view())
                .filter(RegressionMetrics::is_finite);
            let Some(test) = metrics else {
                warn!(candidate = %model.id, "held-out metrics are not finite");
                rejected.push(AqiForecastError::training_failure(
                    model.id.clone(),
                    "non-finite held-out metrics",
                ));
                continue;
            };
            let row = CandidateMetrics {
                id: model.id.clone(),
                algorithm: model.algorithm.clone(),
                train: model.train_metrics,
                test,
                cv_mean_rmse: model.cross_validation.as_ref().map(|cv| cv.mean_rmse),
                cv_variance: model.cross_validation.as_ref().map(|cv| cv.variance),
            };
            evaluated.push((model.with_test_metrics(test), row));
        }

        let mut best: Option<usize> = None;
        for (pos, (_, row)) in evaluated.iter().enumerate() {
            let better = match best {
                None => true,
                Some(current) => self.policy.compare(row, &evaluated[current].1) == Ordering::Less,
            };
            if better {
                best = Some(pos);
            }
        }
        let Some(best) = best else {
            return Err(AqiForecastError::NoViableCandidate(format!(
                "{} candidates rejected on held-out rows",
                rejected.len()
            )));
        };

        let overfitting: Vec<OverfitSignal> = evaluated
            .iter()
            .map(|(_, row)| {
                let warning = row.train.rmse < self.policy.overfit_ratio * row.test.rmse;
                if warning {
                    warn!(
                        candidate = %row.id,
                        train_rmse = row.train.rmse,
                        test_rmse = row.test.rmse,
                        "possible overfitting"
                    );
                }
                OverfitSignal {
                    id: row.id.clone(),
                    train_rmse: row.train.rmse,
                    test_rmse: row.test.rmse,
                    gap: row.test.rmse - row.train.rmse,
                    warning,
                }
            })
            .collect();

        let table: Vec<CandidateMetrics> = evaluated.iter().map(|(_, row)| row.clone()).collect();
        let selected = evaluated.swap_remove(best).0;
        info!(
            selected = %selected.id,
            test_rmse = table[best].test.rmse,
            test_r2 = table[best].test.r2,
            "selected model"
        );

        Ok(Selection {
            selected,
            table,
            overfitting,
            rejected,
        })
    }
}
