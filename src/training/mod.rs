//! Candidate model fitting.
//!
//! Every algorithm in the roster implements [`Estimator`]: it consumes the
//! training rows and returns [`LearnedParameters`], a closed set of model
//! families that know how to predict, expose native importances and split a
//! prediction into per-feature contributions. Adding an algorithm means adding
//! a config type, an [`AlgorithmConfig`] variant and, if its fitted form is
//! new, a [`LearnedParameters`] variant.
//!
//! [`ModelTrainer`] fits all candidates on the same rows and feature order.
//! Fits run in parallel with rayon; results are collected in roster order.

pub mod cv;
pub mod ensemble;
pub mod linear;
pub mod tree;

use std::collections::HashSet;
use std::fmt;

use ndarray::{Array1, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::dataset::Dataset;
use crate::errors::{AqiForecastError, Result};
use crate::metrics::RegressionMetrics;
use self::cv::{CrossValidation, CvSummary};
use self::ensemble::{BoostedTrees, Forest, GradientBoostingConfig, RandomForestConfig};
use self::linear::{LassoConfig, LinearModel, RidgeConfig};

/// Capability shared by all trainable algorithms.
pub trait Estimator: fmt::Debug + Send + Sync {
    /// Stable algorithm identifier.
    fn algorithm(&self) -> &'static str;

    /// Check hyper-parameters before any fitting happens.
    fn validate(&self) -> Result<()>;

    /// Fit on the `n x p` matrix `x` and its `n` targets `y`.
    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LearnedParameters>;
}

/// Fitted parameters of one model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum LearnedParameters {
    Linear(LinearModel),
    Forest(Forest),
    Boosted(BoostedTrees),
}

impl LearnedParameters {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            LearnedParameters::Linear(model) => model.predict_row(row),
            LearnedParameters::Forest(forest) => forest.predict_row(row),
            LearnedParameters::Boosted(boosted) => boosted.predict_row(row),
        }
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        match self {
            LearnedParameters::Linear(model) => model.predict(x),
            _ => x.outer_iter().map(|row| self.predict_row(row)).collect(),
        }
    }

    /// Importance the model family reports without any attribution pass.
    pub fn native_importances(&self) -> Vec<f64> {
        match self {
            LearnedParameters::Linear(model) => model.importances(),
            LearnedParameters::Forest(forest) => forest.importances(),
            LearnedParameters::Boosted(boosted) => boosted.importances(),
        }
    }

    /// Bias and per-feature contributions that add up to the prediction.
    ///
    /// `None` when the decomposition is not finite for this row.
    pub fn contributions(&self, row: ArrayView1<f64>) -> Option<(f64, Vec<f64>)> {
        let (bias, values) = match self {
            LearnedParameters::Linear(model) => (model.intercept, model.contributions(row)),
            LearnedParameters::Forest(forest) => forest.contributions(row),
            LearnedParameters::Boosted(boosted) => boosted.contributions(row),
        };
        if bias.is_finite() && values.iter().all(|v| v.is_finite()) {
            Some((bias, values))
        } else {
            None
        }
    }

    /// Name of the attribution technique used by [`Self::contributions`].
    pub fn attribution_method(&self) -> &'static str {
        match self {
            LearnedParameters::Linear(_) => "linear_contribution",
            LearnedParameters::Forest(_) | LearnedParameters::Boosted(_) => "tree_path_contribution",
        }
    }

    /// Name of the importance reported by [`Self::native_importances`].
    pub fn native_method(&self) -> &'static str {
        match self {
            LearnedParameters::Linear(_) => "coefficient_magnitude",
            LearnedParameters::Forest(_) | LearnedParameters::Boosted(_) => "impurity_decrease",
        }
    }
}

/// Hyper-parameters of one roster entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    Ridge(RidgeConfig),
    Lasso(LassoConfig),
    RandomForest(RandomForestConfig),
    GradientBoosting(GradientBoostingConfig),
}

impl AlgorithmConfig {
    pub fn estimator(&self) -> &dyn Estimator {
        match self {
            AlgorithmConfig::Ridge(config) => config,
            AlgorithmConfig::Lasso(config) => config,
            AlgorithmConfig::RandomForest(config) => config,
            AlgorithmConfig::GradientBoosting(config) => config,
        }
    }

    pub fn algorithm(&self) -> &'static str {
        self.estimator().algorithm()
    }
}

/// Named roster entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub id: String,
    #[serde(flatten)]
    pub algorithm: AlgorithmConfig,
}

impl CandidateConfig {
    pub fn new(id: impl Into<String>, algorithm: AlgorithmConfig) -> Self {
        Self {
            id: id.into(),
            algorithm,
        }
    }
}

/// Ridge, lasso, random forest and gradient boosting with stock settings.
pub fn default_roster() -> Vec<CandidateConfig> {
    vec![
        CandidateConfig::new("ridge", AlgorithmConfig::Ridge(RidgeConfig::default())),
        CandidateConfig::new("lasso", AlgorithmConfig::Lasso(LassoConfig::default())),
        CandidateConfig::new(
            "random_forest",
            AlgorithmConfig::RandomForest(RandomForestConfig::default()),
        ),
        CandidateConfig::new(
            "gradient_boosting",
            AlgorithmConfig::GradientBoosting(GradientBoostingConfig::default()),
        ),
    ]
}

/// Roster and validation settings for [`ModelTrainer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub roster: Vec<CandidateConfig>,
    pub cross_validation: CrossValidation,
    /// Fit candidates on the rayon pool instead of one after another.
    pub parallel: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            roster: default_roster(),
            cross_validation: CrossValidation::default(),
            parallel: true,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.roster.is_empty() {
            return Err(AqiForecastError::config_error("algorithm roster is empty"));
        }
        let mut ids = HashSet::new();
        for candidate in &self.roster {
            if candidate.id.trim().is_empty() {
                return Err(AqiForecastError::config_error("candidate id is empty"));
            }
            if !ids.insert(candidate.id.as_str()) {
                return Err(AqiForecastError::config_error(format!(
                    "duplicate candidate id `{}`",
                    candidate.id
                )));
            }
            candidate.algorithm.estimator().validate()?;
        }
        Ok(())
    }
}

/// A trained candidate. Built once, never changed after evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub id: String,
    pub algorithm: String,
    pub parameters: LearnedParameters,
    pub feature_names: Vec<String>,
    pub train_metrics: RegressionMetrics,
    pub cross_validation: Option<CvSummary>,
    /// Metrics on the held-out rows, filled in by evaluation.
    pub test_metrics: Option<RegressionMetrics>,
}

impl FittedModel {
    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.parameters.predict(x)
    }

    /// Copy of the model carrying its held-out metrics.
    pub fn with_test_metrics(mut self, metrics: RegressionMetrics) -> Self {
        self.test_metrics = Some(metrics);
        self
    }
}

/// Fitted candidates plus the ones that failed, both in roster order.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub fitted: Vec<FittedModel>,
    pub failures: Vec<AqiForecastError>,
}

/// Fits every roster entry on the training split.
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: TrainerConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    #[instrument(level = "info", skip(self, dataset), fields(candidates = self.config.roster.len(), rows = dataset.train().len()))]
    pub fn train(&self, dataset: &Dataset) -> TrainingOutcome {
        let candidates: Vec<(&str, &dyn Estimator)> = self
            .config
            .roster
            .iter()
            .map(|candidate| (candidate.id.as_str(), candidate.algorithm.estimator()))
            .collect();
        self.fit_candidates(&candidates, dataset)
    }

    /// Fit named estimators on the training split, keeping their order.
    pub(crate) fn fit_candidates(
        &self,
        candidates: &[(&str, &dyn Estimator)],
        dataset: &Dataset,
    ) -> TrainingOutcome {
        let x = dataset.train().features();
        let y = dataset.train().targets();
        let fit = |&(id, estimator): &(&str, &dyn Estimator)| {
            self.fit_candidate(id, estimator, dataset, x, y)
        };
        let results: Vec<Result<FittedModel>> = if self.config.parallel {
            candidates.par_iter().map(fit).collect()
        } else {
            candidates.iter().map(fit).collect()
        };

        let mut fitted = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(model) => fitted.push(model),
                Err(err) => {
                    warn!(error = %err, "candidate excluded from selection");
                    failures.push(err);
                }
            }
        }
        info!(fitted = fitted.len(), failed = failures.len(), "training finished");
        TrainingOutcome { fitted, failures }
    }

    fn fit_candidate(
        &self,
        id: &str,
        estimator: &dyn Estimator,
        dataset: &Dataset,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<FittedModel> {
        let parameters = estimator.fit(x, y).map_err(|err| match err {
            AqiForecastError::TrainingFailure { reason, .. } => {
                AqiForecastError::training_failure(id, reason)
            }
            other => other,
        })?;

        let predictions = parameters.predict(x);
        let train_metrics = RegressionMetrics::compute(y, predictions.view())
            .filter(RegressionMetrics::is_finite)
            .ok_or_else(|| {
                AqiForecastError::training_failure(id, "non-finite predictions on the training rows")
            })?;
        let cross_validation = self.config.cross_validation.evaluate(estimator, x, y);
        if cross_validation.is_none() && self.config.cross_validation != CrossValidation::Disabled {
            warn!(candidate = %id, "cross-validation estimate unavailable");
        }
        info!(
            candidate = %id,
            algorithm = estimator.algorithm(),
            train_rmse = train_metrics.rmse,
            cv_rmse = cross_validation.as_ref().map(|cv| cv.mean_rmse),
            "fitted candidate"
        );

        Ok(FittedModel {
            id: id.to_string(),
            algorithm: estimator.algorithm().to_string(),
            parameters,
            feature_names: dataset.feature_names().to_vec(),
            train_metrics,
            cross_validation,
            test_metrics: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roster_has_four_families() {
        let roster = default_roster();
        let algorithms: Vec<&str> = roster.iter().map(|c| c.algorithm.algorithm()).collect();
        assert_eq!(
            algorithms,
            vec!["ridge", "lasso", "random_forest", "gradient_boosting"]
        );
        assert!(TrainerConfig::default().validate().is_ok());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let config = TrainerConfig {
            roster: vec![
                CandidateConfig::new("a", AlgorithmConfig::Ridge(RidgeConfig::default())),
                CandidateConfig::new("a", AlgorithmConfig::Lasso(LassoConfig::default())),
            ],
            ..TrainerConfig::default()
        };
        assert!(matches!(
            ModelTrainer::new(config),
            Err(AqiForecastError::Configuration(_))
        ));
    }

    #[test]
    fn roster_entries_parse_from_json() {
        let json = r#"[
            {"id": "ridge_strong", "algorithm": "ridge", "alpha": 10.0},
            {"id": "gbm", "algorithm": "gradient_boosting", "n_stages": 20}
        ]"#;
        let roster: Vec<CandidateConfig> = serde_json::from_str(json).unwrap();

        assert_eq!(
            roster[0].algorithm,
            AlgorithmConfig::Ridge(RidgeConfig { alpha: 10.0 })
        );
        match &roster[1].algorithm {
            AlgorithmConfig::GradientBoosting(config) => {
                assert_eq!(config.n_stages, 20);
                assert_eq!(config.learning_rate, 0.1);
            }
            other => panic!("unexpected algorithm {other:?}"),
        }
    }
}
