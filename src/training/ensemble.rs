//! Tree ensembles: bagged random forests and least-squares gradient boosting.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::linear::check_shape;
use super::tree::{normalize, RegressionTree, TreeParams};
use super::{Estimator, LearnedParameters};
use crate::errors::{AqiForecastError, Result};

/// Bagged ensemble of regression trees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestConfig {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: Some(15),
            min_samples_split: 5,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl RandomForestConfig {
    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }
}

/// Trees fitted on bootstrap samples; predictions are averaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    pub trees: Vec<RegressionTree>,
}

impl Forest {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|tree| tree.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    /// Averaged root value and per-feature path contributions.
    pub fn contributions(&self, row: ArrayView1<f64>) -> (f64, Vec<f64>) {
        let n_features = self.trees.first().map_or(0, |tree| tree.n_features());
        let mut totals = vec![0.0; n_features];
        let mut bias = 0.0;
        for tree in &self.trees {
            bias += tree.bias();
            for (total, value) in totals.iter_mut().zip(tree.contributions(row)) {
                *total += value;
            }
        }
        let count = self.trees.len().max(1) as f64;
        (bias / count, totals.into_iter().map(|v| v / count).collect())
    }

    pub fn importances(&self) -> Vec<f64> {
        average_importances(&self.trees)
    }
}

impl Estimator for RandomForestConfig {
    fn algorithm(&self) -> &'static str {
        "random_forest"
    }

    fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(AqiForecastError::config_error(
                "random forest needs at least one tree",
            ));
        }
        if self.max_features == Some(0) {
            return Err(AqiForecastError::config_error(
                "random forest max_features must be positive",
            ));
        }
        Ok(())
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LearnedParameters> {
        check_shape(self.algorithm(), x, y)?;
        let params = self.tree_params();
        let n = x.nrows();

        // one seeded generator per tree keeps the result independent of scheduling
        let trees: Vec<RegressionTree> = (0..self.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let indices: Vec<usize> = if self.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                RegressionTree::fit(x, y, &indices, &params, &mut rng)
            })
            .collect();

        Ok(LearnedParameters::Forest(Forest { trees }))
    }
}

/// Least-squares gradient boosting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientBoostingConfig {
    pub n_stages: usize,
    pub learning_rate: f64,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn without replacement per stage.
    pub subsample: f64,
    pub seed: u64,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_stages: 100,
            learning_rate: 0.1,
            max_depth: Some(5),
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            seed: 42,
        }
    }
}

/// Stage-wise additive trees on top of a constant initial prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    pub init: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

impl BoostedTrees {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.init
            + self.learning_rate * self.trees.iter().map(|tree| tree.predict_row(row)).sum::<f64>()
    }

    /// Bias and per-feature contributions, scaled by the learning rate.
    pub fn contributions(&self, row: ArrayView1<f64>) -> (f64, Vec<f64>) {
        let n_features = self.trees.first().map_or(0, |tree| tree.n_features());
        let mut totals = vec![0.0; n_features];
        let mut bias = self.init;
        for tree in &self.trees {
            bias += self.learning_rate * tree.bias();
            for (total, value) in totals.iter_mut().zip(tree.contributions(row)) {
                *total += self.learning_rate * value;
            }
        }
        (bias, totals)
    }

    pub fn importances(&self) -> Vec<f64> {
        average_importances(&self.trees)
    }
}

impl Estimator for GradientBoostingConfig {
    fn algorithm(&self) -> &'static str {
        "gradient_boosting"
    }

    fn validate(&self) -> Result<()> {
        if self.n_stages == 0 {
            return Err(AqiForecastError::config_error(
                "gradient boosting needs at least one stage",
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(AqiForecastError::config_error(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(AqiForecastError::config_error(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        Ok(())
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LearnedParameters> {
        check_shape(self.algorithm(), x, y)?;
        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: None,
        };
        let n = x.nrows();
        let init = y.mean().unwrap_or(0.0);
        let mut predictions = Array1::from_elem(n, init);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let rows_per_stage = ((n as f64 * self.subsample).round() as usize).clamp(1, n);
        let mut trees = Vec::with_capacity(self.n_stages);

        for _ in 0..self.n_stages {
            let residuals = &y - &predictions;
            let indices: Vec<usize> = if rows_per_stage < n {
                let mut drawn = sample(&mut rng, n, rows_per_stage).into_vec();
                drawn.sort_unstable();
                drawn
            } else {
                (0..n).collect()
            };
            let tree = RegressionTree::fit(x, residuals.view(), &indices, &params, &mut rng);
            for (prediction, row) in predictions.iter_mut().zip(x.outer_iter()) {
                *prediction += self.learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }

        if predictions.iter().any(|p| !p.is_finite()) {
            return Err(AqiForecastError::training_failure(
                self.algorithm(),
                "boosting produced non-finite predictions",
            ));
        }
        Ok(LearnedParameters::Boosted(BoostedTrees {
            init,
            learning_rate: self.learning_rate,
            trees,
        }))
    }
}

fn average_importances(trees: &[RegressionTree]) -> Vec<f64> {
    let n_features = trees.first().map_or(0, |tree| tree.n_features());
    let mut totals = vec![0.0; n_features];
    for tree in trees {
        for (total, value) in totals.iter_mut().zip(tree.importances()) {
            *total += value;
        }
    }
    normalize(&totals)
}
