//! Cross-validation inside the training split.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Estimator;
use crate::metrics::rmse;

/// Fold layout used for the stability estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CrossValidation {
    /// Contiguous, unshuffled folds; each fold is validated once.
    KFold { n_splits: usize },
    /// Expanding window: each fold trains on everything before it.
    TimeSeries { n_splits: usize },
    Disabled,
}

impl Default for CrossValidation {
    fn default() -> Self {
        CrossValidation::KFold { n_splits: 5 }
    }
}

/// Per-fold validation RMSE and its spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvSummary {
    pub fold_rmse: Vec<f64>,
    pub mean_rmse: f64,
    /// Population variance of the fold RMSEs.
    pub variance: f64,
}

/// Train and validation row positions of one fold.
pub type Fold = (Vec<usize>, Vec<usize>);

impl CrossValidation {
    pub fn n_splits(&self) -> usize {
        match self {
            CrossValidation::KFold { n_splits } | CrossValidation::TimeSeries { n_splits } => {
                *n_splits
            }
            CrossValidation::Disabled => 0,
        }
    }

    /// Fold layout for `n` rows, or `None` when there are too few rows.
    pub fn folds(&self, n: usize) -> Option<Vec<Fold>> {
        match *self {
            CrossValidation::Disabled => None,
            CrossValidation::KFold { n_splits } => {
                if n_splits < 2 || n < n_splits {
                    return None;
                }
                let base = n / n_splits;
                let extra = n % n_splits;
                let mut start = 0;
                let mut folds = Vec::with_capacity(n_splits);
                for fold in 0..n_splits {
                    let size = base + usize::from(fold < extra);
                    let end = start + size;
                    let train = (0..start).chain(end..n).collect();
                    folds.push((train, (start..end).collect()));
                    start = end;
                }
                Some(folds)
            }
            CrossValidation::TimeSeries { n_splits } => {
                let test_size = n / (n_splits + 1);
                if n_splits < 1 || test_size == 0 {
                    return None;
                }
                let first_end = n - n_splits * test_size;
                let folds = (0..n_splits)
                    .map(|fold| {
                        let start = first_end + fold * test_size;
                        ((0..start).collect(), (start..start + test_size).collect())
                    })
                    .collect();
                Some(folds)
            }
        }
    }

    /// Fit and score `estimator` on every fold.
    ///
    /// A fold that fails to fit makes the whole estimate unavailable; the
    /// candidate itself is unaffected.
    pub fn evaluate(
        &self,
        estimator: &dyn Estimator,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Option<CvSummary> {
        let folds = self.folds(x.nrows())?;
        let mut fold_rmse = Array1::<f64>::zeros(folds.len());
        for (score_slot, (train, valid)) in fold_rmse.iter_mut().zip(folds) {
            let train_x = x.select(Axis(0), &train);
            let train_y = y.select(Axis(0), &train);
            let params = match estimator.fit(train_x.view(), train_y.view()) {
                Ok(params) => params,
                Err(err) => {
                    warn!(algorithm = estimator.algorithm(), error = %err, "cross-validation fold failed");
                    return None;
                }
            };
            let valid_x = x.select(Axis(0), &valid);
            let valid_y = y.select(Axis(0), &valid);
            let score = rmse(valid_y.view(), params.predict(valid_x.view()).view());
            if !score.is_finite() {
                warn!(algorithm = estimator.algorithm(), "cross-validation produced a non-finite score");
                return None;
            }
            *score_slot = score;
        }
        Some(CvSummary {
            mean_rmse: fold_rmse.mean()?,
            variance: fold_rmse.var(0.0),
            fold_rmse: fold_rmse.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::linear::RidgeConfig;
    use ndarray::Array2;

    #[test]
    fn kfold_covers_every_row_once() {
        let folds = CrossValidation::KFold { n_splits: 5 }.folds(12).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|(_, valid)| valid.len()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2, 2]);

        let mut seen: Vec<usize> = folds.iter().flat_map(|(_, valid)| valid.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..12).collect::<Vec<_>>());
        for (train, valid) in &folds {
            assert_eq!(train.len() + valid.len(), 12);
        }
    }

    #[test]
    fn time_series_folds_only_look_back() {
        let folds = CrossValidation::TimeSeries { n_splits: 3 }.folds(10).unwrap();
        assert_eq!(folds.len(), 3);
        for (train, valid) in &folds {
            assert!(train.iter().max().unwrap() < valid.iter().min().unwrap());
            assert_eq!(valid.len(), 2);
        }
        assert_eq!(folds[0].0.len(), 4);
    }

    #[test]
    fn too_few_rows() {
        assert!(CrossValidation::KFold { n_splits: 5 }.folds(3).is_none());
        assert!(CrossValidation::TimeSeries { n_splits: 5 }.folds(4).is_none());
        assert!(CrossValidation::Disabled.folds(100).is_none());
    }

    #[test]
    fn evaluates_a_linear_estimator() {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(40, |i| 2.0 * i as f64 + 1.0);

        let summary = CrossValidation::default()
            .evaluate(&RidgeConfig { alpha: 1e-8 }, x.view(), y.view())
            .unwrap();
        assert_eq!(summary.fold_rmse.len(), 5);
        assert!(summary.mean_rmse < 1e-3);
        assert!(summary.variance >= 0.0);
    }

    #[test]
    fn fold_spread_is_population_variance() {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(40, |i| if i % 2 == 0 { 1.0 } else { -1.0 });

        let summary = CrossValidation::KFold { n_splits: 4 }
            .evaluate(&RidgeConfig::default(), x.view(), y.view())
            .unwrap();
        let mean = summary.fold_rmse.iter().sum::<f64>() / 4.0;
        let spread = summary
            .fold_rmse
            .iter()
            .map(|rmse| (rmse - mean) * (rmse - mean))
            .sum::<f64>()
            / 4.0;
        assert!((summary.mean_rmse - mean).abs() < 1e-12);
        assert!((summary.variance - spread).abs() < 1e-12);
    }
}
