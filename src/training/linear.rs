//! Regularized linear regression on standardized features.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Estimator, LearnedParameters};
use crate::errors::{AqiForecastError, Result};

/// Per-column centering and scaling learned from the training rows.
///
/// Columns with zero variance map to 0 after transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl Standardizer {
    /// Learn column means and population standard deviations.
    pub fn fit(x: ArrayView2<f64>) -> Self {
        if x.nrows() == 0 {
            return Self {
                means: Array1::zeros(x.ncols()),
                scales: Array1::zeros(x.ncols()),
            };
        }
        let means = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scales = x.std_axis(Axis(0), 0.0);
        Self { means, scales }
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    /// Whether a column carried any variance during fitting.
    pub fn is_active(&self, column: usize) -> bool {
        self.scales.get(column).map_or(false, |scale| *scale > 0.0)
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        Zip::from(&row)
            .and(&self.means)
            .and(&self.scales)
            .map_collect(|&value, &mean, &scale| {
                if scale > 0.0 {
                    (value - mean) / scale
                } else {
                    0.0
                }
            })
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut z = &x - &self.means;
        for (mut column, &scale) in z.axis_iter_mut(Axis(1)).zip(self.scales.iter()) {
            if scale > 0.0 {
                column /= scale;
            } else {
                column.fill(0.0);
            }
        }
        z
    }
}

/// Linear model `y = intercept + coefficients · z` on standardized inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub standardizer: Standardizer,
    pub coefficients: Array1<f64>,
    pub intercept: f64,
}

impl LinearModel {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.intercept + self.coefficients.dot(&self.standardizer.transform_row(row))
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.standardizer.transform(x).dot(&self.coefficients) + self.intercept
    }

    /// Per-feature terms `coef_j * z_j`; they sum to the prediction minus the intercept.
    pub fn contributions(&self, row: ArrayView1<f64>) -> Vec<f64> {
        (&self.coefficients * &self.standardizer.transform_row(row)).to_vec()
    }

    /// Magnitudes of the standardized coefficients.
    pub fn importances(&self) -> Vec<f64> {
        self.coefficients.iter().map(|coef| coef.abs()).collect()
    }

    fn is_finite(&self) -> bool {
        self.intercept.is_finite() && self.coefficients.iter().all(|coef| coef.is_finite())
    }
}

/// L2-regularized least squares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RidgeConfig {
    pub alpha: f64,
}

impl Default for RidgeConfig {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

impl Estimator for RidgeConfig {
    fn algorithm(&self) -> &'static str {
        "ridge"
    }

    fn validate(&self) -> Result<()> {
        if !(self.alpha >= 0.0 && self.alpha.is_finite()) {
            return Err(AqiForecastError::config_error(format!(
                "ridge alpha must be a non-negative number, got {}",
                self.alpha
            )));
        }
        Ok(())
    }

    /// Solves `(ZᵀZ + αI) b = Zᵀ(y - ȳ)` over the columns with variance.
    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LearnedParameters> {
        check_shape(self.algorithm(), x, y)?;
        let standardizer = Standardizer::fit(x);
        let y_mean = y.mean().unwrap_or(0.0);
        let active: Vec<usize> = (0..standardizer.n_features())
            .filter(|&j| standardizer.is_active(j))
            .collect();

        let mut coefficients = Array1::zeros(standardizer.n_features());
        if !active.is_empty() {
            let z = standardizer.transform(x).select(Axis(1), &active);
            let centered = y.mapv(|target| target - y_mean);
            let mut gram = z.t().dot(&z);
            gram.diag_mut().mapv_inplace(|value| value + self.alpha);
            let rhs = z.t().dot(&centered);

            let solution = cholesky_solve(&gram, &rhs).ok_or_else(|| {
                AqiForecastError::training_failure(
                    self.algorithm(),
                    "normal equations are not positive definite",
                )
            })?;
            for (&value, &j) in solution.iter().zip(active.iter()) {
                coefficients[j] = value;
            }
        }

        finish(
            self.algorithm(),
            LinearModel {
                standardizer,
                coefficients,
                intercept: y_mean,
            },
        )
    }
}

/// L1-regularized least squares fitted by cyclic coordinate descent.
///
/// Minimizes `(1 / 2n) ||y - ȳ - Zb||² + α ||b||₁`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LassoConfig {
    pub alpha: f64,
    pub max_iter: usize,
    /// Stop when no coefficient moves more than this in a sweep.
    pub tol: f64,
}

impl Default for LassoConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            max_iter: 1000,
            tol: 1e-4,
        }
    }
}

impl Estimator for LassoConfig {
    fn algorithm(&self) -> &'static str {
        "lasso"
    }

    fn validate(&self) -> Result<()> {
        if !(self.alpha >= 0.0 && self.alpha.is_finite()) {
            return Err(AqiForecastError::config_error(format!(
                "lasso alpha must be a non-negative number, got {}",
                self.alpha
            )));
        }
        if self.max_iter == 0 || !(self.tol > 0.0) {
            return Err(AqiForecastError::config_error(
                "lasso max_iter and tol must be positive",
            ));
        }
        Ok(())
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LearnedParameters> {
        check_shape(self.algorithm(), x, y)?;
        let standardizer = Standardizer::fit(x);
        let z = standardizer.transform(x);
        let n = y.len() as f64;
        let y_mean = y.mean().unwrap_or(0.0);

        let column_norms = z.map_axis(Axis(0), |column| column.dot(&column) / n);
        let mut coefficients = Array1::<f64>::zeros(standardizer.n_features());
        let mut residuals = y.mapv(|target| target - y_mean);

        let mut converged = false;
        for _ in 0..self.max_iter {
            let mut max_step: f64 = 0.0;
            for (j, column) in z.axis_iter(Axis(1)).enumerate() {
                let norm = column_norms[j];
                if norm == 0.0 {
                    continue;
                }
                let old = coefficients[j];
                let rho = column.dot(&residuals) / n + norm * old;
                let new = soft_threshold(rho, self.alpha) / norm;
                if new != old {
                    let delta = new - old;
                    residuals.scaled_add(-delta, &column);
                    coefficients[j] = new;
                    max_step = max_step.max(delta.abs());
                }
            }
            if !max_step.is_finite() {
                break;
            }
            if max_step < self.tol {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                max_iter = self.max_iter,
                alpha = self.alpha,
                "lasso coordinate descent did not converge"
            );
        }

        finish(
            self.algorithm(),
            LinearModel {
                standardizer,
                coefficients,
                intercept: y_mean,
            },
        )
    }
}

fn finish(algorithm: &str, model: LinearModel) -> Result<LearnedParameters> {
    if !model.is_finite() {
        return Err(AqiForecastError::training_failure(
            algorithm,
            "non-finite coefficients",
        ));
    }
    Ok(LearnedParameters::Linear(model))
}

pub(crate) fn check_shape(algorithm: &str, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
    if x.nrows() == 0 || x.nrows() != y.len() {
        return Err(AqiForecastError::training_failure(
            algorithm,
            format!(
                "expected matching non-empty inputs, got {} rows and {} targets",
                x.nrows(),
                y.len()
            ),
        ));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(AqiForecastError::training_failure(
            algorithm,
            "inputs contain non-finite values",
        ));
    }
    Ok(())
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// Solve `A x = b` for symmetric positive definite `A`.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > 0.0) {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    // L y = b
    let mut forward = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * forward[k];
        }
        forward[i] = sum / l[[i, i]];
    }
    // Lᵀ x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = forward[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, aview1};

    fn line(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { 7.0 });
        let y = Array1::from_shape_fn(n, |i| 3.0 * i as f64 + 2.0);
        (x, y)
    }

    fn linear(params: LearnedParameters) -> LinearModel {
        match params {
            LearnedParameters::Linear(model) => model,
            other => panic!("expected a linear model, got {other:?}"),
        }
    }

    #[test]
    fn standardizer_zeroes_constant_columns() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = Standardizer::fit(x.view());

        assert!(scaler.is_active(0));
        assert!(!scaler.is_active(1));
        assert_eq!(scaler.transform_row(aview1(&[3.0, 9.0])), array![1.0, 0.0]);
        assert_eq!(scaler.transform(x.view()), array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn ridge_recovers_a_line() {
        let (x, y) = line(200);
        let model = linear(RidgeConfig { alpha: 1e-6 }.fit(x.view(), y.view()).unwrap());

        assert!((model.predict_row(aview1(&[10.0, 7.0])) - 32.0).abs() < 1e-3);
        assert_eq!(model.coefficients[1], 0.0);
    }

    #[test]
    fn ridge_shrinks_with_alpha() {
        let (x, y) = line(50);
        let loose = linear(RidgeConfig { alpha: 0.1 }.fit(x.view(), y.view()).unwrap());
        let tight = linear(RidgeConfig { alpha: 100.0 }.fit(x.view(), y.view()).unwrap());

        assert!(tight.coefficients[0].abs() < loose.coefficients[0].abs());
    }

    #[test]
    fn lasso_zeroes_weak_features() {
        let x = Array2::from_shape_fn((100, 2), |(i, j)| {
            if j == 0 {
                i as f64
            } else {
                ((i * 37) % 11) as f64
            }
        });
        let y = Array1::from_shape_fn(100, |i| i as f64);
        let model = linear(LassoConfig::default().fit(x.view(), y.view()).unwrap());

        assert!(model.coefficients[0] > 0.0);
        assert_eq!(model.coefficients[1], 0.0);
    }

    #[test]
    fn batch_and_row_predictions_agree() {
        let (x, y) = line(30);
        let model = linear(RidgeConfig::default().fit(x.view(), y.view()).unwrap());
        let batch = model.predict(x.view());

        for (row, expected) in x.outer_iter().zip(batch.iter()) {
            assert!((model.predict_row(row) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn contributions_sum_to_prediction() {
        let (x, y) = line(30);
        let model = linear(RidgeConfig::default().fit(x.view(), y.view()).unwrap());
        let row = aview1(&[12.0, 7.0]);
        let total: f64 = model.contributions(row).iter().sum();

        assert!((model.intercept + total - model.predict_row(row)).abs() < 1e-9);
    }

    #[test]
    fn cholesky_rejects_indefinite_systems() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(cholesky_solve(&a, &array![1.0, 1.0]).is_none());

        let spd = array![[4.0, 2.0], [2.0, 3.0]];
        let x = cholesky_solve(&spd, &array![2.0, 1.0]).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-12);
        assert!(x[1].abs() < 1e-12);
    }

    #[test]
    fn non_finite_inputs_fail_the_candidate() {
        let x = array![[1.0], [f64::NAN]];
        let err = RidgeConfig::default()
            .fit(x.view(), aview1(&[1.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err, AqiForecastError::TrainingFailure { .. }));
    }
}
