//! Regression metrics used to score candidates.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Error metrics of a set of predictions against known targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    /// Compute all metrics; `None` for empty or mismatched input.
    pub fn compute(actual: ArrayView1<f64>, predicted: ArrayView1<f64>) -> Option<Self> {
        if actual.is_empty() || actual.len() != predicted.len() {
            return None;
        }
        Some(Self {
            rmse: rmse(actual, predicted),
            mae: mae(actual, predicted),
            r2: r2(actual, predicted),
        })
    }

    /// Whether every metric is a finite number.
    pub fn is_finite(&self) -> bool {
        self.rmse.is_finite() && self.mae.is_finite() && self.r2.is_finite()
    }
}

fn comparable(actual: &ArrayView1<f64>, predicted: &ArrayView1<f64>) -> bool {
    !actual.is_empty() && actual.len() == predicted.len()
}

/// Root-mean-squared error. NaN for empty or mismatched input.
pub fn rmse(actual: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    if !comparable(&actual, &predicted) {
        return f64::NAN;
    }
    let residuals = &actual - &predicted;
    (residuals.dot(&residuals) / actual.len() as f64).sqrt()
}

/// Mean absolute error.
pub fn mae(actual: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    if !comparable(&actual, &predicted) {
        return f64::NAN;
    }
    (&actual - &predicted).mapv(f64::abs).sum() / actual.len() as f64
}

/// Coefficient of determination.
///
/// A constant target yields 1.0 for an exact fit and 0.0 otherwise.
pub fn r2(actual: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    if !comparable(&actual, &predicted) {
        return f64::NAN;
    }
    let mean = actual.sum() / actual.len() as f64;
    let ss_tot = actual.mapv(|a| (a - mean) * (a - mean)).sum();
    let residuals = &actual - &predicted;
    let ss_res = residuals.dot(&residuals);
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::aview1;

    #[test]
    fn closed_form_values() {
        let actual = [3.0, -0.5, 2.0, 7.0];
        let predicted = [2.5, 0.0, 2.0, 8.0];
        let metrics = RegressionMetrics::compute(aview1(&actual), aview1(&predicted)).unwrap();

        assert!((metrics.mae - 0.5).abs() < 1e-12);
        assert!((metrics.rmse - 0.375_f64.sqrt()).abs() < 1e-12);
        assert!((metrics.r2 - 0.948_608_137_044_967_9).abs() < 1e-12);
    }

    #[test]
    fn perfect_fit() {
        let actual = aview1(&[1.0, 2.0, 3.0]);
        let metrics = RegressionMetrics::compute(actual, actual).unwrap();
        assert_eq!(metrics.rmse, 0.0);
        assert_eq!(metrics.r2, 1.0);
    }

    #[test]
    fn constant_target() {
        assert_eq!(r2(aview1(&[2.0, 2.0]), aview1(&[2.0, 2.0])), 1.0);
        assert_eq!(r2(aview1(&[2.0, 2.0]), aview1(&[1.0, 3.0])), 0.0);
    }

    #[test]
    fn mismatched_lengths() {
        assert!(RegressionMetrics::compute(aview1(&[1.0]), aview1(&[1.0, 2.0])).is_none());
        assert!(RegressionMetrics::compute(aview1(&[]), aview1(&[])).is_none());
        assert!(rmse(aview1(&[1.0]), aview1(&[1.0, 2.0])).is_nan());
    }
}
