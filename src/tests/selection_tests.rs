use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use super::mock_data::{linear_series, short_horizon_config};
use crate::errors::{AqiForecastError, Result};
use crate::metrics::RegressionMetrics;
use crate::pipeline::ForecastPipeline;
use crate::selection::{ModelSelector, SelectionPolicy};
use crate::training::ensemble::RandomForestConfig;
use crate::training::linear::{LinearModel, RidgeConfig, Standardizer};
use crate::training::{Estimator, FittedModel, LearnedParameters, ModelTrainer};

#[test]
fn same_inputs_select_the_same_candidate() {
    let series = linear_series(140);
    let pipeline = ForecastPipeline::new(short_horizon_config()).unwrap();

    let first = pipeline.run(&series).unwrap();
    let second = pipeline.run(&series).unwrap();

    assert_eq!(first.selection.selected.id, second.selection.selected.id);
    assert_eq!(first.selection.table, second.selection.table);
    assert_eq!(first.importance, second.importance);
}

#[test]
fn table_follows_roster_order_with_or_without_parallelism() {
    let series = linear_series(130);
    let mut sequential = short_horizon_config();
    sequential.training.parallel = false;

    let parallel_run = ForecastPipeline::new(short_horizon_config())
        .unwrap()
        .run(&series)
        .unwrap();
    let sequential_run = ForecastPipeline::new(sequential).unwrap().run(&series).unwrap();

    let ids: Vec<&str> = parallel_run.selection.table.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["ridge", "lasso", "random_forest", "gradient_boosting"]);
    assert_eq!(parallel_run.selection.table, sequential_run.selection.table);
}

#[test]
fn cross_validation_stays_inside_the_training_split() {
    let config = short_horizon_config();
    let pipeline = ForecastPipeline::new(config.clone()).unwrap();
    let (_, dataset) = pipeline.build_dataset(&linear_series(130)).unwrap();
    let outcome = ModelTrainer::new(config.training).unwrap().train(&dataset);

    for model in &outcome.fitted {
        let cv = model.cross_validation.as_ref().expect("five folds fit");
        assert_eq!(cv.fold_rmse.len(), 5);
        assert!(model.test_metrics.is_none());
        assert_eq!(model.feature_names, dataset.feature_names());
    }
}

fn broken_candidate(feature_names: Vec<String>) -> FittedModel {
    let width = feature_names.len();
    let x = Array2::from_shape_fn((2, width), |(i, _)| i as f64);
    let metrics = RegressionMetrics {
        rmse: 0.0,
        mae: 0.0,
        r2: 1.0,
    };
    FittedModel {
        id: "broken".to_string(),
        algorithm: "ridge".to_string(),
        parameters: LearnedParameters::Linear(LinearModel {
            standardizer: Standardizer::fit(x.view()),
            coefficients: Array1::from_elem(width, f64::NAN),
            intercept: 0.0,
        }),
        feature_names,
        train_metrics: metrics,
        cross_validation: None,
        test_metrics: None,
    }
}

#[test]
fn unusable_candidates_are_excluded_not_fatal() {
    let config = short_horizon_config();
    let pipeline = ForecastPipeline::new(config.clone()).unwrap();
    let (_, dataset) = pipeline.build_dataset(&linear_series(130)).unwrap();
    let mut fitted = ModelTrainer::new(config.training).unwrap().train(&dataset).fitted;
    fitted.insert(0, broken_candidate(dataset.feature_names().to_vec()));

    let selection = ModelSelector::new(SelectionPolicy::default())
        .unwrap()
        .select(fitted, &dataset)
        .unwrap();
    assert_eq!(selection.rejected.len(), 1);
    assert!(selection.table.iter().all(|row| row.id != "broken"));
    assert_ne!(selection.selected.id, "broken");
}

#[test]
fn all_candidates_unusable_is_no_viable_candidate() {
    let config = short_horizon_config();
    let pipeline = ForecastPipeline::new(config).unwrap();
    let (_, dataset) = pipeline.build_dataset(&linear_series(130)).unwrap();

    let err = ModelSelector::new(SelectionPolicy::default())
        .unwrap()
        .select(
            vec![broken_candidate(dataset.feature_names().to_vec())],
            &dataset,
        )
        .unwrap_err();
    assert!(matches!(err, AqiForecastError::NoViableCandidate(_)));
}

#[test]
fn overfitting_is_flagged_not_disqualifying() {
    let series = linear_series(130);
    let run = ForecastPipeline::new(short_horizon_config())
        .unwrap()
        .run(&series)
        .unwrap();

    assert_eq!(run.selection.overfitting.len(), run.selection.table.len());
    // trees cannot extrapolate the trend, so their held-out error dwarfs the training error
    let forest = run
        .selection
        .overfitting
        .iter()
        .find(|signal| signal.id == "random_forest")
        .unwrap();
    assert!(forest.warning);
    assert!(run.selection.table.iter().any(|row| row.id == "random_forest"));
}

/// Estimator whose fit always fails, as a singular solve would.
#[derive(Debug)]
struct Unfittable;

impl Estimator for Unfittable {
    fn algorithm(&self) -> &'static str {
        "unfittable"
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn fit(&self, _x: ArrayView2<f64>, _y: ArrayView1<f64>) -> Result<LearnedParameters> {
        Err(AqiForecastError::training_failure(
            self.algorithm(),
            "normal equations are not positive definite",
        ))
    }
}

#[test]
fn failed_fit_excludes_only_that_candidate() -> anyhow::Result<()> {
    let config = short_horizon_config();
    let pipeline = ForecastPipeline::new(config.clone())?;
    let (_, dataset) = pipeline.build_dataset(&linear_series(130))?;

    let ridge = RidgeConfig::default();
    let forest = RandomForestConfig {
        n_trees: 10,
        ..RandomForestConfig::default()
    };
    let candidates: Vec<(&str, &dyn Estimator)> = vec![
        ("ridge", &ridge as &dyn Estimator),
        ("always_fails", &Unfittable as &dyn Estimator),
        ("random_forest", &forest as &dyn Estimator),
    ];

    for parallel in [true, false] {
        let mut training = config.training.clone();
        training.parallel = parallel;
        let outcome = ModelTrainer::new(training)?.fit_candidates(&candidates, &dataset);

        assert_eq!(outcome.failures.len(), 1);
        match &outcome.failures[0] {
            AqiForecastError::TrainingFailure { algorithm, .. } => {
                assert_eq!(algorithm.as_str(), "always_fails")
            }
            other => panic!("unexpected failure {other}"),
        }
        let ids: Vec<&str> = outcome.fitted.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["ridge", "random_forest"]);

        let selection = ModelSelector::new(config.selection.clone())?.select(outcome.fitted, &dataset)?;
        assert_eq!(selection.table.len(), 2);
        assert_eq!(selection.selected.id, "ridge");
    }
    Ok(())
}
