//! End-to-end training run.
//!
//! [`ForecastPipeline`] wires the stages together: observations are turned
//! into feature vectors, the vectors into a chronologically split dataset,
//! the dataset into fitted candidates, and the candidates into a selection
//! with an importance ranking and a report. Each stage only sees the
//! immutable output of the previous one.

use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::data::{ObservationSeries, RawObservation};
use crate::dataset::{Dataset, DatasetBuilder};
use crate::errors::{AqiForecastError, Result};
use crate::explain::{Explainer, FeatureImportanceReport};
use crate::features::{FeatureDeriver, FeatureRecord, FeatureSchema, FeatureSummary, FeatureVector};
use crate::io::{FeatureSink, ObservationSource, TimeRange};
use crate::report::TrainingReport;
use crate::selection::{ModelSelector, Selection};
use crate::training::ModelTrainer;

/// Everything a training run produced.
#[derive(Debug)]
pub struct PipelineRun {
    /// Raw records dropped as malformed.
    pub rejected_records: Vec<AqiForecastError>,
    pub observations: usize,
    pub duplicates_removed: usize,
    pub schema: FeatureSchema,
    pub vectors: Vec<FeatureVector>,
    pub feature_summary: FeatureSummary,
    pub dataset: Dataset,
    /// Candidates that failed to fit.
    pub training_failures: Vec<AqiForecastError>,
    pub selection: Selection,
    pub importance: FeatureImportanceReport,
    pub report: TrainingReport,
}

impl PipelineRun {
    /// Storage-agnostic feature records for a sink.
    pub fn feature_records(&self) -> Vec<FeatureRecord> {
        self.vectors
            .iter()
            .map(|vector| vector.to_record(&self.schema))
            .collect()
    }
}

/// Configured pipeline; cheap to reuse across runs.
#[derive(Debug, Clone)]
pub struct ForecastPipeline {
    config: PipelineConfig,
    deriver: FeatureDeriver,
    builder: DatasetBuilder,
    trainer: ModelTrainer,
    selector: ModelSelector,
    explainer: Explainer,
}

impl ForecastPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            deriver: FeatureDeriver::new(config.features.clone())?,
            builder: DatasetBuilder::new(config.dataset.clone())?,
            trainer: ModelTrainer::new(config.training.clone())?,
            selector: ModelSelector::new(config.selection.clone())?,
            explainer: Explainer::new(config.explain),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn deriver(&self) -> &FeatureDeriver {
        &self.deriver
    }

    /// Derive every feature vector of a series.
    pub fn derive_features(&self, series: &ObservationSeries) -> Vec<FeatureVector> {
        self.deriver.derive(series).collect()
    }

    /// Derive features and build the split dataset without training.
    pub fn build_dataset(&self, series: &ObservationSeries) -> Result<(Vec<FeatureVector>, Dataset)> {
        if series.is_empty() {
            return Err(AqiForecastError::EmptyInput(
                "observation series is empty".to_string(),
            ));
        }
        let vectors = self.derive_features(series);
        let dataset = self.builder.build(&vectors, self.deriver.schema())?;
        Ok((vectors, dataset))
    }

    /// Validate raw records, then run.
    pub fn run_raw(&self, raw: &[RawObservation]) -> Result<PipelineRun> {
        if raw.is_empty() {
            return Err(AqiForecastError::EmptyInput(
                "no raw observations supplied".to_string(),
            ));
        }
        let (series, rejected) = ObservationSeries::from_raw(raw)?;
        for err in &rejected {
            warn!(error = %err, "dropped malformed observation");
        }
        let mut run = self.run(&series)?;
        run.rejected_records = rejected;
        Ok(run)
    }

    /// Fetch from a source, then run.
    pub fn run_from_source(
        &self,
        source: &dyn ObservationSource,
        range: Option<TimeRange>,
    ) -> Result<PipelineRun> {
        let raw = source.fetch(range)?;
        self.run_raw(&raw)
    }

    /// Full training run over a validated series.
    #[instrument(level = "info", skip(self, series), fields(observations = series.len(), horizon = self.config.dataset.horizon_hours))]
    pub fn run(&self, series: &ObservationSeries) -> Result<PipelineRun> {
        let (vectors, dataset) = self.build_dataset(series)?;
        let feature_summary = FeatureSummary::from_vectors(&vectors);
        info!(
            vectors = feature_summary.total,
            complete = feature_summary.complete,
            "derived features"
        );

        let outcome = self.trainer.train(&dataset);
        if outcome.fitted.is_empty() {
            let reasons: Vec<String> = outcome.failures.iter().map(ToString::to_string).collect();
            return Err(AqiForecastError::NoViableCandidate(reasons.join("; ")));
        }
        let training_failures = outcome.failures;

        let selection = self.selector.select(outcome.fitted, &dataset)?;
        let importance = self.explainer.explain(&selection.selected, dataset.test());

        let failures = training_failures
            .iter()
            .chain(selection.rejected.iter())
            .map(ToString::to_string)
            .collect();
        let report = TrainingReport::new(
            dataset.horizon_hours(),
            dataset.summary(),
            &selection,
            importance.clone(),
            failures,
            dataset.mean_test_target(),
        );
        info!(
            selected = %report.selected_id,
            category = report.test_category().label(),
            "training run complete"
        );

        Ok(PipelineRun {
            rejected_records: Vec::new(),
            observations: series.len(),
            duplicates_removed: series.duplicates_removed(),
            schema: self.deriver.schema().clone(),
            vectors,
            feature_summary,
            dataset,
            training_failures,
            selection,
            importance,
            report,
        })
    }

    /// Hand the run's features and winning model to a sink.
    pub fn publish(&self, run: &PipelineRun, sink: &mut dyn FeatureSink) -> Result<()> {
        sink.write_features(&run.schema, &run.feature_records())?;
        sink.write_model(&run.selection.selected, &run.report)
    }
}
