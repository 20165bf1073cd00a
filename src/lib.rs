//! Air-quality index forecasting core.
//!
//! The crate turns an hourly stream of air-quality and weather observations
//! for one location into a fixed-width feature table, splits it
//! chronologically, fits a roster of regression models, picks the one with
//! the lowest held-out error and explains it with a feature-importance
//! ranking. Every stage is a pure function of its inputs; reading observations
//! and persisting results happen through the adapters in [`io`].
//!
//! ```rust,no_run
//! use aqi_forecast::prelude::*;
//!
//! # fn main() -> aqi_forecast::errors::Result<()> {
//! let series = synthetic::generate(&SyntheticConfig::default())?;
//! let pipeline = ForecastPipeline::new(PipelineConfig::default())?;
//! let run = pipeline.run(&series)?;
//! println!("selected {}", run.report.selected_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod dataset;
pub mod errors;
pub mod explain;
pub mod features;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod selection;
pub mod synthetic;
pub mod training;

#[cfg(test)]
mod tests {
    mod feature_property_tests;
    mod mock_data;
    mod pipeline_tests;
    mod selection_tests;
}

/// Convenient re-export of the most common items used when wiring a pipeline.
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::data::{AqiCategory, Observation, ObservationSeries, Pollutant, RawObservation};
    pub use crate::dataset::{Dataset, DatasetBuilder, DatasetConfig, SplitPolicy, SplitTable};
    pub use crate::errors::{AqiForecastError, Result};
    pub use crate::explain::{Explainer, ExplainConfig, FeatureImportanceReport};
    pub use crate::features::{FeatureConfig, FeatureDeriver, FeatureSchema, FeatureVector};
    pub use crate::io::{CsvObservationSource, FeatureSink, LocalBackupSink, ObservationSource};
    pub use crate::pipeline::{ForecastPipeline, PipelineRun};
    pub use crate::report::TrainingReport;
    pub use crate::selection::{ModelSelector, Selection, SelectionPolicy, TieBreaker};
    pub use crate::synthetic::{self, SyntheticConfig};
    pub use crate::training::{
        AlgorithmConfig, CandidateConfig, Estimator, FittedModel, ModelTrainer, TrainerConfig,
    };
}
