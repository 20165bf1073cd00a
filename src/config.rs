//! Pipeline configuration.
//!
//! All tunables are passed explicitly; nothing is read from the environment.
//! Every section defaults to the documented values, so a JSON file only needs
//! to name what it changes:
//!
//! ```rust
//! use aqi_forecast::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json_str(r#"{"dataset": {"horizon_hours": 6}}"#).unwrap();
//! assert_eq!(config.dataset.horizon_hours, 6);
//! assert_eq!(config.dataset.min_samples, 100);
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetConfig;
use crate::errors::Result;
use crate::explain::ExplainConfig;
use crate::features::FeatureConfig;
use crate::selection::SelectionPolicy;
use crate::training::TrainerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: FeatureConfig,
    pub dataset: DatasetConfig,
    pub training: TrainerConfig,
    pub selection: SelectionPolicy,
    pub explain: ExplainConfig,
}

impl PipelineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.dataset.validate()?;
        self.training.validate()?;
        self.selection.validate()?;
        Ok(())
    }

    /// Forecast horizon in hours.
    pub fn horizon_hours(&self) -> u32 {
        self.dataset.horizon_hours
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AqiForecastError;
    use crate::training::cv::CrossValidation;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.horizon_hours(), 24);
        assert_eq!(config.features.lag_hours, vec![1, 3, 6, 12, 24]);
        assert_eq!(config.training.roster.len(), 4);
    }

    #[test]
    fn json_round_trip_keeps_settings() {
        let mut config = PipelineConfig::default();
        config.training.cross_validation = CrossValidation::TimeSeries { n_splits: 3 };
        config.selection.overfit_ratio = 0.5;

        let parsed = PipelineConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn invalid_sections_are_reported() {
        let err = PipelineConfig::from_json_str(r#"{"features": {"lag_hours": [0]}}"#).unwrap_err();
        assert!(matches!(err, AqiForecastError::Configuration(_)));

        let err = PipelineConfig::from_json_str(r#"{"training": {"roster": []}}"#).unwrap_err();
        assert!(matches!(err, AqiForecastError::Configuration(_)));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"explain": {"sample_size": 10}}"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.explain.sample_size, 10);
        assert_eq!(config.explain.seed, 42);
    }
}
