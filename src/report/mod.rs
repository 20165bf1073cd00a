//! Reporting utilities for summarising a training run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::AqiCategory;
use crate::dataset::SplitSummary;
use crate::errors::Result;
use crate::explain::FeatureImportanceReport;
use crate::selection::{CandidateMetrics, OverfitSignal, Selection};

/// Summary row used when exporting candidate metrics to tabular formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummaryRow {
    /// Candidate identifier.
    pub id: String,
    /// Algorithm family.
    pub algorithm: String,
    pub test_rmse: f64,
    pub test_mae: f64,
    pub test_r2: f64,
    pub train_rmse: f64,
    /// Mean fold RMSE, if cross-validation ran.
    pub cv_mean_rmse: Option<f64>,
    pub cv_variance: Option<f64>,
    pub overfit_warning: bool,
    pub selected: bool,
}

/// Read-only snapshot of a training run for reporting consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub horizon_hours: u32,
    pub split: SplitSummary,
    pub selected_id: String,
    pub candidates: Vec<CandidateMetrics>,
    pub overfitting: Vec<OverfitSignal>,
    pub importance: FeatureImportanceReport,
    /// Candidates that failed to fit or evaluate.
    pub failures: Vec<String>,
    /// Mean index over the held-out targets.
    pub mean_test_index: Option<f64>,
}

impl TrainingReport {
    /// Assemble a report from a finished selection.
    pub fn new(
        horizon_hours: u32,
        split: SplitSummary,
        selection: &Selection,
        importance: FeatureImportanceReport,
        failures: Vec<String>,
        mean_test_index: Option<f64>,
    ) -> Self {
        Self {
            horizon_hours,
            split,
            selected_id: selection.selected.id.clone(),
            candidates: selection.table.clone(),
            overfitting: selection.overfitting.clone(),
            importance,
            failures,
            mean_test_index,
        }
    }

    /// Number of evaluated candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether no candidate was evaluated.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Health category of the mean held-out index.
    pub fn test_category(&self) -> AqiCategory {
        self.mean_test_index
            .map_or(AqiCategory::Unknown, AqiCategory::from_index)
    }

    /// Generate a list of summary rows for presentation or export.
    pub fn summary_rows(&self) -> Vec<ModelSummaryRow> {
        self.candidates
            .iter()
            .map(|row| ModelSummaryRow {
                id: row.id.clone(),
                algorithm: row.algorithm.clone(),
                test_rmse: row.test.rmse,
                test_mae: row.test.mae,
                test_r2: row.test.r2,
                train_rmse: row.train.rmse,
                cv_mean_rmse: row.cv_mean_rmse,
                cv_variance: row.cv_variance,
                overfit_warning: self
                    .overfitting
                    .iter()
                    .any(|signal| signal.id == row.id && signal.warning),
                selected: row.id == self.selected_id,
            })
            .collect()
    }

    /// Return top `limit` candidates ranked by test RMSE.
    pub fn best_by_rmse(&self, limit: usize) -> Vec<&CandidateMetrics> {
        let mut refs: Vec<&CandidateMetrics> = self.candidates.iter().collect();
        refs.sort_by(|a, b| a.test.rmse.total_cmp(&b.test.rmse));
        refs.truncate(limit);
        refs
    }

    /// Write the summary rows as a CSV file.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in self.summary_rows() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Pretty-printed JSON snapshot.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON snapshot to a file.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}
