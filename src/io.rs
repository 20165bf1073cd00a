//! Boundary adapters between the pipeline and storage.
//!
//! The core stages never touch the filesystem; callers wire an
//! [`ObservationSource`] in front of the pipeline and a [`FeatureSink`]
//! behind it. The local implementations here read and write plain CSV and
//! JSON files so a run can be reproduced or inspected offline.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::data::{parse_timestamp, RawObservation};
use crate::errors::Result;
use crate::features::{FeatureRecord, FeatureSchema};
use crate::report::TrainingReport;
use crate::training::FittedModel;

/// Inclusive time range requested from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Supplier of raw observation records, in timestamp order.
pub trait ObservationSource {
    /// Records inside `range`, or all records when `range` is `None`.
    ///
    /// Records whose timestamp cannot be read are passed through so that
    /// validation can report them.
    fn fetch(&self, range: Option<TimeRange>) -> Result<Vec<RawObservation>>;
}

/// Reads observations from a CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvObservationSource {
    path: PathBuf,
}

impl CsvObservationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ObservationSource for CsvObservationSource {
    /// Rows that cannot be decoded (a non-numeric cell, a short row) come back
    /// as [`RawObservation::unreadable`] records so validation drops them
    /// individually; only I/O and header errors fail the fetch.
    fn fetch(&self, range: Option<TimeRange>) -> Result<Vec<RawObservation>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let timestamp_column = headers.iter().position(|name| name.trim() == "timestamp");
        let mut records = Vec::new();
        let mut unreadable = 0;
        for row in reader.records() {
            let row = row?;
            let record = match row.deserialize::<RawObservation>(Some(&headers)) {
                Ok(record) => record,
                Err(err) => {
                    unreadable += 1;
                    let line = row.position().map_or(0, |position| position.line());
                    warn!(path = %self.path.display(), line, error = %err, "unreadable observation row");
                    RawObservation::unreadable(
                        timestamp_column
                            .and_then(|column| row.get(column))
                            .map(str::to_string),
                        format!("line {line}: {err}"),
                    )
                }
            };
            if let (Some(range), Some(raw)) = (range, record.timestamp.as_deref()) {
                if let Ok(timestamp) = parse_timestamp(raw) {
                    if !range.contains(timestamp) {
                        continue;
                    }
                }
            }
            records.push(record);
        }
        debug!(path = %self.path.display(), records = records.len(), unreadable, "read observations");
        Ok(records)
    }
}

/// In-memory source, mostly useful in tests and for synthetic data.
#[derive(Debug, Clone, Default)]
pub struct MemoryObservationSource {
    records: Vec<RawObservation>,
}

impl MemoryObservationSource {
    pub fn new(records: Vec<RawObservation>) -> Self {
        Self { records }
    }
}

impl ObservationSource for MemoryObservationSource {
    fn fetch(&self, range: Option<TimeRange>) -> Result<Vec<RawObservation>> {
        let Some(range) = range else {
            return Ok(self.records.clone());
        };
        Ok(self
            .records
            .iter()
            .filter(|record| {
                record
                    .timestamp
                    .as_deref()
                    .and_then(|raw| parse_timestamp(raw).ok())
                    .map_or(true, |timestamp| range.contains(timestamp))
            })
            .cloned()
            .collect())
    }
}

/// Receiver of pipeline outputs.
pub trait FeatureSink {
    fn write_features(&mut self, schema: &FeatureSchema, records: &[FeatureRecord]) -> Result<()>;

    fn write_model(&mut self, model: &FittedModel, report: &TrainingReport) -> Result<()>;
}

/// Writes features, metrics and the selected model under one directory.
///
/// Layout: `features.csv`, `metrics.csv`, `report.json`, `model.json`.
#[derive(Debug, Clone)]
pub struct LocalBackupSink {
    dir: PathBuf,
}

impl LocalBackupSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn features_path(&self) -> PathBuf {
        self.dir.join("features.csv")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join("metrics.csv")
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join("report.json")
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join("model.json")
    }
}

impl FeatureSink for LocalBackupSink {
    fn write_features(&mut self, schema: &FeatureSchema, records: &[FeatureRecord]) -> Result<()> {
        let mut writer = csv::Writer::from_path(self.features_path())?;
        let mut header = vec!["timestamp".to_string(), "complete".to_string()];
        header.extend(schema.names().iter().cloned());
        writer.write_record(&header)?;

        for record in records {
            let mut row = Vec::with_capacity(header.len());
            row.push(record.timestamp.to_rfc3339());
            row.push(record.complete.to_string());
            for name in schema.names() {
                match record.fields.get(name).copied().flatten() {
                    Some(value) => row.push(value.to_string()),
                    None => row.push(String::new()),
                }
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        info!(path = %self.features_path().display(), rows = records.len(), "wrote features");
        Ok(())
    }

    fn write_model(&mut self, model: &FittedModel, report: &TrainingReport) -> Result<()> {
        report.write_csv(self.metrics_path())?;
        report.write_json(self.report_path())?;

        let file = File::create(self.model_path())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, model)?;
        writer.flush()?;
        info!(dir = %self.dir.display(), model = %model.id, "wrote model backup");
        Ok(())
    }
}
