//! Error types for the forecasting pipeline

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for consistent error handling throughout the crate
pub type Result<T> = std::result::Result<T, AqiForecastError>;

/// Main error type for feature derivation, dataset building and model selection
#[derive(Debug, Error)]
pub enum AqiForecastError {
    /// A raw record is missing a required field or carries an unusable value
    #[error("Malformed observation at record {record}: field `{field}` {reason}")]
    MalformedObservation {
        record: usize,
        field: &'static str,
        reason: String,
    },

    /// The observation sequence violates an ordering precondition
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// No observations were supplied to a pipeline stage
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// A feature vector lacks the history its lags or windows require
    #[error("Insufficient history at {timestamp}: missing {}", .missing.join(", "))]
    InsufficientHistory {
        timestamp: DateTime<Utc>,
        missing: Vec<String>,
    },

    /// Too few usable rows to train on
    #[error("Insufficient data: {usable} usable rows, at least {required} required ({context})")]
    InsufficientData {
        usable: usize,
        required: usize,
        context: String,
    },

    /// A single candidate algorithm failed to fit
    #[error("Training failure for `{algorithm}`: {reason}")]
    TrainingFailure { algorithm: String, reason: String },

    /// Every candidate failed or produced unusable metrics
    #[error("No viable candidate: {0}")]
    NoViableCandidate(String),

    /// Attribution could not be computed for the selected model
    #[error("Attribution unavailable for `{algorithm}`: {reason}")]
    AttributionUnavailable { algorithm: String, reason: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    /// CSV processing errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Date/time parsing errors
    #[error("DateTime parsing error: {0}")]
    DateTimeParsing(#[from] chrono::ParseError),
}

impl AqiForecastError {
    /// Create a new malformed observation error
    pub fn malformed_observation(
        record: usize,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedObservation {
            record,
            field,
            reason: reason.into(),
        }
    }

    /// Create a new malformed input error
    pub fn malformed_input(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    /// Create a new insufficient data error
    pub fn insufficient_data(usable: usize, required: usize, context: impl Into<String>) -> Self {
        Self::InsufficientData {
            usable,
            required,
            context: context.into(),
        }
    }

    /// Create a new training failure for a named candidate
    pub fn training_failure(algorithm: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TrainingFailure {
            algorithm: algorithm.into(),
            reason: reason.into(),
        }
    }

    /// Create a new attribution error for a named candidate
    pub fn attribution_unavailable(algorithm: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AttributionUnavailable {
            algorithm: algorithm.into(),
            reason: reason.into(),
        }
    }

    /// Create a new configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error ends the current training run.
    ///
    /// Per-record, per-vector and per-candidate failures are isolated by the
    /// pipeline and never abort sibling work.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::MalformedObservation { .. }
                | Self::InsufficientHistory { .. }
                | Self::TrainingFailure { .. }
                | Self::AttributionUnavailable { .. }
        )
    }

    /// Whether more data could make a retry succeed
    pub fn needs_more_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. } | Self::EmptyInput(_))
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedObservation { .. } => "data",
            Self::MalformedInput(_) => "validation",
            Self::EmptyInput(_) => "data",
            Self::InsufficientHistory { .. } => "history",
            Self::InsufficientData { .. } => "data",
            Self::TrainingFailure { .. } => "training",
            Self::NoViableCandidate(_) => "training",
            Self::AttributionUnavailable { .. } => "explain",
            Self::Configuration(_) => "config",
            Self::JsonParsing(_) => "parsing",
            Self::Csv(_) => "csv",
            Self::Io(_) => "io",
            Self::DateTimeParsing(_) => "parsing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_item_failures_are_not_fatal() {
        let record = AqiForecastError::malformed_observation(3, "humidity", "is missing");
        let candidate = AqiForecastError::training_failure("lasso", "diverged");
        let explain = AqiForecastError::attribution_unavailable("ridge", "empty sample");

        assert!(!record.is_fatal());
        assert!(!candidate.is_fatal());
        assert!(!explain.is_fatal());
        assert!(AqiForecastError::insufficient_data(40, 100, "dataset").is_fatal());
        assert!(AqiForecastError::malformed_input("out of order").is_fatal());
    }

    #[test]
    fn insufficient_data_reports_counts() {
        let err = AqiForecastError::insufficient_data(42, 100, "rows with a realizable target");
        let message = err.to_string();
        assert!(message.contains("42"));
        assert!(message.contains("100"));
        assert!(err.needs_more_data());
        assert_eq!(err.category(), "data");
    }

    #[test]
    fn insufficient_history_lists_missing_fields() {
        let err = AqiForecastError::InsufficientHistory {
            timestamp: DateTime::<Utc>::from_timestamp(0, 0).expect("valid timestamp"),
            missing: vec!["index_lag_24h".to_string(), "index_change_24h".to_string()],
        };
        assert!(err.to_string().contains("index_lag_24h, index_change_24h"));
    }
}
