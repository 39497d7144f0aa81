//! Error taxonomy for the analysis layer

use std::time::Duration;
use thiserror::Error;
use vitalwatch_core::{Metric, RecordError, StoreError};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("insufficient training data for {metric}: {samples} samples, need at least {required}")]
    InsufficientTrainingData {
        metric: Metric,
        samples: usize,
        required: usize,
    },

    #[error("insufficient history for {subject}: {available} usable readings, need at least {required}")]
    InsufficientHistory {
        subject: String,
        available: usize,
        required: usize,
    },

    #[error("model not fitted: {0}")]
    ModelNotFitted(String),

    #[error("incompatible model: {0}")]
    IncompatibleModel(String),

    #[error("model '{0}' not found")]
    ModelNotFound(String),

    #[error("invalid model name '{0}'")]
    InvalidModelName(String),

    #[error("training timed out after {elapsed:?} ({epochs_completed} epochs completed)")]
    TrainingTimeout {
        elapsed: Duration,
        epochs_completed: usize,
    },

    #[error("anomaly fit timed out after {elapsed:?} ({models_fitted} models fitted)")]
    FitTimeout {
        elapsed: Duration,
        models_fitted: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Store(StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Background(String),
}

impl AnalysisError {
    /// Stable kind name, surfaced by the CLI and the dashboard
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::MalformedRecord(_) => "MalformedRecord",
            AnalysisError::InsufficientTrainingData { .. } => "InsufficientTrainingData",
            AnalysisError::InsufficientHistory { .. } => "InsufficientHistory",
            AnalysisError::ModelNotFitted(_) => "ModelNotFitted",
            AnalysisError::IncompatibleModel(_) => "IncompatibleModel",
            AnalysisError::ModelNotFound(_) => "ModelNotFound",
            AnalysisError::InvalidModelName(_) => "InvalidModelName",
            AnalysisError::TrainingTimeout { .. } => "TrainingTimeout",
            AnalysisError::FitTimeout { .. } => "FitTimeout",
            AnalysisError::InvalidConfig(_) | AnalysisError::ConfigParse(_) => "InvalidConfig",
            AnalysisError::Store(_) => "NotFound",
            AnalysisError::Io(_) => "Io",
            AnalysisError::Serialization(_) => "Serialization",
            AnalysisError::Background(_) => "Background",
        }
    }

    /// "Not enough signal yet" and timeouts; callers handle these routinely.
    /// Everything else is a programming or configuration fault.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::InsufficientTrainingData { .. }
                | AnalysisError::InsufficientHistory { .. }
                | AnalysisError::TrainingTimeout { .. }
                | AnalysisError::FitTimeout { .. }
        )
    }
}

impl From<RecordError> for AnalysisError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::MalformedRecord(reason) => AnalysisError::MalformedRecord(reason),
        }
    }
}

impl From<StoreError> for AnalysisError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Record(inner) => inner.into(),
            other => AnalysisError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_record_errors_become_malformed() {
        let err: AnalysisError =
            StoreError::Record(RecordError::MalformedRecord("missing timestamp".into())).into();
        assert_eq!(err.kind(), "MalformedRecord");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_insufficient_family_is_recoverable() {
        let err = AnalysisError::InsufficientHistory {
            subject: "patient p1".into(),
            available: 3,
            required: 8,
        };
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "insufficient history for patient p1: 3 usable readings, need at least 8"
        );
    }

    #[test]
    fn test_fit_timeout_counts_models() {
        let err = AnalysisError::FitTimeout {
            elapsed: Duration::from_secs(2),
            models_fitted: 3,
        };
        assert_eq!(err.kind(), "FitTimeout");
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "anomaly fit timed out after 2s (3 models fitted)");
    }
}
