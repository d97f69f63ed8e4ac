// 🚨 Error Taxonomy - What can go wrong, and how far it propagates
//
// Recoverable conditions (a malformed row, a flaky service call, one bad pair)
// stay local to the item that hit them. Structural conditions surface as a
// PipelineError and abort the batch with a report.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// INGESTION ERRORS (rows go to quarantine, never dropped)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum IngestError {
    #[error("row {line}: organization name is empty")]
    MissingName { line: usize },

    #[error("row {line}: unknown data source '{value}'")]
    UnknownSource { line: usize, value: String },

    #[error("row {line}: field '{field}' is not a valid number: '{value}'")]
    InvalidNumber {
        line: usize,
        field: String,
        value: String,
    },

    #[error("row {line}: could not be parsed: {message}")]
    Malformed { line: usize, message: String },
}

// ============================================================================
// EXTERNAL SERVICE ERRORS (embedding + reasoning services)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("{service} is unavailable: {message}")]
    Unavailable { service: String, message: String },

    #[error("{service} timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("{service} returned HTTP {status}")]
    Status { service: String, status: u16 },

    #[error("{service} returned an unusable response: {message}")]
    BadResponse { service: String, message: String },
}

impl ServiceError {
    /// Timeouts and outages are worth another attempt; malformed answers are not
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Unavailable { .. } | ServiceError::Timeout { .. } => true,
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            ServiceError::BadResponse { .. } => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ServiceError::Timeout { .. })
    }
}

// ============================================================================
// CLASSIFIER + TRAINING ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    #[error("feature vector has {actual} values, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("model was trained on a different feature schema")]
    SchemaMismatch,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    #[error(
        "insufficient training data: {total} examples ({positives} match / {negatives} non-match), need at least {min_total} with {min_per_class} per class"
    )]
    InsufficientData {
        total: usize,
        positives: usize,
        negatives: usize,
        min_total: usize,
        min_per_class: usize,
    },

    #[error("training example {index} has {actual} features, expected {expected}")]
    InconsistentFeatures {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

// ============================================================================
// CONFIGURATION ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("decision thresholds must satisfy 0 <= non_match ({non_match}) < match ({matched}) <= 1")]
    Thresholds { non_match: f64, matched: f64 },

    #[error("'{field}' must be greater than zero")]
    Zero { field: &'static str },

    #[error("'{field}' must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("source priority table must list every data source exactly once")]
    SourcePriority,
}

// ============================================================================
// BATCH-LEVEL FAILURES (abort the run)
// ============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("blocking produced no candidate pairs for {records} records")]
    NoCandidates { records: usize },

    #[error("total service outage: embedding ({embedding}) and reasoning ({reasoning}) both failed")]
    TotalServiceOutage { embedding: String, reasoning: String },

    #[error("no deployed model and bootstrap training failed: {0}")]
    Training(#[from] TrainingError),

    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Storage(err.into())
    }
}

// ============================================================================
// TESTS
// ============================================================================
