//! Error types for the searchnets core library.
//!
//! Uses `thiserror` for public API error types. Configuration problems,
//! missing resources and failures inside a training job are kept apart so a
//! caller can tell a bad config file from a diverged run.

use std::path::PathBuf;

/// Top-level error type for the searchnets core library.
#[derive(Debug, thiserror::Error)]
pub enum SearchnetsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors raised while building or checking a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{field} must be one of {expected}, but was {value}")]
    InvalidChoice {
        field: String,
        value: String,
        expected: String,
    },

    #[error("inconsistent configuration: {message}")]
    Inconsistent { message: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("could not load configuration: {message}")]
    Load { message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn choice(field: impl Into<String>, value: impl Into<String>, expected: &[&str]) -> Self {
        Self::InvalidChoice {
            field: field.into(),
            value: value.into(),
            expected: format!("{{{}}}", expected.join(", ")),
        }
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }
}

/// Errors from datasets, downloads and model weights on disk.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("dataset root not available: {path}")]
    DatasetRootMissing { path: PathBuf },

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("no pretrained weights for {net_name} at {path}")]
    MissingPretrainedWeights { net_name: String, path: PathBuf },

    #[error("could not read image {path}: {message}")]
    Image { path: PathBuf, message: String },

    #[error("bad record in {path} at line {line}: {message}")]
    InvalidRecord {
        path: PathBuf,
        line: u64,
        message: String,
    },
}

/// Errors raised inside a training job's epoch loop.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("loss diverged at epoch {epoch}: {loss}")]
    Diverged { epoch: usize, loss: f64 },

    #[error("network has no layer named {layer}")]
    UnknownLayer { layer: String },

    #[error("shape mismatch for {name}: expected {expected}, got {actual}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("dataset split '{split}' is empty")]
    EmptyDataset { split: String },

    #[error("backend error: {message}")]
    Backend { message: String },
}

impl TrainingError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Convenience result type for searchnets operations.
pub type Result<T> = std::result::Result<T, SearchnetsError>;
