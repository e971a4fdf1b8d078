//! Error types for the reconciliation job.
use std::path::PathBuf;
use thiserror::Error;

/// Everything that can stop a run.
///
/// There is no recovery: any of these aborts the job where it happened,
/// and files written by earlier stages stay on disk.
#[derive(Error, Debug)]
pub enum JobError {
    /// A value or document could not be understood.
    #[error("{source_name}: {message}")]
    DataFormat {
        source_name: String,
        message: String,
    },

    /// The facility identifier field is missing on one side of the join.
    #[error("{side} has no '{field}' field to join on")]
    JoinKey { side: String, field: String },

    /// A backing store, layer or input file can't be opened.
    #[error("could not open {what} at {}", path.display())]
    SourceUnavailable { what: String, path: PathBuf },

    /// Bad configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The external interpolation service failed.
    #[error("interpolation failed: {0}")]
    Interpolation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl JobError {
    /// Shorthand for a [`JobError::DataFormat`] against a named source.
    pub fn data_format(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataFormat {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::SourceUnavailable {
            what: what.into(),
            path: path.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
