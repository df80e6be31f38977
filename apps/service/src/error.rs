use std::io::Error as IoError;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::ServiceId;

/// Failure reading or writing the persisted record set
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: IoError,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: IoError,
    },

    #[error("Malformed record set in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize record set: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors surfaced to callers of the monitoring core
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Service not found: {0}")]
    NotFound(ServiceId),

    #[error("Invalid time of day '{0}'. Use HH:MM format.")]
    InvalidTimeOfDay(String),

    #[error("Invalid service: {0}")]
    InvalidService(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
