//! Error types for dataset persistence.

use std::path::PathBuf;

use grid_common::{ErrorClass, GridError};
use thiserror::Error;

/// Errors that can occur while persisting or loading datasets.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem error at a known path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Zarr format error.
    #[error("Zarr format error: {0}")]
    Zarr(String),

    /// Parquet/Arrow error.
    #[error("Parquet error: {0}")]
    Parquet(String),

    /// Invalid metadata in a stored dataset.
    #[error("invalid dataset metadata: {0}")]
    InvalidMetadata(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Stored data violates the grid model.
    #[error(transparent)]
    Grid(#[from] GridError),
}

impl StoreError {
    /// Create an Io error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a Zarr error.
    pub fn zarr(msg: impl ToString) -> Self {
        Self::Zarr(msg.to_string())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::Io { .. } | StoreError::Zarr(_) | StoreError::Parquet(_) => ErrorClass::Io,
            StoreError::InvalidMetadata(_) => ErrorClass::Schema,
            StoreError::Config(_) => ErrorClass::Other,
            StoreError::Grid(e) => e.class(),
        }
    }

    /// Whether a retry of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io { .. })
    }
}

impl From<parquet::errors::ParquetError> for StoreError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Self::Parquet(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for StoreError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Parquet(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
