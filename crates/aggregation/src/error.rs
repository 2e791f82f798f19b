//! Error types for the aggregation crate.

use grid_common::{ErrorClass, GridError};
use grid_store::StoreError;
use netcdf_parser::NetCdfError;
use thiserror::Error;

/// Errors that can occur while normalizing or aggregating datasets.
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("Failed to read raw dataset: {0}")]
    Parse(#[from] NetCdfError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("grid of input '{input}' does not match the other inputs of its variable set")]
    GridMismatch { input: String },

    #[error("variable '{variable}' was already converted from '{from}'")]
    AlreadyConverted { variable: String, from: String },

    #[error("variable '{variable}' has units {found:?}, conversion expects '{expected}'")]
    UnitMismatch {
        variable: String,
        expected: String,
        found: Option<String>,
    },

    #[error("no input samples to aggregate")]
    EmptyInput,
}

impl AggregationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AggregationError::Grid(e) => e.class(),
            AggregationError::Parse(e) if e.is_transient() => ErrorClass::Io,
            AggregationError::Parse(NetCdfError::CommandError(_)) => ErrorClass::Io,
            AggregationError::Parse(_) => ErrorClass::Schema,
            AggregationError::Store(e) => e.class(),
            AggregationError::AlreadyConverted { .. } | AggregationError::UnitMismatch { .. } => {
                ErrorClass::Conversion
            }
            AggregationError::GridMismatch { .. } | AggregationError::EmptyInput => {
                ErrorClass::Schema
            }
        }
    }

    /// Whether a retry of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AggregationError::Parse(e) => e.is_transient(),
            AggregationError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregationError>;
