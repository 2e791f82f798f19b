//! Error types for the grid model.

use thiserror::Error;

/// Result type alias using GridError.
pub type GridResult<T> = Result<T, GridError>;

/// Coarse failure classes used when reporting a failed unit of work.
///
/// Schema and grid-irregularity failures are never retried; IO failures may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Schema,
    GridIrregularity,
    Io,
    Conversion,
    Other,
}

impl ErrorClass {
    /// Whether a failure of this class may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Io)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Schema => "schema",
            ErrorClass::GridIrregularity => "grid_irregularity",
            ErrorClass::Io => "io",
            ErrorClass::Conversion => "conversion",
            ErrorClass::Other => "other",
        }
    }
}

/// Errors raised while building or validating gridded data.
#[derive(Debug, Error)]
pub enum GridError {
    // === Schema Errors ===
    #[error("schema error: {0}")]
    Schema(String),

    #[error("variable '{0}' collides with a coordinate name")]
    NameCollision(String),

    #[error("shape mismatch for '{name}': expected {expected} values, got {got}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid time axis: {0}")]
    InvalidTime(String),

    // === Grid Errors ===
    #[error("irregular {axis} axis: {message}")]
    GridIrregularity { axis: String, message: String },
}

impl GridError {
    /// Create a Schema error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a GridIrregularity error for the named axis.
    pub fn irregular(axis: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::GridIrregularity {
            axis: axis.into(),
            message: msg.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            GridError::GridIrregularity { .. } => ErrorClass::GridIrregularity,
            _ => ErrorClass::Schema,
        }
    }
}
