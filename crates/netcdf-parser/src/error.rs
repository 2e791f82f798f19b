//! Error types for raw NetCDF reading.

use thiserror::Error;

/// Result type for NetCDF parser operations.
pub type NetCdfResult<T> = Result<T, NetCdfError>;

/// Error types for NetCDF parsing.
#[derive(Error, Debug)]
pub enum NetCdfError {
    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Missing required variable or attribute
    #[error("Missing required data: {0}")]
    MissingData(String),

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    /// Command execution error (ncdump backend)
    #[error("Command execution failed: {0}")]
    CommandError(String),

    /// Malformed CDL text
    #[error("CDL syntax error at line {line}: {message}")]
    CdlSyntax { line: usize, message: String },
}

impl NetCdfError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::CdlSyntax {
            line,
            message: message.into(),
        }
    }

    /// Whether retrying the read could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, NetCdfError::IoError(_))
    }
}
