//! Error types for raster export.

use std::path::PathBuf;

use grid_common::{ErrorClass, GridError};
use grid_store::StoreError;
use thiserror::Error;

/// Result type alias using RasterError.
pub type RasterResult<T> = Result<T, RasterError>;

/// Errors that can occur while exporting or reading rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{variable}' at time index {index} holds the nodata value {nodata}")]
    NodataCollision {
        variable: String,
        index: usize,
        nodata: f32,
    },

    #[error("missing or malformed georeferencing: {0}")]
    Georeference(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RasterError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RasterError::Grid(e) => e.class(),
            RasterError::Io { .. } => ErrorClass::Io,
            RasterError::Store(e) => e.class(),
            RasterError::NodataCollision { .. } => ErrorClass::Conversion,
            RasterError::Tiff(_) | RasterError::Georeference(_) => ErrorClass::Other,
        }
    }
}
