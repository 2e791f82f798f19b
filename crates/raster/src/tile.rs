//! A single georeferenced raster band.

use grid_common::{CrsCode, GridError, RasterTransform};

use crate::error::RasterResult;

/// One band of float32 samples, row 0 northernmost, column 0 westernmost.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
    pub transform: RasterTransform,
    /// Sentinel stored in `data` wherever there is no value.
    pub nodata: f32,
    pub crs: CrsCode,
}

impl RasterTile {
    pub fn new(
        rows: usize,
        cols: usize,
        data: Vec<f32>,
        transform: RasterTransform,
        nodata: f32,
        crs: CrsCode,
    ) -> RasterResult<Self> {
        if data.len() != rows * cols {
            return Err(GridError::ShapeMismatch {
                name: "raster tile".to_string(),
                expected: rows * cols,
                got: data.len(),
            }
            .into());
        }
        Ok(Self {
            rows,
            cols,
            data,
            transform,
            nodata,
            crs,
        })
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(row * self.cols + col).copied()
    }

    /// Whether the sample at `(row, col)` is the nodata sentinel.
    pub fn is_nodata(&self, row: usize, col: usize) -> bool {
        self.get(row, col)
            .is_some_and(|v| v.to_bits() == self.nodata.to_bits())
    }

    /// Samples that are not the nodata sentinel.
    pub fn valid_count(&self) -> usize {
        let bits = self.nodata.to_bits();
        self.data.iter().filter(|v| v.to_bits() != bits).count()
    }
}
