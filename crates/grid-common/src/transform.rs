//! Affine transform from raster pixel indices to world coordinates.

use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};
use crate::grid::SpatialGrid;

/// North-up affine transform for a regular lat/lon grid.
///
/// Maps `(row, col)` to `(lon, lat)`:
///
/// ```text
/// lon = origin_x + col * pixel_width
/// lat = origin_y + row * pixel_height
/// ```
///
/// `pixel_width` is positive and `pixel_height` is negative, because raster
/// row 0 is the northernmost row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl RasterTransform {
    /// Transform from a west/north origin and positive pixel sizes.
    pub fn from_origin(west: f64, north: f64, x_size: f64, y_size: f64) -> Self {
        Self {
            origin_x: west,
            origin_y: north,
            pixel_width: x_size.abs(),
            pixel_height: -y_size.abs(),
        }
    }

    /// Derive the transform from a grid.
    ///
    /// Origin is `(min lon, max lat)`; pixel sizes are the coordinate extent
    /// divided by the number of intervals on each axis. The grid's spacing
    /// is re-checked so a hand-built grid cannot yield a skewed transform.
    pub fn from_grid(grid: &SpatialGrid) -> GridResult<Self> {
        crate::grid::check_axis("latitude", grid.lat())?;
        crate::grid::check_axis("longitude", grid.lon())?;
        // Rejects single-row or single-column grids.
        grid.pixel_size()?;

        let bbox = grid.bbox();
        let x_size = bbox.width() / (grid.nlon() - 1) as f64;
        let y_size = bbox.height() / (grid.nlat() - 1) as f64;

        if !(x_size > 0.0 && y_size > 0.0) {
            return Err(GridError::irregular(
                "grid",
                format!("degenerate pixel size ({}, {})", x_size, y_size),
            ));
        }

        Ok(Self::from_origin(bbox.min_x, bbox.max_y, x_size, y_size))
    }

    /// World coordinates `(lon, lat)` of a pixel position.
    pub fn apply(&self, row: f64, col: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y + row * self.pixel_height,
        )
    }

    /// Pixel position `(row, col)` of world coordinates.
    pub fn invert(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lat - self.origin_y) / self.pixel_height,
            (lon - self.origin_x) / self.pixel_width,
        )
    }

    /// GDAL geotransform ordering `[x0, dx, 0, y0, 0, dy]`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            0.0,
            self.origin_y,
            0.0,
            self.pixel_height,
        ]
    }
}
