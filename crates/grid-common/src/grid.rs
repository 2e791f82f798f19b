//! Regular latitude/longitude grids.

use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};
use crate::BoundingBox;

/// Relative tolerance used when comparing consecutive coordinate differences.
///
/// Coordinates often arrive as float32 and are widened to f64, so decimal
/// steps such as 0.1° pick up noise around 1e-7 of the step.
pub const SPACING_TOLERANCE: f64 = 1e-4;

/// Direction in which an axis' values run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisOrder {
    Ascending,
    Descending,
}

/// Latitude and longitude sequences of a regular grid.
///
/// Both sequences are strictly monotonic (either direction) with uniform
/// spacing. Construction fails for anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialGrid {
    lat: Vec<f64>,
    lon: Vec<f64>,
}

impl SpatialGrid {
    /// Create a grid, validating both axes.
    pub fn new(lat: Vec<f64>, lon: Vec<f64>) -> GridResult<Self> {
        check_axis("latitude", &lat)?;
        check_axis("longitude", &lon)?;
        Ok(Self { lat, lon })
    }

    pub fn lat(&self) -> &[f64] {
        &self.lat
    }

    pub fn lon(&self) -> &[f64] {
        &self.lon
    }

    /// Number of latitude rows.
    pub fn nlat(&self) -> usize {
        self.lat.len()
    }

    /// Number of longitude columns.
    pub fn nlon(&self) -> usize {
        self.lon.len()
    }

    /// Number of grid cells in one time slice.
    pub fn len(&self) -> usize {
        self.nlat() * self.nlon()
    }

    pub fn is_empty(&self) -> bool {
        self.lat.is_empty() || self.lon.is_empty()
    }

    /// Direction of the latitude axis. A single row counts as descending.
    pub fn lat_order(&self) -> AxisOrder {
        axis_order(&self.lat)
    }

    /// Direction of the longitude axis. A single column counts as ascending.
    pub fn lon_order(&self) -> AxisOrder {
        match axis_order(&self.lon) {
            AxisOrder::Descending if self.lon.len() < 2 => AxisOrder::Ascending,
            order => order,
        }
    }

    /// Positive pixel sizes `(x, y)` as `(|lon[1]-lon[0]|, |lat[1]-lat[0]|)`.
    ///
    /// Requires at least two points on each axis.
    pub fn pixel_size(&self) -> GridResult<(f64, f64)> {
        if self.lon.len() < 2 {
            return Err(GridError::irregular(
                "longitude",
                "at least two points are needed to derive a pixel size",
            ));
        }
        if self.lat.len() < 2 {
            return Err(GridError::irregular(
                "latitude",
                "at least two points are needed to derive a pixel size",
            ));
        }
        Ok((
            (self.lon[1] - self.lon[0]).abs(),
            (self.lat[1] - self.lat[0]).abs(),
        ))
    }

    /// Bounding box of the grid point coordinates.
    pub fn bbox(&self) -> BoundingBox {
        let (min_x, max_x) = min_max(&self.lon);
        let (min_y, max_y) = min_max(&self.lat);
        BoundingBox::new(min_x, min_y, max_x, max_y)
    }

    /// Copy of this grid with the latitude axis reversed.
    pub fn with_lat_reversed(&self) -> Self {
        let mut lat = self.lat.clone();
        lat.reverse();
        Self {
            lat,
            lon: self.lon.clone(),
        }
    }

    /// Copy of this grid with the longitude axis reversed.
    pub fn with_lon_reversed(&self) -> Self {
        let mut lon = self.lon.clone();
        lon.reverse();
        Self {
            lat: self.lat.clone(),
            lon,
        }
    }

    /// Whether `other` describes the same points within the spacing tolerance.
    pub fn matches(&self, other: &SpatialGrid) -> bool {
        same_axis(&self.lat, &other.lat) && same_axis(&self.lon, &other.lon)
    }

    /// Flat index of `(row, col)` within one time slice (row-major).
    pub fn flat_index(&self, row: usize, col: usize) -> usize {
        row * self.nlon() + col
    }
}

fn axis_order(values: &[f64]) -> AxisOrder {
    if values.len() >= 2 && values[1] > values[0] {
        AxisOrder::Ascending
    } else {
        AxisOrder::Descending
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

fn same_axis(a: &[f64], b: &[f64]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let step = if a.len() >= 2 { (a[1] - a[0]).abs() } else { 1.0 };
    a.iter()
        .zip(b)
        .all(|(x, y)| (x - y).abs() <= SPACING_TOLERANCE * step)
}

/// Validate that an axis is non-empty, finite, strictly monotonic and
/// uniformly spaced.
pub fn check_axis(name: &str, values: &[f64]) -> GridResult<()> {
    if values.is_empty() {
        return Err(GridError::irregular(name, "axis has no points"));
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(GridError::irregular(
            name,
            format!("non-finite coordinate {}", bad),
        ));
    }
    if values.len() < 2 {
        return Ok(());
    }

    let step = values[1] - values[0];
    if step == 0.0 {
        return Err(GridError::irregular(
            name,
            "consecutive coordinates are equal",
        ));
    }

    for (i, pair) in values.windows(2).enumerate() {
        let diff = pair[1] - pair[0];
        if (diff - step).abs() > SPACING_TOLERANCE * step.abs() {
            return Err(GridError::irregular(
                name,
                format!(
                    "spacing {} between points {} and {} differs from {}",
                    diff,
                    i,
                    i + 1,
                    step
                ),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_grid_accepted() {
        let grid = SpatialGrid::new(vec![2.0, 1.75, 1.5], vec![-82.0, -81.75]).unwrap();
        assert_eq!(grid.nlat(), 3);
        assert_eq!(grid.nlon(), 2);
        assert_eq!(grid.lat_order(), AxisOrder::Descending);
        assert_eq!(grid.lon_order(), AxisOrder::Ascending);
        assert_eq!(grid.pixel_size().unwrap(), (0.25, 0.25));
    }

    #[test]
    fn test_non_uniform_spacing_rejected() {
        let err = SpatialGrid::new(vec![0.0, 1.0, 3.0], vec![10.0, 11.0]).unwrap_err();
        assert!(matches!(err, GridError::GridIrregularity { .. }));

        let err = SpatialGrid::new(vec![0.0, 1.0], vec![0.0, 1.0, 3.0]).unwrap_err();
        assert!(matches!(err, GridError::GridIrregularity { ref axis, .. } if axis == "longitude"));
    }

    #[test]
    fn test_non_monotonic_rejected() {
        assert!(SpatialGrid::new(vec![0.0, 1.0, 0.0], vec![0.0]).is_err());
        assert!(SpatialGrid::new(vec![1.0, 1.0], vec![0.0]).is_err());
    }

    #[test]
    fn test_float32_noise_tolerated() {
        let lat: Vec<f64> = (0..40).map(|i| (i as f32 * 0.1_f32 - 2.0) as f64).collect();
        assert!(SpatialGrid::new(lat, vec![0.0, 0.1]).is_ok());
    }

    #[test]
    fn test_pixel_size_requires_two_points() {
        let grid = SpatialGrid::new(vec![5.0], vec![1.0, 2.0]).unwrap();
        assert!(grid.pixel_size().is_err());
    }

    #[test]
    fn test_bbox_and_reverse() {
        let grid = SpatialGrid::new(vec![9.0, 10.0], vec![100.0, 101.0]).unwrap();
        let bbox = grid.bbox();
        assert_eq!((bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y), (100.0, 9.0, 101.0, 10.0));

        let flipped = grid.with_lat_reversed();
        assert_eq!(flipped.lat(), &[10.0, 9.0]);
        assert!(!grid.matches(&flipped));
        assert!(grid.matches(&grid.clone()));
    }
}
