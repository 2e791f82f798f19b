//! Test data generators for synthetic reanalysis-like data.
//!
//! These generators create predictable, verifiable time axes, grids and
//! datasets that can be used across the test suite.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use grid_common::{GriddedDataset, SpatialGrid, Variable};

/// Midnight of the given date.
///
/// # Panics
///
/// On an invalid date; test inputs are expected to be valid.
pub fn date(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid test date")
}

/// `count` hourly timestamps starting at `start`.
pub fn hourly_times(start: NaiveDateTime, count: usize) -> Vec<NaiveDateTime> {
    (0..count)
        .map(|h| start + Duration::hours(h as i64))
        .collect()
}

/// Every hour of a calendar year.
pub fn hours_of_year(year: i32) -> Vec<NaiveDateTime> {
    let start = date(year, 1, 1);
    let end = date(year + 1, 1, 1);
    hourly_times(start, (end - start).num_hours() as usize)
}

/// Midnight of every day of a calendar year.
pub fn days_of_year(year: i32) -> Vec<NaiveDateTime> {
    let start = date(year, 1, 1);
    let end = date(year + 1, 1, 1);
    (0..(end - start).num_days())
        .map(|d| start + Duration::days(d))
        .collect()
}

/// A regular grid with latitude descending from `north` and longitude
/// ascending from `west`, the orientation reanalysis archives deliver.
///
/// # Example
///
/// ```
/// use test_utils::regular_grid;
///
/// let grid = regular_grid(2.0, -82.0, 0.25, 3, 4);
/// assert_eq!(grid.lat(), &[2.0, 1.75, 1.5]);
/// assert_eq!(grid.lon()[3], -81.25);
/// ```
pub fn regular_grid(north: f64, west: f64, step: f64, nlat: usize, nlon: usize) -> SpatialGrid {
    let lat = (0..nlat).map(|i| north - i as f64 * step).collect();
    let lon = (0..nlon).map(|i| west + i as f64 * step).collect();
    SpatialGrid::new(lat, lon).expect("regular test grid")
}

/// A single-variable dataset holding `value` everywhere.
pub fn constant_dataset(
    name: &str,
    units: &str,
    value: f32,
    times: Vec<NaiveDateTime>,
    grid: SpatialGrid,
) -> GriddedDataset {
    let n = times.len() * grid.len();
    GriddedDataset::with_variables(
        times,
        grid,
        [Variable::new(name, vec![value; n]).with_units(units)],
    )
    .expect("constant test dataset")
}

/// Creates a `(lat, lon)` slice with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read/written correctly
/// and that rows or columns were not flipped.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50); // 10 * 5
/// assert_eq!(grid[1], 1000.0); // col=1, row=0
/// assert_eq!(grid[10], 1.0);  // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}
