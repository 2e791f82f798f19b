//! One GeoTIFF per time step of a dataset variable.

use std::path::PathBuf;

use grid_common::{AxisOrder, CrsCode, GridError, GriddedDataset, RasterTransform};
use grid_store::{publish_file, OutputLayout, RetryPolicy, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{RasterError, RasterResult};
use crate::geotiff::encode_geotiff;
use crate::tile::RasterTile;

/// Nodata sentinel; far outside any physical value of the exported variables.
pub const DEFAULT_NODATA: f32 = -999.0;

/// Raster export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Directory name of the raster product under each region.
    pub product: String,
    pub nodata: f32,
    pub crs: CrsCode,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            product: "TIF".to_string(),
            nodata: DEFAULT_NODATA,
            crs: CrsCode::default(),
        }
    }
}

impl RasterConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.product.is_empty() || self.product.contains(['/', '\\']) {
            return Err(format!("invalid raster product name '{}'", self.product));
        }
        if !self.nodata.is_finite() {
            return Err("raster nodata must be a finite number".to_string());
        }
        Ok(())
    }
}

/// Writes the time slices of one variable as single-band GeoTIFFs.
#[derive(Debug, Clone, Default)]
pub struct RasterExporter {
    config: RasterConfig,
    retry: RetryPolicy,
}

impl RasterExporter {
    pub fn new(config: RasterConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    pub fn config(&self) -> &RasterConfig {
        &self.config
    }

    /// Build one tile per time index of `variable`.
    ///
    /// Rows run north to south and columns west to east whatever the
    /// dataset's axis order. The transform is derived from the grid on every
    /// call. NaN becomes the nodata sentinel; a real value equal to the
    /// sentinel is an error.
    pub fn tiles(&self, dataset: &GriddedDataset, variable: &str) -> RasterResult<Vec<RasterTile>> {
        let selected = dataset.select(&[variable])?.with_lat_descending();
        let grid = selected.grid();
        let transform = RasterTransform::from_grid(grid)?;
        let flip_lon = grid.lon_order() == AxisOrder::Descending;
        let (rows, cols) = (grid.nlat(), grid.nlon());
        let nodata = self.config.nodata;

        let mut tiles = Vec::with_capacity(selected.ntime());
        for t in 0..selected.ntime() {
            let slice = selected
                .slice(variable, t)
                .ok_or_else(|| GridError::schema(format!("variable '{}' not found", variable)))?;

            let mut data = Vec::with_capacity(slice.len());
            for row in slice.chunks_exact(cols) {
                let mut push = |v: f32| -> RasterResult<()> {
                    if v.is_nan() {
                        data.push(nodata);
                    } else if v == nodata {
                        return Err(RasterError::NodataCollision {
                            variable: variable.to_string(),
                            index: t,
                            nodata,
                        });
                    } else {
                        data.push(v);
                    }
                    Ok(())
                };
                if flip_lon {
                    row.iter().rev().try_for_each(|&v| push(v))?;
                } else {
                    row.iter().try_for_each(|&v| push(v))?;
                }
            }

            tiles.push(RasterTile::new(
                rows,
                cols,
                data,
                transform,
                nodata,
                self.config.crs,
            )?);
        }
        Ok(tiles)
    }

    /// Export every time step of `variable` under
    /// `{region}/{product}/{variable}/{year}/`, files numbered from 01.
    #[instrument(skip(self, dataset, layout))]
    pub fn export(
        &self,
        dataset: &GriddedDataset,
        variable: &str,
        layout: &OutputLayout,
        region: &str,
        year: i32,
    ) -> RasterResult<Vec<PathBuf>> {
        let tiles = self.tiles(dataset, variable)?;
        let mut paths = Vec::with_capacity(tiles.len());

        for (index, tile) in tiles.iter().enumerate() {
            let bytes = encode_geotiff(tile)?;
            let path =
                layout.raster_path(region, &self.config.product, variable, year, index);
            publish_file(&path, &self.retry, |staging| {
                std::fs::write(staging, &bytes).map_err(|e| StoreError::io(staging, e))
            })?;
            debug!(path = %path.display(), valid = tile.valid_count(), "Raster written");
            paths.push(path);
        }

        info!(
            variable,
            tiles = paths.len(),
            product = %self.config.product,
            "Rasters exported"
        );
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_common::{SpatialGrid, Variable};
    use test_utils::date;

    fn dataset(lat: Vec<f64>, lon: Vec<f64>, values: Vec<f32>) -> GriddedDataset {
        let grid = SpatialGrid::new(lat, lon).unwrap();
        GriddedDataset::with_variables(
            vec![date(2020, 1, 1)],
            grid,
            [Variable::new("tp", values)],
        )
        .unwrap()
    }

    #[test]
    fn test_transform_for_two_by_two() {
        let ds = dataset(vec![10.0, 9.0], vec![100.0, 101.0], vec![1.0, 2.0, 3.0, 4.0]);
        let tiles = RasterExporter::default().tiles(&ds, "tp").unwrap();
        let t = tiles[0].transform;
        assert_eq!((t.origin_x, t.origin_y), (100.0, 10.0));
        assert_eq!(t.pixel_width, 1.0);
        assert_eq!(t.pixel_height, -1.0);
        assert_eq!(tiles[0].data, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_ascending_lat_and_descending_lon_reordered() {
        // lat ascending [9, 10], lon descending [101, 100]
        let ds = dataset(vec![9.0, 10.0], vec![101.0, 100.0], vec![1.0, 2.0, 3.0, 4.0]);
        let tiles = RasterExporter::default().tiles(&ds, "tp").unwrap();
        // north row first (lat 10: [3, 4] at lon [101, 100]), then west to east
        assert_eq!(tiles[0].data, vec![4.0, 3.0, 2.0, 1.0]);
        assert_eq!(tiles[0].transform.origin_y, 10.0);
    }

    #[test]
    fn test_nan_becomes_nodata() {
        let ds = dataset(vec![10.0, 9.0], vec![100.0, 101.0], vec![f32::NAN, 2.0, 3.0, 4.0]);
        let tiles = RasterExporter::default().tiles(&ds, "tp").unwrap();
        assert!(tiles[0].is_nodata(0, 0));
        assert_eq!(tiles[0].valid_count(), 3);
    }

    #[test]
    fn test_nodata_collision() {
        let ds = dataset(vec![10.0, 9.0], vec![100.0, 101.0], vec![-999.0, 2.0, 3.0, 4.0]);
        let err = RasterExporter::default().tiles(&ds, "tp").unwrap_err();
        assert!(matches!(err, RasterError::NodataCollision { index: 0, .. }));
    }

    #[test]
    fn test_single_row_grid_rejected() {
        let ds = dataset(vec![10.0], vec![100.0, 101.0], vec![1.0, 2.0]);
        let err = RasterExporter::default().tiles(&ds, "tp").unwrap_err();
        assert!(matches!(err, RasterError::Grid(_)));
    }

    #[test]
    fn test_config_validation() {
        assert!(RasterConfig::default().validate().is_ok());
        let bad = RasterConfig {
            product: "a/b".into(),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
