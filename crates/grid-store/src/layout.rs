//! Output tree layout.
//!
//! ```text
//! {root}/{region}/daily/{year}_{var1}_{var2}.zarr
//! {root}/{region}/monthly/{year}_{var}.zarr
//! {root}/tabular/{region}_{year}.parquet
//! {root}/{region}/{product}/{var}/{year}/{year}_{NN}.tif
//! ```

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::publish::is_staging_name;
use crate::zarr::read_manifest;

/// Paths of every artifact the pipeline publishes under one root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn daily_dir(&self, region: &str) -> PathBuf {
        self.root.join(region).join("daily")
    }

    /// Daily dataset keyed by the variables it holds, in the given order.
    pub fn daily_path(&self, region: &str, year: i32, variables: &[String]) -> PathBuf {
        self.daily_dir(region)
            .join(format!("{}_{}.zarr", year, variables.join("_")))
    }

    pub fn monthly_path(&self, region: &str, year: i32, variable: &str) -> PathBuf {
        self.root
            .join(region)
            .join("monthly")
            .join(format!("{}_{}.zarr", year, variable))
    }

    pub fn tabular_path(&self, region: &str, year: i32) -> PathBuf {
        self.root
            .join("tabular")
            .join(format!("{}_{}.parquet", region, year))
    }

    pub fn raster_dir(&self, region: &str, product: &str, variable: &str, year: i32) -> PathBuf {
        self.root
            .join(region)
            .join(product)
            .join(variable)
            .join(year.to_string())
    }

    /// Raster tile for the zero-based time index `index`; files count from 01.
    pub fn raster_path(
        &self,
        region: &str,
        product: &str,
        variable: &str,
        year: i32,
        index: usize,
    ) -> PathBuf {
        self.raster_dir(region, product, variable, year)
            .join(raster_file_name(year, index))
    }

    /// Published daily datasets of `year`, sorted by path.
    ///
    /// Lists `{year}_*.zarr` in the region's daily directory, skipping
    /// staging entries.
    pub fn daily_datasets(&self, region: &str, year: i32) -> StoreResult<Vec<PathBuf>> {
        let dir = self.daily_dir(region);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}_", year);
        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| !is_staging_name(p))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".zarr"))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Find the published daily dataset of `year` holding `variable`.
    ///
    /// Checks the variable manifest of each [`daily_datasets`](Self::daily_datasets)
    /// entry. Returns `None` when no dataset holds it.
    pub fn find_daily(
        &self,
        region: &str,
        year: i32,
        variable: &str,
    ) -> StoreResult<Option<PathBuf>> {
        for path in self.daily_datasets(region, year)? {
            let manifest = read_manifest(&path)?;
            if manifest.iter().any(|v| v == variable) {
                debug!(path = %path.display(), variable, "Found daily dataset");
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

pub fn raster_file_name(year: i32, index: usize) -> String {
    format!("{}_{:02}.tif", year, index + 1)
}
