//! Durable storage for pipeline artifacts.
//!
//! Gridded datasets are persisted as Zarr V3 groups, the combined daily table
//! as Parquet. Every write goes through [`publish`] so a stage's output only
//! appears at its final path once it is complete.

pub mod config;
pub mod error;
pub mod layout;
pub mod publish;
pub mod tabular;
pub mod zarr;

use std::path::Path;

use grid_common::GriddedDataset;
use tracing::{info, instrument};

pub use config::{StoreConfig, ZarrCompression};
pub use error::{StoreError, StoreResult};
pub use layout::{raster_file_name, OutputLayout};
pub use publish::{ensure_dir, publish_dir, publish_file, RetryPolicy};
pub use tabular::TabularTable;
pub use zarr::{read_dataset, read_manifest, ZarrDatasetStore, ATTR_VARIABLES};

/// Zarr writer plus retry policy: the one entry point stages use to persist.
#[derive(Debug, Clone, Default)]
pub struct DatasetStore {
    zarr: ZarrDatasetStore,
    retry: RetryPolicy,
}

impl DatasetStore {
    pub fn new(config: StoreConfig, retry: RetryPolicy) -> Self {
        Self {
            zarr: ZarrDatasetStore::new(config),
            retry,
        }
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Atomically publish `dataset` at `path`.
    #[instrument(skip(self, dataset), fields(path = %path.display()))]
    pub fn publish_dataset(&self, dataset: &GriddedDataset, path: &Path) -> StoreResult<()> {
        publish_dir(path, &self.retry, |staging| self.zarr.write(dataset, staging))?;
        info!(
            variables = ?dataset.variable_names(),
            time_steps = dataset.ntime(),
            "Dataset published"
        );
        Ok(())
    }

    /// Atomically publish the outer join of `datasets` as Parquet at `path`.
    #[instrument(skip(self, datasets), fields(path = %path.display()))]
    pub fn publish_tabular(&self, datasets: &[&GriddedDataset], path: &Path) -> StoreResult<()> {
        let table = TabularTable::from_datasets(datasets)?;
        publish_file(path, &self.retry, |staging| table.write_parquet(staging))?;
        info!(rows = table.num_rows(), columns = ?table.columns(), "Table published");
        Ok(())
    }

    /// Load a published dataset, retrying transient read failures.
    pub fn load(&self, path: &Path) -> StoreResult<GriddedDataset> {
        self.retry.run("load_dataset", || read_dataset(path))
    }
}
