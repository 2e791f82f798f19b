//! Zarr V3 persistence of gridded datasets.
//!
//! A dataset is one Zarr group:
//!
//! ```text
//! {name}.zarr/
//!   zarr.json        group; provenance, dataset attributes, "variables" manifest
//!   time/            int64 seconds since 1970-01-01 00:00:00
//!   lat/ lon/        float64 coordinates
//!   {variable}/      float32 [time, lat, lon], fill NaN
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use grid_common::{
    CfTimeUnits, GriddedDataset, Provenance, SpatialGrid, Variable, STORE_CALENDAR,
    STORE_TIME_UNITS,
};
use serde_json::{json, Map, Value};
use tracing::debug;
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs_filesystem::FilesystemStore;

use crate::config::{StoreConfig, ZarrCompression};
use crate::error::{StoreError, StoreResult};

/// Group attribute listing the variables a dataset holds.
pub const ATTR_VARIABLES: &str = "variables";

const ATTR_DIMENSIONS: &str = "_ARRAY_DIMENSIONS";
const ATTR_UNITS: &str = "units";
const ATTR_CALENDAR: &str = "calendar";

/// Reads and writes [`GriddedDataset`]s as Zarr V3 groups on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct ZarrDatasetStore {
    config: StoreConfig,
}

impl ZarrDatasetStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Write `dataset` as a new Zarr group rooted at `dir`.
    ///
    /// The provenance record is always written; dataset attributes override
    /// its defaults.
    pub fn write(&self, dataset: &GriddedDataset, dir: &Path) -> StoreResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let store = Arc::new(FilesystemStore::new(dir).map_err(StoreError::zarr)?);

        let mut attrs = Map::new();
        for (k, v) in Provenance::default().to_attributes() {
            attrs.insert(k, json!(v));
        }
        for (k, v) in dataset.attributes() {
            attrs.insert(k.clone(), json!(v));
        }
        attrs.insert(ATTR_VARIABLES.to_string(), json!(dataset.variable_names()));

        let mut group_builder = GroupBuilder::new();
        group_builder.attributes(attrs);
        let group = group_builder
            .build(store.clone(), "/")
            .map_err(StoreError::zarr)?;
        group.store_metadata().map_err(StoreError::zarr)?;

        let units = CfTimeUnits::store_default();
        let seconds: Vec<i64> = dataset
            .times()
            .iter()
            .map(|t| (*t - units.epoch).num_seconds())
            .collect();
        self.write_coordinate(
            &store,
            "/time",
            DataType::Int64,
            FillValue::from(0i64),
            &seconds,
            coordinate_attrs(
                "time",
                &[(ATTR_UNITS, STORE_TIME_UNITS), (ATTR_CALENDAR, STORE_CALENDAR)],
            ),
        )?;
        self.write_coordinate(
            &store,
            "/lat",
            DataType::Float64,
            FillValue::from(f64::NAN),
            dataset.grid().lat(),
            coordinate_attrs("lat", &[(ATTR_UNITS, "degrees_north")]),
        )?;
        self.write_coordinate(
            &store,
            "/lon",
            DataType::Float64,
            FillValue::from(f64::NAN),
            dataset.grid().lon(),
            coordinate_attrs("lon", &[(ATTR_UNITS, "degrees_east")]),
        )?;

        for var in dataset.variables() {
            self.write_variable(&store, dataset, var)?;
        }

        debug!(
            path = %dir.display(),
            variables = ?dataset.variable_names(),
            time_steps = dataset.ntime(),
            "Wrote Zarr dataset"
        );
        Ok(())
    }

    fn write_coordinate<T: zarrs::array::Element>(
        &self,
        store: &Arc<FilesystemStore>,
        path: &str,
        data_type: DataType,
        fill_value: FillValue,
        values: &[T],
        attrs: Map<String, Value>,
    ) -> StoreResult<()> {
        let len = values.len() as u64;
        let chunk_grid: zarrs::array::ChunkGrid = vec![len.max(1)]
            .try_into()
            .map_err(|e| StoreError::Config(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(vec![len], data_type, chunk_grid, fill_value);
        let array = binding
            .attributes(attrs)
            .build(store.clone(), path)
            .map_err(StoreError::zarr)?;
        array.store_metadata().map_err(StoreError::zarr)?;

        if len > 0 {
            let subset = ArraySubset::new_with_start_shape(vec![0], vec![len])
                .map_err(StoreError::zarr)?;
            array
                .store_array_subset_elements(&subset, values)
                .map_err(StoreError::zarr)?;
        }
        Ok(())
    }

    fn write_variable(
        &self,
        store: &Arc<FilesystemStore>,
        dataset: &GriddedDataset,
        var: &Variable,
    ) -> StoreResult<()> {
        let shape = vec![
            dataset.ntime() as u64,
            dataset.grid().nlat() as u64,
            dataset.grid().nlon() as u64,
        ];
        let time_chunk = self.config.time_chunk.min(dataset.ntime()).max(1) as u64;
        let chunk_grid: zarrs::array::ChunkGrid =
            vec![time_chunk, shape[1].max(1), shape[2].max(1)]
                .try_into()
                .map_err(|e| StoreError::Config(format!("{:?}", e)))?;

        let mut attrs = Map::new();
        for (k, v) in &var.attributes {
            attrs.insert(k.clone(), json!(v));
        }
        if let Some(units) = &var.units {
            attrs.insert(ATTR_UNITS.to_string(), json!(units));
        }
        attrs.insert(ATTR_DIMENSIONS.to_string(), json!(["time", "lat", "lon"]));

        let mut binding = ArrayBuilder::new(
            shape.clone(),
            DataType::Float32,
            chunk_grid,
            FillValue::from(f32::NAN),
        );
        let mut builder = binding.attributes(attrs);
        if self.config.compression != ZarrCompression::None {
            builder = builder.bytes_to_bytes_codecs(vec![self.compression_codec(4)?]);
        }
        let array = builder
            .build(store.clone(), &format!("/{}", var.name))
            .map_err(StoreError::zarr)?;
        array.store_metadata().map_err(StoreError::zarr)?;

        if !var.data.is_empty() {
            let subset = ArraySubset::new_with_start_shape(vec![0, 0, 0], shape)
                .map_err(StoreError::zarr)?;
            array
                .store_array_subset_elements(&subset, &var.data)
                .map_err(StoreError::zarr)?;
        }
        Ok(())
    }

    /// Create the compression codec based on configuration.
    fn compression_codec(
        &self,
        element_size: usize,
    ) -> StoreResult<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.config.compression_level)
            .map_err(|_| StoreError::Config("Invalid compression level".to_string()))?;

        let (shuffle, typesize) = if self.config.shuffle {
            (BloscShuffleMode::Shuffle, Some(element_size))
        } else {
            (BloscShuffleMode::NoShuffle, None)
        };

        let compressor = match self.config.compression {
            ZarrCompression::None => {
                return Err(StoreError::Config("No compression configured".to_string()))
            }
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(Arc::new(codec))
    }
}

fn coordinate_attrs(dim: &str, extra: &[(&str, &str)]) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert(ATTR_DIMENSIONS.to_string(), json!([dim]));
    for (k, v) in extra {
        attrs.insert((*k).to_string(), json!(v));
    }
    attrs
}

fn open_store(dir: &Path) -> StoreResult<Arc<FilesystemStore>> {
    if !dir.is_dir() {
        return Err(StoreError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "dataset directory not found"),
        ));
    }
    Ok(Arc::new(FilesystemStore::new(dir).map_err(StoreError::zarr)?))
}

fn string_attrs(attrs: &Map<String, Value>, skip: &[&str]) -> BTreeMap<String, String> {
    attrs
        .iter()
        .filter(|(k, _)| !skip.contains(&k.as_str()))
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}

/// Variable names recorded in a dataset's group attributes.
pub fn read_manifest(dir: &Path) -> StoreResult<Vec<String>> {
    let store = open_store(dir)?;
    let group = Group::open(store, "/").map_err(StoreError::zarr)?;
    manifest_from_attrs(group.attributes())
}

fn manifest_from_attrs(attrs: &Map<String, Value>) -> StoreResult<Vec<String>> {
    let list = attrs
        .get(ATTR_VARIABLES)
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::invalid_metadata("missing variable manifest"))?;
    list.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| StoreError::invalid_metadata("non-string entry in variable manifest"))
        })
        .collect()
}

/// Load a dataset previously written by [`ZarrDatasetStore::write`].
pub fn read_dataset(dir: &Path) -> StoreResult<GriddedDataset> {
    let store = open_store(dir)?;
    let group = Group::open(store.clone(), "/").map_err(StoreError::zarr)?;
    let names = manifest_from_attrs(group.attributes())?;

    let time_array = Array::open(store.clone(), "/time").map_err(StoreError::zarr)?;
    let units_attr = time_array
        .attributes()
        .get(ATTR_UNITS)
        .and_then(Value::as_str)
        .unwrap_or(STORE_TIME_UNITS);
    let calendar = time_array
        .attributes()
        .get(ATTR_CALENDAR)
        .and_then(Value::as_str);
    let units = CfTimeUnits::parse(units_attr, calendar)?;
    let raw_times: Vec<i64> = time_array
        .retrieve_array_subset_elements(&time_array.subset_all())
        .map_err(StoreError::zarr)?;
    let times = raw_times
        .iter()
        .map(|&s| units.decode(s as f64))
        .collect::<Result<Vec<_>, _>>()?;

    let lat = read_f64(&store, "/lat")?;
    let lon = read_f64(&store, "/lon")?;
    let grid = SpatialGrid::new(lat, lon)?;

    let mut dataset = GriddedDataset::new(times, grid)?;
    dataset.extend_attributes(string_attrs(group.attributes(), &[ATTR_VARIABLES]));

    for name in names {
        let array = Array::open(store.clone(), &format!("/{}", name)).map_err(StoreError::zarr)?;
        let data: Vec<f32> = array
            .retrieve_array_subset_elements(&array.subset_all())
            .map_err(StoreError::zarr)?;
        let attrs = array.attributes();
        dataset.add_variable(Variable {
            name: name.clone(),
            data,
            units: attrs
                .get(ATTR_UNITS)
                .and_then(Value::as_str)
                .map(str::to_string),
            attributes: string_attrs(attrs, &[ATTR_UNITS, ATTR_DIMENSIONS]),
        })?;
    }

    debug!(path = %dir.display(), variables = dataset.variable_names().len(), "Read Zarr dataset");
    Ok(dataset)
}

fn read_f64(store: &Arc<FilesystemStore>, path: &str) -> StoreResult<Vec<f64>> {
    let array = Array::open(store.clone(), path).map_err(StoreError::zarr)?;
    array
        .retrieve_array_subset_elements(&array.subset_all())
        .map_err(StoreError::zarr)
}
