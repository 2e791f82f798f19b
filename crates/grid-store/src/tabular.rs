//! Denormalized tabular export (one row per time/lat/lon, one column per variable).

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use chrono::{NaiveDateTime, Timelike};
use grid_common::GriddedDataset;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{StoreError, StoreResult};

/// f64 ordered by `total_cmp`, for use in row keys.
#[derive(Debug, Clone, Copy)]
struct Coord(f64);

impl PartialEq for Coord {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Coord {}

impl PartialOrd for Coord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Coord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

type RowKey = (NaiveDateTime, Coord, Coord);

/// Rows keyed by (time, lat, lon) with one optional value per column.
#[derive(Debug, Clone, Default)]
pub struct TabularTable {
    columns: Vec<String>,
    rows: BTreeMap<RowKey, Vec<Option<f64>>>,
}

impl TabularTable {
    /// Outer-join the variables of `datasets` on (time, lat, lon).
    ///
    /// Variable names must be unique across datasets. NaN values and keys
    /// absent from a dataset become nulls.
    pub fn from_datasets(datasets: &[&GriddedDataset]) -> StoreResult<Self> {
        let mut columns: Vec<String> = Vec::new();
        for ds in datasets {
            for name in ds.variable_names() {
                if columns.contains(&name) {
                    return Err(StoreError::invalid_metadata(format!(
                        "variable '{}' appears in more than one dataset",
                        name
                    )));
                }
                columns.push(name);
            }
        }
        columns.sort();

        let width = columns.len();
        let mut rows: BTreeMap<RowKey, Vec<Option<f64>>> = BTreeMap::new();
        for ds in datasets {
            let grid = ds.grid();
            for var in ds.variables() {
                let col = columns
                    .iter()
                    .position(|c| *c == var.name)
                    .ok_or_else(|| StoreError::invalid_metadata("column lookup failed"))?;
                for (t, time) in ds.times().iter().enumerate() {
                    for (r, &lat) in grid.lat().iter().enumerate() {
                        for (c, &lon) in grid.lon().iter().enumerate() {
                            let idx = t * grid.len() + grid.flat_index(r, c);
                            let value = var.data[idx];
                            let row = rows
                                .entry((*time, Coord(lat), Coord(lon)))
                                .or_insert_with(|| vec![None; width]);
                            row[col] = (!value.is_nan()).then_some(value as f64);
                        }
                    }
                }
            }
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn schema(&self) -> Schema {
        let mut fields = vec![
            Field::new("time", DataType::Utf8, false),
            Field::new("lat", DataType::Float64, false),
            Field::new("lon", DataType::Float64, false),
        ];
        for name in &self.columns {
            fields.push(Field::new(name, DataType::Float64, true));
        }
        Schema::new(fields)
    }

    /// Convert into a single Arrow [`RecordBatch`], rows ordered by (time, lat, lon).
    pub fn to_record_batch(&self) -> StoreResult<RecordBatch> {
        let times: Vec<String> = self.rows.keys().map(|(t, _, _)| format_time(*t)).collect();
        let lats: Vec<f64> = self.rows.keys().map(|(_, lat, _)| lat.0).collect();
        let lons: Vec<f64> = self.rows.keys().map(|(_, _, lon)| lon.0).collect();

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(times)),
            Arc::new(Float64Array::from(lats)),
            Arc::new(Float64Array::from(lons)),
        ];
        for i in 0..self.columns.len() {
            let values: Vec<Option<f64>> = self.rows.values().map(|row| row[i]).collect();
            columns.push(Arc::new(Float64Array::from(values)));
        }

        Ok(RecordBatch::try_new(Arc::new(self.schema()), columns)?)
    }

    /// Write the table to a Parquet file at `path`.
    pub fn write_parquet(&self, path: &Path) -> StoreResult<()> {
        let batch = self.to_record_batch()?;
        let file = std::fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }
}

/// Date only for midnight labels, full timestamp otherwise.
fn format_time(t: NaiveDateTime) -> String {
    if t.num_seconds_from_midnight() == 0 {
        t.format("%Y-%m-%d").to_string()
    } else {
        t.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}
