//! Integration test: publish datasets and tables, then read them back.

use std::fs::File;

use arrow::array::{Array, Float64Array, StringArray};
use chrono::{NaiveDate, NaiveDateTime};
use grid_common::{GriddedDataset, Provenance, SpatialGrid, Variable, ATTR_UNITS_CONVERTED_FROM};
use grid_store::{
    read_manifest, DatasetStore, OutputLayout, RetryPolicy, StoreConfig, ZarrCompression,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

fn days(n: u32) -> Vec<NaiveDateTime> {
    (1..=n)
        .map(|d| {
            NaiveDate::from_ymd_opt(2021, 1, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        })
        .collect()
}

fn sample_dataset() -> GriddedDataset {
    let grid = SpatialGrid::new(vec![2.0, 1.75, 1.5], vec![-82.0, -81.75]).unwrap();
    let n = 4 * grid.len();
    let mut data: Vec<f32> = (0..n).map(|i| i as f32 * 0.5).collect();
    data[3] = f32::NAN;

    let mut ds = GriddedDataset::with_variables(
        days(4),
        grid,
        [
            Variable::new("tp", data).with_units("m"),
            Variable::new("t2m", vec![26.85; n])
                .with_units("degC")
                .with_attribute(ATTR_UNITS_CONVERTED_FROM, "K"),
        ],
    )
    .unwrap();
    ds.set_attribute("region", "Ecuador");
    ds
}

#[test]
fn test_zarr_roundtrip_preserves_everything() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let store = DatasetStore::new(StoreConfig::uncompressed(), RetryPolicy::none());

    let ds = sample_dataset();
    let path = layout.daily_path("Ecuador", 2021, &ds.variable_names());
    store.publish_dataset(&ds, &path).unwrap();

    let back = store.load(&path).unwrap();
    assert_eq!(back.times(), ds.times());
    assert_eq!(back.grid(), ds.grid());
    assert_eq!(back.variable_names(), vec!["t2m".to_string(), "tp".to_string()]);

    let tp = back.variable("tp").unwrap();
    let orig = ds.variable("tp").unwrap();
    assert_eq!(tp.units.as_deref(), Some("m"));
    for (a, b) in tp.data.iter().zip(&orig.data) {
        assert!(a == b || (a.is_nan() && b.is_nan()));
    }

    let t2m = back.variable("t2m").unwrap();
    assert_eq!(t2m.converted_from(), Some("K"));
    assert_eq!(back.attributes()["region"], "Ecuador");
    assert_eq!(Provenance::from_attributes(back.attributes()), Some(Provenance::default()));
}

#[test]
fn test_compressed_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compressed.zarr");
    let config = StoreConfig {
        compression: ZarrCompression::BloscLz4,
        time_chunk: 3,
        ..Default::default()
    };
    let store = DatasetStore::new(config, RetryPolicy::none());

    let ds = sample_dataset();
    store.publish_dataset(&ds, &path).unwrap();
    let back = store.load(&path).unwrap();
    assert_eq!(back.variable("t2m").unwrap().data, ds.variable("t2m").unwrap().data);
}

#[test]
fn test_find_daily_by_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let store = DatasetStore::new(StoreConfig::uncompressed(), RetryPolicy::none());

    let ds = sample_dataset();
    let tp_only = ds.select(&["tp"]).unwrap();
    let t2m_only = ds.select(&["t2m"]).unwrap();
    let tp_path = layout.daily_path("Ecuador", 2021, &tp_only.variable_names());
    let t2m_path = layout.daily_path("Ecuador", 2021, &t2m_only.variable_names());
    store.publish_dataset(&tp_only, &tp_path).unwrap();
    store.publish_dataset(&t2m_only, &t2m_path).unwrap();

    assert_eq!(read_manifest(&tp_path).unwrap(), vec!["tp".to_string()]);
    assert_eq!(layout.find_daily("Ecuador", 2021, "t2m").unwrap(), Some(t2m_path));
    assert_eq!(layout.find_daily("Ecuador", 2021, "tp").unwrap(), Some(tp_path));
    assert_eq!(layout.find_daily("Ecuador", 2021, "u10").unwrap(), None);
    assert_eq!(layout.find_daily("Ecuador", 2022, "tp").unwrap(), None);
}

#[test]
fn test_republish_replaces_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Ecuador/monthly/2021_tp.zarr");
    let store = DatasetStore::new(StoreConfig::uncompressed(), RetryPolicy::none());

    let ds = sample_dataset();
    store.publish_dataset(&ds, &path).unwrap();
    let tp_only = ds.select(&["tp"]).unwrap();
    store.publish_dataset(&tp_only, &path).unwrap();

    assert_eq!(read_manifest(&path).unwrap(), vec!["tp".to_string()]);
    let siblings = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
    assert_eq!(siblings, 1);
}

#[test]
fn test_tabular_parquet_readback() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let store = DatasetStore::new(StoreConfig::uncompressed(), RetryPolicy::none());

    let ds = sample_dataset();
    let tp_only = ds.select(&["tp"]).unwrap();
    let t2m_only = ds.select(&["t2m"]).unwrap();
    let path = layout.tabular_path("Ecuador", 2021);
    store.publish_tabular(&[&tp_only, &t2m_only], &path).unwrap();

    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap())
        .unwrap()
        .build()
        .unwrap();
    let batches: Vec<_> = reader.collect::<Result<Vec<_>, _>>().unwrap();
    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    assert_eq!(rows, 4 * 6);

    let batch = &batches[0];
    let schema = batch.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["time", "lat", "lon", "t2m", "tp"]);

    let time = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
    let lat = batch.column(1).as_any().downcast_ref::<Float64Array>().unwrap();
    let tp = batch.column(4).as_any().downcast_ref::<Float64Array>().unwrap();
    assert_eq!(time.value(0), "2021-01-01");
    assert_eq!(lat.value(0), 1.5);
    // Flat index 3 is (t=0, lat=1.75, lon=-81.75): row 3 in (lat asc, lon asc) order.
    assert!(tp.is_null(3));
    assert_eq!(tp.null_count(), 1);
}
