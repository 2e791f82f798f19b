//! Integration test: export a dataset to GeoTIFFs and read them back.

use grid_common::{CrsCode, GriddedDataset, SpatialGrid, Variable};
use grid_store::{OutputLayout, RetryPolicy};
use raster::{read_geotiff, RasterConfig, RasterExporter};
use test_utils::{create_test_grid, date};

fn monthly_dataset() -> GriddedDataset {
    // Ascending latitude on purpose; the exporter must flip it.
    let grid = SpatialGrid::new(vec![-6.0, -5.75, -5.5], vec![-82.0, -81.75, -81.5, -81.25])
        .unwrap();
    let months: Vec<_> = (1..=3).map(|m| date(2021, m, 1)).collect();
    let mut data = Vec::new();
    for m in 0..months.len() {
        data.extend(create_test_grid(4, 3).iter().map(|v| v + m as f32 * 0.5));
    }
    data[5] = f32::NAN;
    GriddedDataset::with_variables(months, grid, [Variable::new("t2m", data).with_units("degC")])
        .unwrap()
}

#[test]
fn test_export_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let exporter = RasterExporter::new(RasterConfig::default(), RetryPolicy::none());

    let ds = monthly_dataset();
    let paths = exporter.export(&ds, "t2m", &layout, "Ecuador", 2021).unwrap();
    assert_eq!(paths.len(), 3);
    assert!(paths[0].ends_with("Ecuador/TIF/t2m/2021/2021_01.tif"));
    assert!(paths[2].ends_with("Ecuador/TIF/t2m/2021/2021_03.tif"));

    let first = read_geotiff(&paths[0]).unwrap();
    assert_eq!((first.width, first.height), (4, 3));
    assert_eq!(first.crs(), Some(CrsCode::Epsg4326));
    assert_eq!(first.nodata, Some(-999.0));

    let t = first.transform;
    assert_eq!((t.origin_x, t.origin_y), (-82.0, -5.5));
    assert_eq!(t.pixel_width, 0.25);
    assert_eq!(t.pixel_height, -0.25);

    // Raster row 0 is the northernmost dataset row (index 2).
    for row in 0..3 {
        for col in 0..4 {
            let expected = ds.value("t2m", 0, 2 - row, col).unwrap();
            let got = first.get(row, col).unwrap();
            if expected.is_nan() {
                assert_eq!(got.to_bits(), (-999.0f32).to_bits());
            } else {
                assert_eq!(got.to_bits(), expected.to_bits());
            }
        }
    }

    let third = read_geotiff(&paths[2]).unwrap();
    assert_eq!(third.get(2, 1), Some(1001.0));
}

#[test]
fn test_re_export_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let exporter = RasterExporter::default();

    let ds = monthly_dataset();
    exporter.export(&ds, "t2m", &layout, "Ecuador", 2021).unwrap();
    let paths = exporter.export(&ds, "t2m", &layout, "Ecuador", 2021).unwrap();

    let files = std::fs::read_dir(paths[0].parent().unwrap()).unwrap().count();
    assert_eq!(files, 3);
}

#[test]
fn test_unknown_variable() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let err = RasterExporter::default()
        .export(&monthly_dataset(), "tp", &layout, "Ecuador", 2021)
        .unwrap_err();
    assert_eq!(err.class(), grid_common::ErrorClass::Schema);
    assert!(!dir.path().join("Ecuador").exists());
}
