//! Mapping raw datasets onto the canonical `(time, lat, lon)` schema.

use std::path::Path;

use chrono::NaiveDateTime;
use grid_common::{CfTimeUnits, GridError, GriddedDataset, SpatialGrid, Variable};
use netcdf_parser::{RawDataset, RawVariable};
use tracing::{debug, instrument};

use crate::error::Result;

/// Names accepted for each canonical axis, in order of preference.
#[derive(Debug, Clone)]
pub struct DimensionNormalizer {
    time_names: Vec<String>,
    lat_names: Vec<String>,
    lon_names: Vec<String>,
}

impl Default for DimensionNormalizer {
    fn default() -> Self {
        Self {
            time_names: vec!["time".into(), "valid_time".into()],
            lat_names: vec!["lat".into(), "latitude".into()],
            lon_names: vec!["lon".into(), "longitude".into()],
        }
    }
}

/// A located axis: its dimension name and coordinate values.
struct Axis<'a> {
    dim: &'a str,
    coord: &'a RawVariable,
}

impl DimensionNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also accept `name` as the time axis.
    pub fn with_time_alias(mut self, name: impl Into<String>) -> Self {
        self.time_names.push(name.into());
        self
    }

    /// Read `path` and normalize it.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn load(&self, path: &Path) -> Result<Vec<GriddedDataset>> {
        let raw = netcdf_parser::read_dataset(path)?;
        self.normalize(&raw)
    }

    /// Build the canonical datasets of `raw`.
    ///
    /// Variables spanning all three axes are kept and transposed to
    /// `(time, lat, lon)`; any extra dimension of length one is squeezed.
    /// Everything else (auxiliary coordinates such as `number` or `expver`,
    /// bounds variables) is dropped. Time labels come out sorted.
    ///
    /// A file whose time labels are unique yields one dataset. A label that
    /// repeats is split across datasets: the `k`-th occurrence of every
    /// label lands in the `k`-th dataset, so each keeps a strictly
    /// increasing time axis and the daily mean pools them as repeated
    /// samples.
    pub fn normalize(&self, raw: &RawDataset) -> Result<Vec<GriddedDataset>> {
        let time = find_axis(raw, &self.time_names, "time")?;
        let lat = find_axis(raw, &self.lat_names, "latitude")?;
        let lon = find_axis(raw, &self.lon_names, "longitude")?;

        let times = decode_times(time.coord)?;
        let grid = SpatialGrid::new(coordinate_values(lat.coord)?, coordinate_values(lon.coord)?)?;
        let slice_len = grid.len();

        // Stable sort: repeated labels keep their file order.
        let mut order: Vec<usize> = (0..times.len()).collect();
        order.sort_by_key(|&i| times[i]);
        let sorted: Vec<NaiveDateTime> = order.iter().map(|&i| times[i]).collect();
        let groups = repetition_groups(&sorted);
        if groups.len() > 1 {
            debug!(
                file = %raw.name,
                repeats = groups.len() - 1,
                "Splitting repeated time labels"
            );
        }

        let mut datasets = groups
            .iter()
            .map(|positions| {
                let times = positions.iter().map(|&p| sorted[p]).collect();
                GriddedDataset::new(times, grid.clone())
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let axis_names = [time.dim, lat.dim, lon.dim];

        for var in &raw.variables {
            if var.dtype.is_text() || axis_names.contains(&var.name.as_str()) {
                continue;
            }
            if !axis_names.iter().all(|a| var.dims.iter().any(|d| d == a)) {
                debug!(variable = %var.name, dims = ?var.dims, "Dropping auxiliary variable");
                continue;
            }

            let data = self.canonical_values(raw, var, &axis_names, &order)?;
            let mut attributes = var.descriptive_attributes();
            let units = attributes.remove("units");
            let parts = split_slices(data, &groups, slice_len);
            for (dataset, data) in datasets.iter_mut().zip(parts) {
                dataset.add_variable(Variable {
                    name: var.name.clone(),
                    data,
                    units: units.clone(),
                    attributes: attributes.clone(),
                })?;
            }
        }

        if datasets.iter().all(|ds| ds.variable_names().is_empty()) {
            return Err(GridError::schema(format!(
                "'{}' has no variable over (time, latitude, longitude)",
                raw.name
            ))
            .into());
        }

        let globals = raw.global_attributes_text();
        for dataset in &mut datasets {
            dataset.extend_attributes(globals.clone());
        }
        debug!(
            variables = ?datasets.first().map(|ds| ds.variable_names()),
            time_steps = sorted.len(),
            datasets = datasets.len(),
            "Normalized dataset"
        );
        Ok(datasets)
    }

    /// Unpacked values of `var` laid out as `(time, lat, lon)`, with time
    /// slices in the order given by `order`.
    fn canonical_values(
        &self,
        raw: &RawDataset,
        var: &RawVariable,
        axis_names: &[&str; 3],
        order: &[usize],
    ) -> Result<Vec<f32>> {
        let shape = raw.shape(var)?;

        for (dim, &len) in var.dims.iter().zip(&shape) {
            if !axis_names.contains(&dim.as_str()) && len != 1 {
                return Err(GridError::schema(format!(
                    "variable '{}' has extra dimension '{}' of length {}; dropping it would lose an axis",
                    var.name, dim, len
                ))
                .into());
            }
        }

        let mut strides = vec![1usize; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        let stride_of = |axis: &str| {
            var.dims
                .iter()
                .position(|d| d == axis)
                .map(|p| (strides[p], shape[p]))
        };
        let (Some((st, nt)), Some((sy, ny)), Some((sx, nx))) = (
            stride_of(axis_names[0]),
            stride_of(axis_names[1]),
            stride_of(axis_names[2]),
        ) else {
            return Err(GridError::schema(format!("variable '{}' lacks an axis", var.name)).into());
        };
        if nt != order.len() {
            return Err(GridError::ShapeMismatch {
                name: var.name.clone(),
                expected: order.len(),
                got: nt,
            }
            .into());
        }

        let values = var.unpacked();
        let mut data = Vec::with_capacity(nt * ny * nx);
        for &t in order {
            for y in 0..ny {
                for x in 0..nx {
                    data.push(values[t * st + y * sy + x * sx] as f32);
                }
            }
        }
        Ok(data)
    }
}

/// Positions of a sorted time axis grouped so that no group repeats a
/// label: group `k` holds the `k`-th occurrence of every label.
fn repetition_groups(sorted: &[NaiveDateTime]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = vec![Vec::new()];
    let mut run = 0;
    for (p, t) in sorted.iter().enumerate() {
        run = if p > 0 && sorted[p - 1] == *t { run + 1 } else { 0 };
        if run == groups.len() {
            groups.push(Vec::new());
        }
        groups[run].push(p);
    }
    groups
}

/// Copy the time slices of `data` at each group's positions.
fn split_slices(data: Vec<f32>, groups: &[Vec<usize>], slice_len: usize) -> Vec<Vec<f32>> {
    if groups.len() == 1 {
        return vec![data];
    }
    groups
        .iter()
        .map(|positions| {
            positions
                .iter()
                .flat_map(|&p| data[p * slice_len..(p + 1) * slice_len].iter().copied())
                .collect()
        })
        .collect()
}

fn find_axis<'a>(raw: &'a RawDataset, names: &[String], label: &str) -> Result<Axis<'a>> {
    for name in names {
        if let Some(dim) = raw.dimension(name) {
            let coord = raw.variable(name).ok_or_else(|| {
                GridError::schema(format!("{} dimension '{}' has no coordinate variable", label, name))
            })?;
            return Ok(Axis {
                dim: &dim.name,
                coord,
            });
        }
    }
    Err(GridError::schema(format!(
        "no {} axis found (looked for {})",
        label,
        names.join(", ")
    ))
    .into())
}

fn coordinate_values(coord: &RawVariable) -> Result<Vec<f64>> {
    let values = coord.unpacked();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(GridError::schema(format!(
            "coordinate '{}' has missing values",
            coord.name
        ))
        .into());
    }
    Ok(values)
}

fn decode_times(coord: &RawVariable) -> Result<Vec<NaiveDateTime>> {
    let units = coord.units().ok_or_else(|| {
        GridError::schema(format!("time coordinate '{}' has no units", coord.name))
    })?;
    let units = CfTimeUnits::parse(units, coord.attr_str("calendar"))?;
    let times = coord
        .unpacked()
        .into_iter()
        .map(|v| units.decode(v))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AggregationError;
    use netcdf_parser::parse_cdl;

    const ERA5: &str = r#"netcdf era5 {
dimensions:
    valid_time = 3 ;
    latitude = 2 ;
    longitude = 2 ;
variables:
    int64 number ;
        number:long_name = "ensemble member numerical id" ;
    int64 valid_time(valid_time) ;
        valid_time:units = "hours since 2020-01-01 00:00:00" ;
        valid_time:calendar = "proleptic_gregorian" ;
    double latitude(latitude) ;
    double longitude(longitude) ;
    string expver(valid_time) ;
    float t2m(valid_time, latitude, longitude) ;
        t2m:units = "K" ;
        t2m:_FillValue = -9999.f ;
// global attributes:
        :Conventions = "CF-1.7" ;
data:
 number = 0 ;
 valid_time = 2, 0, 1 ;
 latitude = 10, 9 ;
 longitude = 100, 101 ;
 expver = "0001", "0001", "0001" ;
 t2m = 21, 22, 23, 24,
       1, 2, 3, 4,
       11, 12, -9999, 14 ;
}
"#;

    #[test]
    fn test_era5_names_and_time_sort() {
        let raw = parse_cdl(ERA5).unwrap();
        let ds = DimensionNormalizer::new().normalize(&raw).unwrap().remove(0);

        assert_eq!(ds.variable_names(), vec!["t2m".to_string()]);
        assert_eq!(ds.ntime(), 3);
        assert_eq!(ds.times()[0].to_string(), "2020-01-01 00:00:00");
        assert_eq!(ds.grid().lat(), &[10.0, 9.0]);

        let t2m = ds.variable("t2m").unwrap();
        assert_eq!(t2m.units.as_deref(), Some("K"));
        assert_eq!(&t2m.data[..4], &[1.0, 2.0, 3.0, 4.0]);
        assert!(t2m.data[6].is_nan());
        assert_eq!(&t2m.data[8..], &[21.0, 22.0, 23.0, 24.0]);
        assert_eq!(ds.attributes()["Conventions"], "CF-1.7");
    }

    #[test]
    fn test_transposes_lon_lat_order() {
        let cdl = r#"netcdf swapped {
dimensions:
    time = 1 ;
    lat = 2 ;
    lon = 3 ;
variables:
    double time(time) ;
        time:units = "days since 2020-06-01" ;
    double lat(lat) ;
    double lon(lon) ;
    float tp(time, lon, lat) ;
data:
 time = 0 ;
 lat = 0, 1 ;
 lon = 0, 1, 2 ;
 tp = 1, 2, 3, 4, 5, 6 ;
}
"#;
        let ds = DimensionNormalizer::new()
            .normalize(&parse_cdl(cdl).unwrap())
            .unwrap()
            .remove(0);
        // (lon, lat) storage [[1,2],[3,4],[5,6]] becomes (lat, lon) [[1,3,5],[2,4,6]]
        assert_eq!(ds.variable("tp").unwrap().data, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_squeezes_singleton_dimension() {
        let cdl = r#"netcdf squeezed {
dimensions:
    time = 2 ;
    expver = 1 ;
    lat = 1 ;
    lon = 2 ;
variables:
    double time(time) ;
        time:units = "hours since 2020-01-01" ;
    double lat(lat) ;
    double lon(lon) ;
    float tp(time, expver, lat, lon) ;
data:
 time = 0, 1 ;
 lat = 5 ;
 lon = 0, 0.25 ;
 tp = 1, 2, 3, 4 ;
}
"#;
        let ds = DimensionNormalizer::new()
            .normalize(&parse_cdl(cdl).unwrap())
            .unwrap()
            .remove(0);
        assert_eq!(ds.variable("tp").unwrap().data, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_rejects_extra_axis() {
        let cdl = r#"netcdf ensemble {
dimensions:
    time = 1 ;
    number = 2 ;
    lat = 1 ;
    lon = 1 ;
variables:
    double time(time) ;
        time:units = "hours since 2020-01-01" ;
    double lat(lat) ;
    double lon(lon) ;
    float tp(time, number, lat, lon) ;
data:
 time = 0 ;
 lat = 5 ;
 lon = 0 ;
 tp = 1, 2 ;
}
"#;
        let err = DimensionNormalizer::new()
            .normalize(&parse_cdl(cdl).unwrap())
            .unwrap_err();
        assert!(matches!(err, AggregationError::Grid(GridError::Schema(_))));
    }

    #[test]
    fn test_missing_time_axis() {
        let cdl = r#"netcdf notime {
dimensions:
    step = 1 ;
    lat = 1 ;
    lon = 1 ;
variables:
    double step(step) ;
    double lat(lat) ;
    double lon(lon) ;
    float tp(step, lat, lon) ;
data:
 step = 0 ;
 lat = 0 ;
 lon = 0 ;
 tp = 1 ;
}
"#;
        let err = DimensionNormalizer::new()
            .normalize(&parse_cdl(cdl).unwrap())
            .unwrap_err();
        assert_eq!(err.class(), grid_common::ErrorClass::Schema);

        let ds = DimensionNormalizer::new()
            .with_time_alias("step")
            .normalize(&parse_cdl(&cdl.replace("double step(step) ;", "double step(step) ;\n        step:units = \"hours since 2020-01-01\" ;")).unwrap())
            .unwrap()
            .remove(0);
        assert_eq!(ds.ntime(), 1);
    }

    #[test]
    fn test_irregular_grid() {
        let cdl = r#"netcdf irregular {
dimensions:
    time = 1 ;
    lat = 1 ;
    lon = 3 ;
variables:
    double time(time) ;
        time:units = "hours since 2020-01-01" ;
    double lat(lat) ;
    double lon(lon) ;
    float tp(time, lat, lon) ;
data:
 time = 0 ;
 lat = 0 ;
 lon = 0, 1, 3 ;
 tp = 1, 2, 3 ;
}
"#;
        let err = DimensionNormalizer::new()
            .normalize(&parse_cdl(cdl).unwrap())
            .unwrap_err();
        assert_eq!(err.class(), grid_common::ErrorClass::GridIrregularity);
    }

    #[test]
    fn test_repeated_times_pool_in_daily_mean() {
        let cdl = r#"netcdf repeated {
dimensions:
    time = 3 ;
    lat = 1 ;
    lon = 2 ;
variables:
    double time(time) ;
        time:units = "hours since 2020-01-01" ;
    double lat(lat) ;
    double lon(lon) ;
    float tp(time, lat, lon) ;
        tp:units = "m" ;
data:
 time = 0, 1, 1 ;
 lat = 0 ;
 lon = 0, 1 ;
 tp = 1, 1, 2, 2, 4, 4 ;
}
"#;
        let datasets = DimensionNormalizer::new()
            .normalize(&parse_cdl(cdl).unwrap())
            .unwrap();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].ntime(), 2);
        assert_eq!(datasets[0].variable("tp").unwrap().data, vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(datasets[1].times(), &datasets[0].times()[1..]);
        assert_eq!(datasets[1].variable("tp").unwrap().data, vec![4.0, 4.0]);
        assert_eq!(datasets[1].variable("tp").unwrap().units.as_deref(), Some("m"));

        let out = crate::daily::DailyAggregator::default()
            .aggregate(&datasets)
            .unwrap();
        let tp = out.datasets[0].variable("tp").unwrap();
        assert_eq!(out.datasets[0].ntime(), 1);
        for v in &tp.data {
            assert!((v - 7.0 / 3.0).abs() < 1e-6, "{}", v);
        }
    }

    #[test]
    fn test_repetition_groups() {
        let start = chrono::NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let t = |h: i64| start + chrono::Duration::hours(h);
        let sorted = [t(0), t(0), t(0), t(1), t(2), t(2)];
        assert_eq!(
            repetition_groups(&sorted),
            vec![vec![0, 3, 4], vec![1, 5], vec![2]]
        );
        assert_eq!(repetition_groups(&[]), vec![Vec::<usize>::new()]);
    }
}
