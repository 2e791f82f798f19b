//! Common test fixtures for the reanalysis pipeline.
//!
//! Raw inputs are produced as CDL text, the format `ncdump` emits, so tests
//! exercise the same parser the pipeline uses on real files without needing
//! binary NetCDF fixtures.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::generators::date;

/// Region bounding boxes as `[north, west, south, east]` request areas.
pub mod area {
    /// Ecuador.
    pub const ECUADOR: [f64; 4] = [2.0, -82.0, -6.0, -74.0];

    /// A 2x2 cell box used by end-to-end tests.
    pub const TINY: [f64; 4] = [10.0, 100.0, 9.0, 101.0];
}

/// Builder for an ERA5-style raw file in CDL text.
///
/// Defaults mirror what the archive delivers: a `valid_time` axis in hours
/// since 1970, descending `latitude`, ascending `longitude`, an ensemble
/// `number` scalar and an `expver` string coordinate.
#[derive(Debug, Clone)]
pub struct Era5Cdl {
    name: String,
    variables: Vec<(String, String)>,
    times: Vec<NaiveDateTime>,
    lat: Vec<f64>,
    lon: Vec<f64>,
    value: fn(usize, usize, usize, usize) -> f64,
    time_name: String,
    lon_before_lat: bool,
}

fn five(_var: usize, _t: usize, _row: usize, _col: usize) -> f64 {
    5.0
}

impl Era5Cdl {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            variables: Vec::new(),
            times: Vec::new(),
            lat: vec![10.0, 9.0],
            lon: vec![100.0, 101.0],
            value: five,
            time_name: "valid_time".to_string(),
            lon_before_lat: false,
        }
    }

    pub fn variable(mut self, name: &str, units: &str) -> Self {
        self.variables.push((name.to_string(), units.to_string()));
        self
    }

    pub fn times(mut self, times: Vec<NaiveDateTime>) -> Self {
        self.times = times;
        self
    }

    pub fn grid(mut self, lat: Vec<f64>, lon: Vec<f64>) -> Self {
        self.lat = lat;
        self.lon = lon;
        self
    }

    /// Value of variable `var` at `(t, row, col)`.
    pub fn values(mut self, value: fn(usize, usize, usize, usize) -> f64) -> Self {
        self.value = value;
        self
    }

    pub fn time_name(mut self, name: &str) -> Self {
        self.time_name = name.to_string();
        self
    }

    /// Store data variables as `(time, longitude, latitude)`.
    pub fn lon_before_lat(mut self) -> Self {
        self.lon_before_lat = true;
        self
    }

    pub fn to_cdl(&self) -> String {
        let epoch = date(1970, 1, 1);
        let t = &self.time_name;
        let mut out = String::new();

        let _ = writeln!(out, "netcdf {} {{", self.name);
        let _ = writeln!(out, "dimensions:");
        let _ = writeln!(out, "\t{} = {} ;", t, self.times.len());
        let _ = writeln!(out, "\tlatitude = {} ;", self.lat.len());
        let _ = writeln!(out, "\tlongitude = {} ;", self.lon.len());

        let _ = writeln!(out, "variables:");
        let _ = writeln!(out, "\tint64 number ;");
        let _ = writeln!(out, "\t\tnumber:long_name = \"ensemble member numerical id\" ;");
        let _ = writeln!(out, "\tint64 {}({}) ;", t, t);
        let _ = writeln!(out, "\t\t{}:units = \"seconds since 1970-01-01\" ;", t);
        let _ = writeln!(out, "\t\t{}:calendar = \"proleptic_gregorian\" ;", t);
        let _ = writeln!(out, "\tdouble latitude(latitude) ;");
        let _ = writeln!(out, "\t\tlatitude:units = \"degrees_north\" ;");
        let _ = writeln!(out, "\tdouble longitude(longitude) ;");
        let _ = writeln!(out, "\t\tlongitude:units = \"degrees_east\" ;");
        let _ = writeln!(out, "\tstring expver({}) ;", t);

        let dims = if self.lon_before_lat {
            format!("{}, longitude, latitude", t)
        } else {
            format!("{}, latitude, longitude", t)
        };
        for (name, units) in &self.variables {
            let _ = writeln!(out, "\tfloat {}({}) ;", name, dims);
            let _ = writeln!(out, "\t\t{}:_FillValue = NaNf ;", name);
            let _ = writeln!(out, "\t\t{}:units = \"{}\" ;", name, units);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "// global attributes:");
        let _ = writeln!(out, "\t\t:GRIB_centre = \"ecmf\" ;");
        let _ = writeln!(out, "\t\t:Conventions = \"CF-1.7\" ;");

        let _ = writeln!(out, "data:");
        let _ = writeln!(out, " number = 0 ;");
        let seconds: Vec<String> = self
            .times
            .iter()
            .map(|time| (*time - epoch).num_seconds().to_string())
            .collect();
        let _ = writeln!(out, " {} = {} ;", t, seconds.join(", "));
        let _ = writeln!(out, " latitude = {} ;", join(&self.lat));
        let _ = writeln!(out, " longitude = {} ;", join(&self.lon));
        let expver = vec!["\"0001\""; self.times.len()];
        let _ = writeln!(out, " expver = {} ;", expver.join(", "));

        for (v, (name, _)) in self.variables.iter().enumerate() {
            let mut values = Vec::with_capacity(self.times.len() * self.lat.len() * self.lon.len());
            for ti in 0..self.times.len() {
                if self.lon_before_lat {
                    for col in 0..self.lon.len() {
                        for row in 0..self.lat.len() {
                            values.push((self.value)(v, ti, row, col));
                        }
                    }
                } else {
                    for row in 0..self.lat.len() {
                        for col in 0..self.lon.len() {
                            values.push((self.value)(v, ti, row, col));
                        }
                    }
                }
            }
            let _ = writeln!(out, " {} = {} ;", name, join(&values));
        }
        let _ = writeln!(out, "}}");
        out
    }

    /// Write the fixture as `{dir}/{name}.cdl`.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(format!("{}.cdl", self.name));
        std::fs::write(&path, self.to_cdl())?;
        Ok(path)
    }
}

/// Comma separated values with NaN written as the CDL fill marker.
fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| {
            if v.is_nan() {
                "_".to_string()
            } else {
                v.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::hourly_times;

    #[test]
    fn test_cdl_layout() {
        let cdl = Era5Cdl::new("sample")
            .variable("tp", "m")
            .times(hourly_times(date(1970, 1, 1), 2))
            .to_cdl();
        assert!(cdl.starts_with("netcdf sample {"));
        assert!(cdl.contains("float tp(valid_time, latitude, longitude) ;"));
        assert!(cdl.contains(" valid_time = 0, 3600 ;"));
        assert!(cdl.contains(" tp = 5, 5, 5, 5, 5, 5, 5, 5 ;"));
    }

    #[test]
    fn test_write_to() {
        let dir = tempfile::tempdir().unwrap();
        let path = Era5Cdl::new("written")
            .variable("t2m", "K")
            .times(hourly_times(date(2021, 1, 1), 1))
            .write_to(dir.path())
            .unwrap();
        assert!(path.ends_with("written.cdl"));
        assert!(std::fs::read_to_string(path).unwrap().contains("t2m:units = \"K\""));
    }
}
