//! In-memory gridded dataset addressed by (time, latitude, longitude).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{GridError, GridResult};
use crate::grid::{AxisOrder, SpatialGrid};
use crate::time::check_strictly_increasing;

/// Names reserved for coordinates; no variable may use them.
pub const COORDINATE_NAMES: &[&str] = &["time", "lat", "lon", "latitude", "longitude"];

/// Attribute recording the units a variable had before conversion.
pub const ATTR_UNITS_CONVERTED_FROM: &str = "units_converted_from";

/// A single physical variable stored as a flat `(time, lat, lon)` row-major array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub data: Vec<f32>,
    pub units: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl Variable {
    pub fn new(name: impl Into<String>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            data,
            units: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Units this variable was converted from, if a conversion was applied.
    pub fn converted_from(&self) -> Option<&str> {
        self.attributes
            .get(ATTR_UNITS_CONVERTED_FROM)
            .map(String::as_str)
    }

    /// Number of NaN values.
    pub fn missing_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_nan()).count()
    }
}

/// A named collection of variables sharing one time axis and one spatial grid.
///
/// Construction and every mutation re-check the invariants: time labels
/// strictly increasing, each variable holding exactly
/// `len(time) * len(lat) * len(lon)` values, and no variable named like a
/// coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GriddedDataset {
    times: Vec<NaiveDateTime>,
    grid: SpatialGrid,
    variables: BTreeMap<String, Variable>,
    attributes: BTreeMap<String, String>,
}

impl GriddedDataset {
    /// Create an empty dataset over the given axes.
    pub fn new(times: Vec<NaiveDateTime>, grid: SpatialGrid) -> GridResult<Self> {
        check_strictly_increasing(&times)?;
        Ok(Self {
            times,
            grid,
            variables: BTreeMap::new(),
            attributes: BTreeMap::new(),
        })
    }

    /// Create a dataset and add every variable in `variables`.
    pub fn with_variables(
        times: Vec<NaiveDateTime>,
        grid: SpatialGrid,
        variables: impl IntoIterator<Item = Variable>,
    ) -> GridResult<Self> {
        let mut ds = Self::new(times, grid)?;
        for var in variables {
            ds.add_variable(var)?;
        }
        Ok(ds)
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn ntime(&self) -> usize {
        self.times.len()
    }

    /// Values per time slice.
    pub fn slice_len(&self) -> usize {
        self.grid.len()
    }

    /// Values per variable.
    pub fn expected_len(&self) -> usize {
        self.ntime() * self.slice_len()
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Variable names in sorted order.
    pub fn variable_names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn extend_attributes(&mut self, attrs: impl IntoIterator<Item = (String, String)>) {
        self.attributes.extend(attrs);
    }

    /// Add a new variable, rejecting duplicates.
    pub fn add_variable(&mut self, var: Variable) -> GridResult<()> {
        if self.variables.contains_key(&var.name) {
            return Err(GridError::schema(format!(
                "variable '{}' already present",
                var.name
            )));
        }
        self.check_variable(&var)?;
        self.variables.insert(var.name.clone(), var);
        Ok(())
    }

    /// Replace an existing variable of the same name (or insert it).
    pub fn replace_variable(&mut self, var: Variable) -> GridResult<()> {
        self.check_variable(&var)?;
        self.variables.insert(var.name.clone(), var);
        Ok(())
    }

    fn check_variable(&self, var: &Variable) -> GridResult<()> {
        if COORDINATE_NAMES.contains(&var.name.as_str()) {
            return Err(GridError::NameCollision(var.name.clone()));
        }
        if var.data.len() != self.expected_len() {
            return Err(GridError::ShapeMismatch {
                name: var.name.clone(),
                expected: self.expected_len(),
                got: var.data.len(),
            });
        }
        Ok(())
    }

    /// The `(lat, lon)` slice of `name` at time index `t`.
    pub fn slice(&self, name: &str, t: usize) -> Option<&[f32]> {
        if t >= self.ntime() {
            return None;
        }
        let n = self.slice_len();
        self.variables
            .get(name)
            .map(|v| &v.data[t * n..(t + 1) * n])
    }

    pub fn value(&self, name: &str, t: usize, row: usize, col: usize) -> Option<f32> {
        if row >= self.grid.nlat() || col >= self.grid.nlon() {
            return None;
        }
        self.slice(name, t)
            .map(|s| s[self.grid.flat_index(row, col)])
    }

    /// A dataset holding only the named variables, keeping attributes.
    pub fn select(&self, names: &[&str]) -> GridResult<Self> {
        let mut out = Self {
            times: self.times.clone(),
            grid: self.grid.clone(),
            variables: BTreeMap::new(),
            attributes: self.attributes.clone(),
        };
        for name in names {
            let var = self
                .variables
                .get(*name)
                .ok_or_else(|| GridError::schema(format!("variable '{}' not found", name)))?;
            out.variables.insert(var.name.clone(), var.clone());
        }
        Ok(out)
    }

    /// Copy with latitude running north to south; a no-op copy when it already does.
    pub fn with_lat_descending(&self) -> Self {
        if self.grid.lat_order() == AxisOrder::Descending {
            return self.clone();
        }

        let nlat = self.grid.nlat();
        let nlon = self.grid.nlon();
        let n = self.slice_len();
        let variables = self
            .variables
            .iter()
            .map(|(name, var)| {
                let mut data = Vec::with_capacity(var.data.len());
                for slice in var.data.chunks_exact(n.max(1)) {
                    for row in (0..nlat).rev() {
                        data.extend_from_slice(&slice[row * nlon..(row + 1) * nlon]);
                    }
                }
                (
                    name.clone(),
                    Variable {
                        data,
                        ..var.clone()
                    },
                )
            })
            .collect();

        Self {
            times: self.times.clone(),
            grid: self.grid.with_lat_reversed(),
            variables,
            attributes: self.attributes.clone(),
        }
    }

    /// Re-index onto `times`, filling labels absent from this dataset with NaN.
    ///
    /// Every current label must appear in `times`.
    pub fn reindex_time(&self, times: &[NaiveDateTime]) -> GridResult<Self> {
        check_strictly_increasing(times)?;
        let n = self.slice_len();

        let mut positions = Vec::with_capacity(self.ntime());
        for t in &self.times {
            let pos = times.binary_search(t).map_err(|_| {
                GridError::InvalidTime(format!("time label {} missing from target axis", t))
            })?;
            positions.push(pos);
        }

        let variables = self
            .variables
            .iter()
            .map(|(name, var)| {
                let mut data = vec![f32::NAN; times.len() * n];
                for (src, &dst) in positions.iter().enumerate() {
                    data[dst * n..(dst + 1) * n].copy_from_slice(&var.data[src * n..(src + 1) * n]);
                }
                (
                    name.clone(),
                    Variable {
                        data,
                        ..var.clone()
                    },
                )
            })
            .collect();

        Ok(Self {
            times: times.to_vec(),
            grid: self.grid.clone(),
            variables,
            attributes: self.attributes.clone(),
        })
    }
}
