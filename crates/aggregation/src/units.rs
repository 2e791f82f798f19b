//! Per-variable unit conversion applied before monthly reduction.

use std::collections::BTreeMap;

use grid_common::{GridError, GriddedDataset, ATTR_UNITS_CONVERTED_FROM};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AggregationError, Result};

fn default_scale() -> f64 {
    1.0
}

/// Linear conversion `value * scale + offset` for one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub variable: String,
    pub from_units: String,
    pub to_units: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl UnitConversion {
    /// Kelvin to degrees Celsius.
    pub fn kelvin_to_celsius(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            from_units: "K".to_string(),
            to_units: "degC".to_string(),
            scale: 1.0,
            offset: -273.15,
        }
    }

    /// Convert one value; NaN stays NaN.
    pub fn convert(&self, value: f32) -> f32 {
        (value as f64 * self.scale + self.offset) as f32
    }
}

/// Conversions keyed by variable name.
///
/// Variables without an entry pass through unconverted.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitConversionTable {
    entries: BTreeMap<String, UnitConversion>,
}

impl Default for UnitConversionTable {
    fn default() -> Self {
        Self::from_entries(default_conversions())
    }
}

/// The built-in table: `t2m` from K to degC.
pub fn default_conversions() -> Vec<UnitConversion> {
    vec![UnitConversion::kelvin_to_celsius("t2m")]
}

impl UnitConversionTable {
    /// Build a table, rejecting two entries for the same variable.
    pub fn new(conversions: impl IntoIterator<Item = UnitConversion>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for conv in conversions {
            if entries.contains_key(&conv.variable) {
                return Err(GridError::schema(format!(
                    "duplicate unit conversion for '{}'",
                    conv.variable
                ))
                .into());
            }
            entries.insert(conv.variable.clone(), conv);
        }
        Ok(Self { entries })
    }

    fn from_entries(conversions: Vec<UnitConversion>) -> Self {
        Self {
            entries: conversions
                .into_iter()
                .map(|c| (c.variable.clone(), c))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, variable: &str) -> Option<&UnitConversion> {
        self.entries.get(variable)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert every variable of `dataset` that has an entry, in place.
    ///
    /// The units recorded on each variable decide what happens:
    /// - marked with `units_converted_from`: [`AggregationError::AlreadyConverted`]
    /// - equal to `from_units`: converted, units and marker updated
    /// - equal to `to_units` with no marker: left alone
    /// - anything else, or missing: [`AggregationError::UnitMismatch`]
    ///
    /// Returns the names of the variables that were converted.
    pub fn apply(&self, dataset: &mut GriddedDataset) -> Result<Vec<String>> {
        let mut converted = Vec::new();
        for name in dataset.variable_names() {
            let Some(conv) = self.entries.get(&name) else {
                continue;
            };
            let Some(var) = dataset.variable(&name) else {
                continue;
            };

            if let Some(from) = var.converted_from() {
                return Err(AggregationError::AlreadyConverted {
                    variable: name,
                    from: from.to_string(),
                });
            }

            match var.units.as_deref() {
                Some(units) if units == conv.from_units => {
                    let mut var = var.clone();
                    var.data.iter_mut().for_each(|v| *v = conv.convert(*v));
                    var.units = Some(conv.to_units.clone());
                    var.attributes
                        .insert(ATTR_UNITS_CONVERTED_FROM.to_string(), conv.from_units.clone());
                    dataset.replace_variable(var)?;
                    info!(
                        variable = %name,
                        from = %conv.from_units,
                        to = %conv.to_units,
                        "Converted units"
                    );
                    converted.push(name);
                }
                Some(units) if units == conv.to_units => {
                    debug!(variable = %name, units, "Already in target units");
                }
                other => {
                    return Err(AggregationError::UnitMismatch {
                        variable: name,
                        expected: conv.from_units.clone(),
                        found: other.map(str::to_string),
                    });
                }
            }
        }
        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use grid_common::{SpatialGrid, Variable};

    fn dataset(units: Option<&str>, value: f32) -> GriddedDataset {
        let grid = SpatialGrid::new(vec![0.0, 1.0], vec![0.0]).unwrap();
        let t = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut var = Variable::new("t2m", vec![value, f32::NAN]);
        var.units = units.map(str::to_string);
        GriddedDataset::with_variables(
            vec![t],
            grid,
            [var, Variable::new("tp", vec![1.0, 2.0]).with_units("m")],
        )
        .unwrap()
    }

    #[test]
    fn test_kelvin_to_celsius() {
        let mut ds = dataset(Some("K"), 300.0);
        let converted = UnitConversionTable::default().apply(&mut ds).unwrap();
        assert_eq!(converted, vec!["t2m".to_string()]);

        let t2m = ds.variable("t2m").unwrap();
        assert_relative_eq!(t2m.data[0], 26.85, epsilon = 1e-4);
        assert!(t2m.data[1].is_nan());
        assert_eq!(t2m.units.as_deref(), Some("degC"));
        assert_eq!(t2m.converted_from(), Some("K"));

        // tp has no entry
        assert_eq!(ds.variable("tp").unwrap().data, vec![1.0, 2.0]);
    }

    #[test]
    fn test_second_application_is_rejected() {
        let table = UnitConversionTable::default();
        let mut ds = dataset(Some("K"), 300.0);
        table.apply(&mut ds).unwrap();

        let err = table.apply(&mut ds).unwrap_err();
        assert!(matches!(err, AggregationError::AlreadyConverted { .. }));
        assert_relative_eq!(ds.value("t2m", 0, 0, 0).unwrap(), 26.85, epsilon = 1e-4);
    }

    #[test]
    fn test_target_units_pass_through() {
        let mut ds = dataset(Some("degC"), 20.0);
        let converted = UnitConversionTable::default().apply(&mut ds).unwrap();
        assert!(converted.is_empty());
        assert_eq!(ds.value("t2m", 0, 0, 0), Some(20.0));
    }

    #[test]
    fn test_unknown_units_rejected() {
        let mut ds = dataset(None, 300.0);
        let err = UnitConversionTable::default().apply(&mut ds).unwrap_err();
        assert!(matches!(err, AggregationError::UnitMismatch { found: None, .. }));
    }

    #[test]
    fn test_duplicate_entries_rejected() {
        let err = UnitConversionTable::new([
            UnitConversion::kelvin_to_celsius("t2m"),
            UnitConversion::kelvin_to_celsius("t2m"),
        ])
        .unwrap_err();
        assert!(matches!(err, AggregationError::Grid(GridError::Schema(_))));
        assert!(UnitConversionTable::empty().is_empty());
    }
}
