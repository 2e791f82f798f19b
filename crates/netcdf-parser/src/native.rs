//! Native NetCDF reading through libnetcdf.

use std::collections::BTreeMap;
use std::path::Path;

use netcdf::AttributeValue;
use tracing::debug;

use crate::error::{NetCdfError, NetCdfResult};
use crate::raw::{AttrValue, NcType, RawDataset, RawDimension, RawVariable};

/// Read every dimension, variable and attribute of a NetCDF file.
///
/// Values are read widened to f64; text variables are skipped.
pub fn read_native(path: &Path) -> NetCdfResult<RawDataset> {
    let file = netcdf::open(path)
        .map_err(|e| NetCdfError::InvalidFormat(format!("Failed to open NetCDF: {}", e)))?;

    let dimensions = file
        .dimensions()
        .map(|d| RawDimension {
            name: d.name(),
            len: d.len(),
            unlimited: d.is_unlimited(),
        })
        .collect();

    let mut variables = Vec::new();
    for var in file.variables() {
        let name = var.name();
        let values = match var.get_values::<f64, _>(..) {
            Ok(values) => values,
            Err(e) => {
                debug!(variable = %name, error = %e, "Skipping non-numeric variable");
                continue;
            }
        };
        let mut attributes = BTreeMap::new();
        for attr in var.attributes() {
            if let Some(value) = attr.value().ok().and_then(convert_attribute) {
                attributes.insert(attr.name().to_string(), value);
            }
        }
        variables.push(RawVariable {
            name,
            dtype: NcType::Double,
            dims: var.dimensions().iter().map(|d| d.name()).collect(),
            attributes,
            values,
            text: None,
        });
    }

    let mut attributes = BTreeMap::new();
    for attr in file.attributes() {
        if let Some(value) = attr.value().ok().and_then(convert_attribute) {
            attributes.insert(attr.name().to_string(), value);
        }
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let dataset = RawDataset {
        name,
        dimensions,
        variables,
        attributes,
    };
    dataset.validate()?;
    Ok(dataset)
}

fn convert_attribute(value: AttributeValue) -> Option<AttrValue> {
    let numbers: Vec<f64> = match value {
        AttributeValue::Str(s) => return Some(AttrValue::Text(s)),
        AttributeValue::Strs(v) => return Some(AttrValue::Text(v.join(""))),
        AttributeValue::Uchar(x) => vec![x as f64],
        AttributeValue::Uchars(v) => v.into_iter().map(f64::from).collect(),
        AttributeValue::Schar(x) => vec![x as f64],
        AttributeValue::Schars(v) => v.into_iter().map(f64::from).collect(),
        AttributeValue::Ushort(x) => vec![x as f64],
        AttributeValue::Ushorts(v) => v.into_iter().map(f64::from).collect(),
        AttributeValue::Short(x) => vec![x as f64],
        AttributeValue::Shorts(v) => v.into_iter().map(f64::from).collect(),
        AttributeValue::Uint(x) => vec![x as f64],
        AttributeValue::Uints(v) => v.into_iter().map(f64::from).collect(),
        AttributeValue::Int(x) => vec![x as f64],
        AttributeValue::Ints(v) => v.into_iter().map(f64::from).collect(),
        AttributeValue::Ulonglong(x) => vec![x as f64],
        AttributeValue::Ulonglongs(v) => v.into_iter().map(|x| x as f64).collect(),
        AttributeValue::Longlong(x) => vec![x as f64],
        AttributeValue::Longlongs(v) => v.into_iter().map(|x| x as f64).collect(),
        AttributeValue::Float(x) => vec![x as f64],
        AttributeValue::Floats(v) => v.into_iter().map(f64::from).collect(),
        AttributeValue::Double(x) => vec![x],
        AttributeValue::Doubles(v) => v,
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(AttrValue::Numbers(numbers))
}
