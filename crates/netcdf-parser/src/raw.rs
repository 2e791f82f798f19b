//! Backend-independent view of a NetCDF file.

use std::collections::BTreeMap;

use crate::error::{NetCdfError, NetCdfResult};

/// NetCDF external data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcType {
    Byte,
    UByte,
    Char,
    Short,
    UShort,
    Int,
    UInt,
    Int64,
    UInt64,
    Float,
    Double,
    String,
}

impl NcType {
    /// Parse a CDL type keyword.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "byte" => Some(NcType::Byte),
            "ubyte" => Some(NcType::UByte),
            "char" => Some(NcType::Char),
            "short" => Some(NcType::Short),
            "ushort" => Some(NcType::UShort),
            "int" | "long" | "integer" => Some(NcType::Int),
            "uint" => Some(NcType::UInt),
            "int64" => Some(NcType::Int64),
            "uint64" => Some(NcType::UInt64),
            "float" | "real" => Some(NcType::Float),
            "double" => Some(NcType::Double),
            "string" => Some(NcType::String),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, NcType::Char | NcType::String)
    }
}

/// Attribute value: text, or a list of numbers widened to f64.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Numbers(Vec<f64>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Numbers(_) => None,
        }
    }

    /// First number of a numeric attribute.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Numbers(v) => v.first().copied(),
            AttrValue::Text(_) => None,
        }
    }

    /// Render as a string (numbers comma separated).
    pub fn to_text(&self) -> String {
        match self {
            AttrValue::Text(s) => s.clone(),
            AttrValue::Numbers(v) => v
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDimension {
    pub name: String,
    pub len: usize,
    pub unlimited: bool,
}

/// A variable as stored, before any packing is undone.
#[derive(Debug, Clone, PartialEq)]
pub struct RawVariable {
    pub name: String,
    pub dtype: NcType,
    pub dims: Vec<String>,
    pub attributes: BTreeMap<String, AttrValue>,
    /// Stored values in row-major order; NaN where the file holds a fill marker.
    pub values: Vec<f64>,
    /// Text content of char/string variables.
    pub text: Option<String>,
}

impl RawVariable {
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(AttrValue::as_str)
    }

    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        self.attr(name).and_then(AttrValue::as_f64)
    }

    pub fn units(&self) -> Option<&str> {
        self.attr_str("units")
    }

    /// Values with `_FillValue`/`missing_value` mapped to NaN and
    /// `scale_factor`/`add_offset` applied.
    pub fn unpacked(&self) -> Vec<f64> {
        let fill = self.attr_f64("_FillValue");
        let missing = self.attr_f64("missing_value");
        let scale = self.attr_f64("scale_factor").unwrap_or(1.0);
        let offset = self.attr_f64("add_offset").unwrap_or(0.0);

        self.values
            .iter()
            .map(|&v| {
                if v.is_nan() || Some(v) == fill || Some(v) == missing {
                    f64::NAN
                } else {
                    v * scale + offset
                }
            })
            .collect()
    }

    /// Attributes that remain meaningful once values are unpacked.
    pub fn descriptive_attributes(&self) -> BTreeMap<String, String> {
        self.attributes
            .iter()
            .filter(|(k, _)| {
                !matches!(
                    k.as_str(),
                    "_FillValue" | "missing_value" | "scale_factor" | "add_offset"
                )
            })
            .map(|(k, v)| (k.clone(), v.to_text()))
            .collect()
    }
}

/// Dimensions, variables and global attributes of one NetCDF file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDataset {
    pub name: String,
    pub dimensions: Vec<RawDimension>,
    pub variables: Vec<RawVariable>,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl RawDataset {
    pub fn dimension(&self, name: &str) -> Option<&RawDimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&RawVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Shape of a variable from its dimension lengths.
    pub fn shape(&self, var: &RawVariable) -> NetCdfResult<Vec<usize>> {
        var.dims
            .iter()
            .map(|d| {
                self.dimension(d).map(|dim| dim.len).ok_or_else(|| {
                    NetCdfError::MissingData(format!(
                        "dimension '{}' of variable '{}'",
                        d, var.name
                    ))
                })
            })
            .collect()
    }

    /// Check every numeric variable holds exactly as many values as its shape.
    pub fn validate(&self) -> NetCdfResult<()> {
        for var in &self.variables {
            if var.dtype.is_text() {
                continue;
            }
            let expected: usize = self.shape(var)?.iter().product();
            if var.values.len() != expected {
                return Err(NetCdfError::InvalidFormat(format!(
                    "variable '{}' has {} values, dimensions imply {}",
                    var.name,
                    var.values.len(),
                    expected
                )));
            }
        }
        Ok(())
    }

    pub fn global_attributes_text(&self) -> BTreeMap<String, String> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_text()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed() -> RawVariable {
        RawVariable {
            name: "t2m".into(),
            dtype: NcType::Short,
            dims: vec!["time".into()],
            attributes: BTreeMap::from([
                ("scale_factor".to_string(), AttrValue::Numbers(vec![0.5])),
                ("add_offset".to_string(), AttrValue::Numbers(vec![270.0])),
                ("_FillValue".to_string(), AttrValue::Numbers(vec![-32767.0])),
                ("units".to_string(), AttrValue::Text("K".into())),
            ]),
            values: vec![0.0, 10.0, -32767.0, f64::NAN],
            text: None,
        }
    }

    #[test]
    fn test_unpack_applies_packing() {
        let out = packed().unpacked();
        assert_eq!(out[0], 270.0);
        assert_eq!(out[1], 275.0);
        assert!(out[2].is_nan());
        assert!(out[3].is_nan());
    }

    #[test]
    fn test_descriptive_attributes_drop_packing() {
        let attrs = packed().descriptive_attributes();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs["units"], "K");
    }

    #[test]
    fn test_validate_counts() {
        let ds = RawDataset {
            dimensions: vec![RawDimension {
                name: "time".into(),
                len: 3,
                unlimited: true,
            }],
            variables: vec![packed()],
            ..Default::default()
        };
        assert!(ds.validate().is_err());
    }
}
