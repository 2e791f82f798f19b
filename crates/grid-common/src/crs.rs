//! Coordinate Reference System tags for emitted rasters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Geographic CRS codes a regular lat/lon grid can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CrsCode {
    /// WGS84 Geographic (lat/lon in degrees)
    #[default]
    Epsg4326,
    /// NAD83 Geographic
    Epsg4269,
}

impl CrsCode {
    /// Parse "EPSG:4326", "CRS:84" or a PROJ latlong string.
    pub fn parse(s: &str) -> Result<Self, CrsParseError> {
        let normalized = s.trim().to_uppercase();

        match normalized.as_str() {
            "EPSG:4326" | "CRS:84" | "+PROJ=LATLONG" | "+PROJ=LONGLAT" => Ok(CrsCode::Epsg4326),
            "EPSG:4269" => Ok(CrsCode::Epsg4269),
            _ => Err(CrsParseError::UnsupportedCrs(s.to_string())),
        }
    }

    /// Numeric EPSG code, written to the GeographicTypeGeoKey.
    pub fn epsg(&self) -> u16 {
        match self {
            CrsCode::Epsg4326 => 4326,
            CrsCode::Epsg4269 => 4269,
        }
    }

    /// Look up a CRS from its EPSG code.
    pub fn from_epsg(code: u16) -> Option<Self> {
        match code {
            4326 => Some(CrsCode::Epsg4326),
            4269 => Some(CrsCode::Epsg4269),
            _ => None,
        }
    }

    /// PROJ string stored alongside the raster.
    pub fn proj_string(&self) -> &'static str {
        match self {
            CrsCode::Epsg4326 => "+proj=latlong",
            CrsCode::Epsg4269 => "+proj=latlong +datum=NAD83",
        }
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrsParseError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),
}
