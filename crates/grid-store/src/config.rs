//! Configuration for dataset persistence.

use serde::{Deserialize, Serialize};

/// Zarr layout and compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Time steps per chunk along the time axis; each chunk spans the full grid.
    pub time_chunk: usize,

    /// Compression codec for variable arrays.
    pub compression: ZarrCompression,

    /// Compression level (1-9).
    pub compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub shuffle: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            time_chunk: 31,
            compression: ZarrCompression::BloscZstd,
            compression_level: 1,
            shuffle: true,
        }
    }
}

impl StoreConfig {
    /// Uncompressed layout, convenient for tests.
    pub fn uncompressed() -> Self {
        Self {
            compression: ZarrCompression::None,
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.time_chunk == 0 {
            return Err("store.time_chunk must be > 0".to_string());
        }

        if self.compression != ZarrCompression::None
            && (self.compression_level == 0 || self.compression_level > 9)
        {
            return Err("store.compression_level must be 1-9".to_string());
        }

        Ok(())
    }
}

/// Compression codec for Zarr arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd (recommended).
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(Self::None),
            "lz4" | "blosc_lz4" => Some(Self::BloscLz4),
            "zstd" | "blosc_zstd" => Some(Self::BloscZstd),
            _ => None,
        }
    }

    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(StoreConfig::uncompressed().validate().is_ok());
    }

    #[test]
    fn test_invalid_level() {
        let config = StoreConfig {
            compression_level: 12,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_compression_parse() {
        assert_eq!(ZarrCompression::parse("LZ4"), Some(ZarrCompression::BloscLz4));
        assert_eq!(ZarrCompression::parse("none"), Some(ZarrCompression::None));
        assert_eq!(ZarrCompression::parse("gzip"), None);
        let yaml: ZarrCompression = serde_json::from_str("\"blosc_zstd\"").unwrap();
        assert_eq!(yaml, ZarrCompression::BloscZstd);
    }
}
