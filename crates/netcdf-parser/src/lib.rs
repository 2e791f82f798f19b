//! Raw NetCDF reader for gridded reanalysis files.
//!
//! Files are read into a [`RawDataset`]: dimensions, variables with their
//! dimension names, attributes and values, and global attributes. No
//! interpretation of coordinates happens here.
//!
//! # Backends
//!
//! - `ncdump` (default): the file is dumped to CDL text with the `ncdump`
//!   command-line tool and parsed. Files with a `.cdl` extension are parsed
//!   directly without the tool.
//! - `native` feature: direct reading through libnetcdf (requires
//!   libhdf5-dev and libnetcdf-dev).

pub mod cdl;
pub mod error;
pub mod ncdump;
#[cfg(feature = "native")]
pub mod native;
pub mod raw;

use std::path::Path;

use tracing::instrument;

pub use cdl::parse_cdl;
pub use error::{NetCdfError, NetCdfResult};
pub use raw::{AttrValue, NcType, RawDataset, RawDimension, RawVariable};

/// Read a raw dataset from a `.cdl` text file or a binary NetCDF file.
#[instrument(level = "debug", fields(path = %path.as_ref().display()))]
pub fn read_dataset<P: AsRef<Path>>(path: P) -> NetCdfResult<RawDataset> {
    let path = path.as_ref();
    let is_cdl = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("cdl"));

    if is_cdl {
        let text = std::fs::read_to_string(path)?;
        return parse_cdl(&text);
    }

    read_binary(path)
}

#[cfg(feature = "native")]
fn read_binary(path: &Path) -> NetCdfResult<RawDataset> {
    native::read_native(path)
}

#[cfg(not(feature = "native"))]
fn read_binary(path: &Path) -> NetCdfResult<RawDataset> {
    ncdump::read_with_ncdump(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_cdl_file() {
        let mut file = tempfile::Builder::new().suffix(".cdl").tempfile().unwrap();
        write!(
            file,
            "netcdf tiny {{\ndimensions:\n n = 2 ;\nvariables:\n float v(n) ;\n  v:units = \"m\" ;\ndata:\n v = 1.5, _ ;\n}}\n"
        )
        .unwrap();

        let ds = read_dataset(file.path()).unwrap();
        let v = ds.variable("v").unwrap();
        assert_eq!(v.values[0], 1.5);
        assert!(v.values[1].is_nan());
    }

    #[test]
    fn test_missing_cdl_file() {
        let err = read_dataset("/nonexistent/input.cdl").unwrap_err();
        assert!(matches!(err, NetCdfError::IoError(_)));
    }
}
