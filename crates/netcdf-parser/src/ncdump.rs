//! `ncdump` subprocess backend.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::cdl::parse_cdl;
use crate::error::{NetCdfError, NetCdfResult};
use crate::raw::RawDataset;

/// Significant digits requested for float and double values.
const PRECISION: &str = "9,17";

/// Read a NetCDF file by dumping it to CDL with `ncdump`.
pub fn read_with_ncdump(path: &Path) -> NetCdfResult<RawDataset> {
    if !path.exists() {
        return Err(NetCdfError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }

    let output = Command::new("ncdump")
        .arg("-p")
        .arg(PRECISION)
        .arg(path)
        .output()
        .map_err(|e| NetCdfError::CommandError(format!("Failed to run ncdump: {}", e)))?;

    if !output.status.success() {
        return Err(NetCdfError::CommandError(format!(
            "ncdump failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    debug!(path = %path.display(), bytes = text.len(), "ncdump output received");
    parse_cdl(&text)
}
