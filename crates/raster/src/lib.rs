//! Raster export of gridded datasets.
//!
//! Each time step of a variable becomes one single-band float32 GeoTIFF,
//! rows north to south and columns west to east, georeferenced by an affine
//! transform derived from the dataset's grid.

pub mod error;
pub mod exporter;
pub mod geotiff;
pub mod tile;

pub use error::{RasterError, RasterResult};
pub use exporter::{RasterConfig, RasterExporter, DEFAULT_NODATA};
pub use geotiff::{decode_geotiff, encode_geotiff, read_geotiff, GeoRaster};
pub use tile::RasterTile;
