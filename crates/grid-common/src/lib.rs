//! Shared grid model for the reanalysis aggregation pipeline.

pub mod bbox;
pub mod crs;
pub mod dataset;
pub mod error;
pub mod grid;
pub mod metadata;
pub mod time;
pub mod transform;

pub use bbox::BoundingBox;
pub use crs::{CrsCode, CrsParseError};
pub use dataset::{GriddedDataset, Variable, ATTR_UNITS_CONVERTED_FROM, COORDINATE_NAMES};
pub use error::{ErrorClass, GridError, GridResult};
pub use grid::{AxisOrder, SpatialGrid, SPACING_TOLERANCE};
pub use metadata::Provenance;
pub use time::{CfTimeUnits, Period, TimeUnit, STORE_CALENDAR, STORE_TIME_UNITS};
pub use transform::RasterTransform;
