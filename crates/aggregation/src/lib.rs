//! Reanalysis grid aggregation.
//!
//! Turns raw hourly reanalysis files into the canonical daily and monthly
//! datasets:
//!
//! - [`DimensionNormalizer`]: raw file to `(time, lat, lon)` datasets
//! - [`DailyAggregator`]: calendar-day means, daily datasets plus combined table
//! - [`MonthlyAggregator`]: unit conversion, then calendar-month means
//!
//! Reductions are arithmetic means over non-NaN samples; a period without
//! samples is kept on the time axis as NaN.

pub mod daily;
pub mod error;
pub mod monthly;
pub mod normalize;
pub mod reduce;
pub mod units;

pub use daily::{rebuild_table, DailyAggregator, DailyOutput, PublishedDaily};
pub use error::{AggregationError, Result};
pub use monthly::{MonthlyAggregator, MonthlyOutput};
pub use normalize::DimensionNormalizer;
pub use reduce::{AggregationKey, GapReport, MeanAccumulator};
pub use units::{default_conversions, UnitConversion, UnitConversionTable};
