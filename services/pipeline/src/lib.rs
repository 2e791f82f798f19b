//! Reanalysis pipeline service.
//!
//! Plans (region, year) units from the region table, obtains raw inputs from
//! a [`DatasetSource`], and drives each unit through normalization, daily and
//! monthly aggregation and raster export on a bounded worker pool.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pipeline::{logging, LocalDirectorySource, Pipeline, PipelineConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = PipelineConfig::from_yaml("/etc/pipeline/config.yaml")?;
//! logging::init(&config.logging)?;
//!
//! let source = Arc::new(LocalDirectorySource::new("/srv/raw").delete_on_release(true));
//! let summary = Pipeline::new(&config, source)?.run().await;
//! for report in summary.failed() {
//!     eprintln!("{} {} {}: {:?}", report.region, report.year, report.variable, report.failure);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod runner;
pub mod source;

pub use config::{IoConfig, LogFormat, LoggingConfig, PipelineConfig, RegionConfig};
pub use runner::{
    classify, Pipeline, RunSummary, Stage, StageFailure, UnitOfWork, UnitReport,
};
pub use source::{DatasetSource, LocalDirectorySource};
