//! Pipeline configuration.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use aggregation::{default_conversions, UnitConversion, UnitConversionTable};
use anyhow::{bail, Context, Result};
use chrono::{Datelike, Utc};
use grid_common::{BoundingBox, Provenance};
use grid_store::{RetryPolicy, StoreConfig};
use raster::RasterConfig;
use serde::{Deserialize, Serialize};

/// First year covered by the ERA5 archive.
pub const FIRST_ARCHIVE_YEAR: i32 = 1940;

pub const ENV_OUTPUT_ROOT: &str = "PIPELINE_OUTPUT_ROOT";
pub const ENV_MAX_WORKERS: &str = "PIPELINE_MAX_WORKERS";
pub const ENV_LOG_LEVEL: &str = "PIPELINE_LOG_LEVEL";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the output tree.
    pub output_root: PathBuf,

    /// Number of (region, year) units processed concurrently.
    pub max_workers: usize,

    /// Retry settings for transient IO failures.
    pub io: IoConfig,

    /// Dataset persistence settings.
    pub store: StoreConfig,

    /// Raster export settings.
    pub raster: RasterConfig,

    /// Unit conversions applied before monthly aggregation.
    pub conversions: Vec<UnitConversion>,

    /// Provenance record written on every dataset.
    pub provenance: Provenance,

    /// Regions to process.
    pub regions: Vec<RegionConfig>,

    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./data"),
            max_workers: 4,
            io: IoConfig::default(),
            store: StoreConfig::default(),
            raster: RasterConfig::default(),
            conversions: default_conversions(),
            provenance: Provenance::default(),
            regions: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Retry settings for transient IO failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            retry_delay_ms: policy.retry_delay_ms,
            max_retry_delay_ms: policy.max_retry_delay_ms,
        }
    }
}

/// One entry of the region table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Region name, used as the top-level output directory.
    pub name: String,

    /// Years to process.
    pub years: Vec<i32>,

    /// Variables requested for every year.
    pub variables: Vec<String>,

    /// Request area as `[north, west, south, east]`.
    pub area: [f64; 4],
}

impl RegionConfig {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::from_area(self.area)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            thread_ids: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl PipelineConfig {
    /// Load configuration from a YAML file, apply environment overrides and
    /// validate the result.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Defaults with environment overrides applied; no regions are configured.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `PIPELINE_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_OUTPUT_ROOT) {
            self.output_root = PathBuf::from(root);
        }
        if let Some(workers) = lookup(ENV_MAX_WORKERS) {
            self.max_workers = workers
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_MAX_WORKERS))?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.output_root.as_os_str().is_empty() {
            bail!("output_root must not be empty");
        }
        if self.max_workers == 0 {
            bail!("max_workers must be > 0");
        }
        self.store.validate().map_err(anyhow::Error::msg)?;
        self.raster.validate().map_err(anyhow::Error::msg)?;
        self.conversion_table()?;

        let last_year = Utc::now().year();
        let mut names = HashSet::new();
        for region in &self.regions {
            if region.name.is_empty() || region.name.contains(['/', '\\']) {
                bail!("invalid region name '{}'", region.name);
            }
            if !names.insert(region.name.as_str()) {
                bail!("region '{}' is configured twice", region.name);
            }
            if region.variables.is_empty() {
                bail!("region '{}' requests no variables", region.name);
            }
            if let Some(year) = region
                .years
                .iter()
                .find(|&&y| !(FIRST_ARCHIVE_YEAR..=last_year).contains(&y))
            {
                bail!(
                    "region '{}': year {} outside {}-{}",
                    region.name,
                    year,
                    FIRST_ARCHIVE_YEAR,
                    last_year
                );
            }
            let bbox = region.bbox();
            if !bbox.is_valid() {
                bail!(
                    "region '{}': area {:?} is not [north, west, south, east]",
                    region.name,
                    region.area
                );
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.io.max_retries,
            retry_delay_ms: self.io.retry_delay_ms,
            max_retry_delay_ms: self.io.max_retry_delay_ms,
        }
    }

    pub fn conversion_table(&self) -> Result<UnitConversionTable> {
        UnitConversionTable::new(self.conversions.iter().cloned())
            .context("Invalid unit conversion table")
    }
}
