//! Unit planning and the bounded worker pool.
//!
//! A unit is one (region, year) job. Its stages run strictly in order
//! (normalize, daily, monthly, raster) on the blocking thread pool, and up to
//! `max_workers` units are in flight at once. Units write to disjoint
//! subtrees of the output tree. A failure is recorded in the unit's reports
//! and never stops other units.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aggregation::{
    rebuild_table, AggregationError, DailyAggregator, DimensionNormalizer, MonthlyAggregator,
};
use anyhow::{anyhow, Context, Result};
use futures::stream::{self, StreamExt};
use grid_common::{ErrorClass, GridError, GriddedDataset};
use grid_store::{read_manifest, DatasetStore, OutputLayout, RetryPolicy, StoreError};
use raster::{RasterError, RasterExporter};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{PipelineConfig, RegionConfig};
use crate::source::DatasetSource;

/// One (region, year) job and the variables requested for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWork {
    pub region: String,
    pub year: i32,
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Obtaining raw input paths from the source.
    Source,
    Normalize,
    Daily,
    Monthly,
    Raster,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Source => "source",
            Stage::Normalize => "normalize",
            Stage::Daily => "daily",
            Stage::Monthly => "monthly",
            Stage::Raster => "raster",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and why a unit stopped.
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: Stage,
    /// Artifact the stage was reading when it failed, if any.
    pub input: Option<PathBuf>,
    pub class: ErrorClass,
    pub message: String,
}

impl StageFailure {
    fn new(stage: Stage, input: Option<&Path>, err: anyhow::Error) -> Self {
        Self {
            stage,
            input: input.map(Path::to_path_buf),
            class: classify(&err),
            message: format!("{:#}", err),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed ({})", self.stage, self.class.as_str())?;
        if let Some(input) = &self.input {
            write!(f, " on {}", input.display())?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Classify an error by the first typed cause in its chain.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<AggregationError>() {
            return e.class();
        }
        if let Some(e) = cause.downcast_ref::<RasterError>() {
            return e.class();
        }
        if let Some(e) = cause.downcast_ref::<StoreError>() {
            return e.class();
        }
        if let Some(e) = cause.downcast_ref::<GridError>() {
            return e.class();
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return ErrorClass::Io;
        }
    }
    ErrorClass::Other
}

trait StageContext<T> {
    fn in_stage(self, stage: Stage, input: Option<&Path>) -> Result<T, StageFailure>;
}

impl<T, E: Into<anyhow::Error>> StageContext<T> for Result<T, E> {
    fn in_stage(self, stage: Stage, input: Option<&Path>) -> Result<T, StageFailure> {
        self.map_err(|e| StageFailure::new(stage, input, e.into()))
    }
}

/// Outcome of one (region, year, variable).
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub region: String,
    pub year: i32,
    pub variable: String,
    /// Stages whose output was already published and not redone.
    pub skipped: Vec<Stage>,
    pub monthly: Option<PathBuf>,
    pub rasters: Vec<PathBuf>,
    pub failure: Option<StageFailure>,
}

impl UnitReport {
    fn new(unit: &UnitOfWork, variable: &str) -> Self {
        Self {
            region: unit.region.clone(),
            year: unit.year,
            variable: variable.to_string(),
            skipped: Vec::new(),
            monthly: None,
            rasters: Vec::new(),
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Reports of every unit in a run, ordered by (region, year, variable).
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<UnitReport>,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.reports.iter().filter(|r| !r.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.reports.iter().all(UnitReport::is_success)
    }

    pub fn report(&self, region: &str, year: i32, variable: &str) -> Option<&UnitReport> {
        self.reports
            .iter()
            .find(|r| r.region == region && r.year == year && r.variable == variable)
    }
}

/// Outputs of the per-variable stages.
struct VariableOutcome {
    skipped: Vec<Stage>,
    monthly: PathBuf,
    rasters: Vec<PathBuf>,
}

/// Synchronous stage implementations shared by all workers.
struct Stages {
    layout: OutputLayout,
    store: DatasetStore,
    retry: RetryPolicy,
    normalizer: DimensionNormalizer,
    daily: DailyAggregator,
    monthly: MonthlyAggregator,
    exporter: RasterExporter,
}

impl Stages {
    /// Variables held by any daily dataset already published for the unit.
    fn published_variables(&self, unit: &UnitOfWork) -> Result<Vec<String>, StageFailure> {
        let mut published = Vec::new();
        let datasets = self
            .layout
            .daily_datasets(&unit.region, unit.year)
            .in_stage(Stage::Daily, None)?;
        for path in datasets {
            let manifest = read_manifest(&path).in_stage(Stage::Daily, Some(path.as_path()))?;
            published.extend(manifest);
        }
        published.sort();
        published.dedup();
        Ok(published)
    }

    fn restore_table(&self, unit: &UnitOfWork) -> Result<(), StageFailure> {
        rebuild_table(&self.store, &self.layout, &unit.region, unit.year)
            .context("Failed to rebuild daily table")
            .in_stage(Stage::Daily, None)?;
        Ok(())
    }

    fn normalize(&self, paths: &[PathBuf]) -> Result<Vec<GriddedDataset>, StageFailure> {
        let mut inputs = Vec::with_capacity(paths.len());
        for path in paths {
            let datasets = self
                .retry
                .run_with("normalize", AggregationError::is_transient, || {
                    self.normalizer.load(path)
                })
                .with_context(|| format!("Failed to normalize {}", path.display()))
                .in_stage(Stage::Normalize, Some(path.as_path()))?;
            inputs.extend(datasets);
        }
        Ok(inputs)
    }

    /// Aggregate and publish the daily datasets of `paths`.
    ///
    /// Variables in `published` are left alone: their samples are dropped
    /// from the inputs and the new datasets are published beside the old
    /// ones. Returns the variables that were published.
    fn build_daily(
        &self,
        unit: &UnitOfWork,
        published: &[String],
        paths: &[PathBuf],
    ) -> Result<Vec<String>, StageFailure> {
        let mut inputs = self.normalize(paths)?;
        let resuming = !published.is_empty();
        if resuming {
            inputs = without_variables(inputs, published).in_stage(Stage::Daily, None)?;
            if inputs.is_empty() {
                info!("Raw inputs hold no unpublished variables");
                return Ok(Vec::new());
            }
        }

        let output = self
            .daily
            .aggregate(&inputs)
            .context("Daily aggregation failed")
            .in_stage(Stage::Daily, None)?;

        let (region, year) = (unit.region.as_str(), unit.year);
        let result = if resuming {
            self.daily
                .publish_additional(&output, &self.store, &self.layout, region, year)
        } else {
            self.daily
                .publish(&output, &self.store, &self.layout, region, year)
        };
        result
            .context("Failed to publish daily output")
            .in_stage(Stage::Daily, None)?;
        Ok(output.variables())
    }

    fn build_variable(
        &self,
        unit: &UnitOfWork,
        variable: &str,
        product: &str,
    ) -> Result<VariableOutcome, StageFailure> {
        let (region, year) = (unit.region.as_str(), unit.year);
        let mut skipped = Vec::new();

        let monthly_path = self.layout.monthly_path(region, year, variable);
        let monthly = if monthly_path.exists() {
            skipped.push(Stage::Monthly);
            self.store
                .load(&monthly_path)
                .context("Failed to load published monthly dataset")
                .in_stage(Stage::Raster, Some(monthly_path.as_path()))?
        } else {
            let daily_path = self
                .layout
                .find_daily(region, year, variable)
                .in_stage(Stage::Monthly, None)?
                .ok_or_else(|| {
                    GridError::schema(format!("no daily dataset holds '{}'", variable))
                })
                .in_stage(Stage::Monthly, None)?;
            let daily = self
                .store
                .load(&daily_path)
                .context("Failed to load daily dataset")
                .in_stage(Stage::Monthly, Some(daily_path.as_path()))?;
            let output = self
                .monthly
                .aggregate(&daily, variable)
                .in_stage(Stage::Monthly, Some(daily_path.as_path()))?;
            self.monthly
                .publish(&output, &self.store, &self.layout, region, year)
                .in_stage(Stage::Monthly, Some(daily_path.as_path()))?;
            output.dataset
        };

        let expected: Vec<PathBuf> = (0..monthly.ntime())
            .map(|i| self.layout.raster_path(region, product, variable, year, i))
            .collect();
        let rasters = if expected.iter().all(|p| p.is_file()) {
            skipped.push(Stage::Raster);
            expected
        } else {
            self.exporter
                .export(&monthly, variable, &self.layout, region, year)
                .in_stage(Stage::Raster, Some(monthly_path.as_path()))?
        };

        Ok(VariableOutcome {
            skipped,
            monthly: monthly_path,
            rasters,
        })
    }
}

/// Drop `names` from every input; inputs left without variables are removed.
fn without_variables(
    inputs: Vec<GriddedDataset>,
    names: &[String],
) -> Result<Vec<GriddedDataset>, GridError> {
    let mut kept = Vec::with_capacity(inputs.len());
    for ds in inputs {
        let own = ds.variable_names();
        let keep: Vec<&str> = own
            .iter()
            .filter(|n| !names.contains(n))
            .map(String::as_str)
            .collect();
        if keep.len() == own.len() {
            kept.push(ds);
        } else if !keep.is_empty() {
            kept.push(ds.select(&keep)?);
        }
    }
    Ok(kept)
}

/// Daily stage outcome for the requested variables of a unit.
#[derive(Debug, Default)]
struct DailyStatus {
    /// Requested variables published by an earlier run.
    reused: Vec<String>,
    /// Requested variables no raw input holds.
    missing: Vec<String>,
    /// Failure of the daily stage for the variables not reused.
    failure: Option<StageFailure>,
}

/// Runs configured units through every stage.
pub struct Pipeline {
    stages: Arc<Stages>,
    source: Arc<dyn DatasetSource>,
    regions: Vec<RegionConfig>,
    max_workers: usize,
}

impl Pipeline {
    /// Build a pipeline from a validated configuration.
    pub fn new(config: &PipelineConfig, source: Arc<dyn DatasetSource>) -> Result<Self> {
        config.validate()?;
        let retry = config.retry_policy();
        let stages = Stages {
            layout: OutputLayout::new(&config.output_root),
            store: DatasetStore::new(config.store.clone(), retry.clone()),
            retry: retry.clone(),
            normalizer: DimensionNormalizer::new(),
            daily: DailyAggregator::new(config.provenance.clone()),
            monthly: MonthlyAggregator::new(config.conversion_table()?, config.provenance.clone()),
            exporter: RasterExporter::new(config.raster.clone(), retry),
        };

        Ok(Self {
            stages: Arc::new(stages),
            source,
            regions: config.regions.clone(),
            max_workers: config.max_workers,
        })
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.stages.layout
    }

    /// One unit per (region, year) in configuration order.
    pub fn plan(&self) -> Vec<UnitOfWork> {
        self.regions
            .iter()
            .flat_map(|region| {
                region.years.iter().map(move |&year| UnitOfWork {
                    region: region.name.clone(),
                    year,
                    variables: region.variables.clone(),
                })
            })
            .collect()
    }

    /// Run every planned unit.
    pub async fn run(&self) -> RunSummary {
        self.run_units(self.plan()).await
    }

    /// Run `units` with at most `max_workers` in flight.
    pub async fn run_units(&self, units: Vec<UnitOfWork>) -> RunSummary {
        info!(units = units.len(), max_workers = self.max_workers, "Starting pipeline run");

        let mut reports: Vec<UnitReport> = stream::iter(units)
            .map(|unit| self.run_unit(unit))
            .buffer_unordered(self.max_workers)
            .flat_map(stream::iter)
            .collect()
            .await;
        reports.sort_by(|a, b| {
            (&a.region, a.year, &a.variable).cmp(&(&b.region, b.year, &b.variable))
        });

        let summary = RunSummary { reports };
        info!(
            completed = summary.completed(),
            failed = summary.failed().count(),
            "Pipeline run finished"
        );
        summary
    }

    /// Run one unit; returns one report per requested variable.
    #[instrument(skip(self, unit), fields(region = %unit.region, year = unit.year))]
    pub async fn run_unit(&self, unit: UnitOfWork) -> Vec<UnitReport> {
        let mut reports: Vec<UnitReport> = unit
            .variables
            .iter()
            .map(|v| UnitReport::new(&unit, v))
            .collect();

        let status = match self.ensure_daily(&unit).await {
            Ok(status) => status,
            Err(failure) => {
                log_failure(None, &failure);
                for report in &mut reports {
                    report.failure = Some(failure.clone());
                }
                return reports;
            }
        };

        for report in &mut reports {
            if status.reused.contains(&report.variable) {
                report.skipped.push(Stage::Daily);
            } else if let Some(failure) = &status.failure {
                report.failure = Some(failure.clone());
            } else if status.missing.contains(&report.variable) {
                let err = GridError::schema(format!("no raw input holds '{}'", report.variable));
                report.failure = Some(StageFailure::new(Stage::Daily, None, err.into()));
            }
        }

        let product = self.stages.exporter.config().product.clone();
        for report in reports.iter_mut().filter(|r| r.is_success()) {
            let stages = Arc::clone(&self.stages);
            let (unit, variable, product) =
                (unit.clone(), report.variable.clone(), product.clone());
            let outcome = self
                .blocking(Stage::Monthly, move || {
                    stages.build_variable(&unit, &variable, &product)
                })
                .await;

            match outcome {
                Ok(outcome) => {
                    info!(
                        variable = %report.variable,
                        rasters = outcome.rasters.len(),
                        skipped = ?outcome.skipped,
                        "Variable completed"
                    );
                    report.skipped.extend(outcome.skipped);
                    report.monthly = Some(outcome.monthly);
                    report.rasters = outcome.rasters;
                }
                Err(failure) => {
                    log_failure(Some(&report.variable), &failure);
                    report.failure = Some(failure);
                }
            }
        }
        reports
    }

    /// Publish daily outputs for the requested variables not yet published.
    ///
    /// Variables already held by a published daily dataset are reused. When
    /// some are reused, a failure to build the rest is confined to the rest;
    /// otherwise it fails the whole unit.
    async fn ensure_daily(&self, unit: &UnitOfWork) -> Result<DailyStatus, StageFailure> {
        let stages = Arc::clone(&self.stages);
        let job = unit.clone();
        let published = self
            .blocking(Stage::Daily, move || stages.published_variables(&job))
            .await?;
        let (reused, pending): (Vec<String>, Vec<String>) = unit
            .variables
            .iter()
            .cloned()
            .partition(|v| published.contains(v));
        let mut status = DailyStatus {
            reused,
            ..Default::default()
        };

        if pending.is_empty() {
            if !self.layout().tabular_path(&unit.region, unit.year).is_file() {
                let stages = Arc::clone(&self.stages);
                let job = unit.clone();
                self.blocking(Stage::Daily, move || stages.restore_table(&job))
                    .await?;
            }
            debug!("Daily outputs already published");
            return Ok(status);
        }

        match self.publish_daily(unit, published).await {
            Ok(produced) => {
                status.missing = pending
                    .into_iter()
                    .filter(|v| !produced.contains(v))
                    .collect();
                for variable in &status.missing {
                    warn!(variable = %variable, "Requested variable missing from raw inputs");
                }
            }
            Err(failure) if status.reused.is_empty() => return Err(failure),
            Err(failure) => {
                warn!(
                    reused = ?status.reused,
                    error = %failure,
                    "Daily stage failed for unpublished variables"
                );
                status.failure = Some(failure);
            }
        }
        Ok(status)
    }

    /// Fetch raw inputs, publish their daily datasets and release them.
    ///
    /// Raw inputs are released only after a successful publish.
    async fn publish_daily(
        &self,
        unit: &UnitOfWork,
        published: Vec<String>,
    ) -> Result<Vec<String>, StageFailure> {
        let paths = self
            .source
            .paths(unit)
            .await
            .context("Dataset source failed")
            .map_err(|e| StageFailure {
                class: ErrorClass::Io,
                ..StageFailure::new(Stage::Source, None, e)
            })?;
        info!(inputs = paths.len(), "Raw inputs obtained");

        let stages = Arc::clone(&self.stages);
        let (job, inputs) = (unit.clone(), paths.clone());
        let produced = self
            .blocking(Stage::Daily, move || {
                stages.build_daily(&job, &published, &inputs)
            })
            .await?;

        if let Err(e) = self.source.release(unit, &paths).await {
            warn!(error = %format!("{:#}", e), "Failed to release raw inputs");
        }
        Ok(produced)
    }

    /// Run a synchronous stage on the blocking pool.
    async fn blocking<T, F>(&self, stage: Stage, f: F) -> Result<T, StageFailure>
    where
        F: FnOnce() -> Result<T, StageFailure> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::task::spawn_blocking(f).await {
            Ok(result) => result,
            Err(e) => Err(StageFailure::new(
                stage,
                None,
                anyhow!("stage task aborted: {}", e),
            )),
        }
    }
}

fn log_failure(variable: Option<&str>, failure: &StageFailure) {
    error!(
        variable = variable.unwrap_or("*"),
        stage = %failure.stage,
        class = failure.class.as_str(),
        input = ?failure.input,
        error = %failure.message,
        "Stage failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::LocalDirectorySource;
    use grid_common::Variable;
    use test_utils::{constant_dataset, date, hourly_times, regular_grid};

    fn config() -> PipelineConfig {
        PipelineConfig::from_yaml_str(
            r#"
output_root: /tmp/unused
regions:
  - name: Ecuador
    years: [2019, 2020]
    variables: [t2m, tp]
    area: [2.0, -82.0, -6.0, -74.0]
  - name: Peru
    years: [2020]
    variables: [tp]
    area: [0.0, -82.0, -18.0, -68.0]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_plan_follows_region_table() {
        let pipeline =
            Pipeline::new(&config(), Arc::new(LocalDirectorySource::new("/tmp/unused"))).unwrap();
        let plan = pipeline.plan();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].region, "Ecuador");
        assert_eq!(plan[1].year, 2020);
        assert_eq!(plan[1].variables, vec!["t2m", "tp"]);
        assert_eq!(plan[2].region, "Peru");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.max_workers = 0;
        assert!(Pipeline::new(&config, Arc::new(LocalDirectorySource::new("/tmp"))).is_err());
    }

    #[test]
    fn test_classify_through_context() {
        let err = anyhow::Error::new(GridError::irregular("lat", "spacing"))
            .context("Failed to normalize x.nc");
        assert_eq!(classify(&err), ErrorClass::GridIrregularity);

        let err = anyhow::Error::new(AggregationError::EmptyInput).context("Daily");
        assert_eq!(classify(&err), ErrorClass::Schema);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(classify(&anyhow::Error::new(io)), ErrorClass::Io);
        assert_eq!(classify(&anyhow!("plain")), ErrorClass::Other);
    }

    #[test]
    fn test_failure_display() {
        let failure = StageFailure::new(
            Stage::Normalize,
            Some(Path::new("/raw/a.nc")),
            anyhow::Error::new(GridError::schema("no time axis")),
        );
        let text = failure.to_string();
        assert!(text.starts_with("normalize stage failed (schema) on /raw/a.nc"));
        assert!(text.contains("no time axis"));
    }

    #[test]
    fn test_without_variables_drops_published() {
        let grid = regular_grid(1.0, 0.0, 0.5, 2, 2);
        let times = hourly_times(date(2021, 1, 1), 2);
        let mut both = constant_dataset("t2m", "K", 280.0, times.clone(), grid.clone());
        both.add_variable(Variable::new("tp", vec![1.0; 8])).unwrap();
        let tp_only = constant_dataset("tp", "m", 1.0, times, grid);

        let kept = without_variables(vec![both, tp_only], &["tp".to_string()]).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].variable_names(), vec!["t2m".to_string()]);
        assert!(kept[0].variable("t2m").unwrap().data.iter().all(|&v| v == 280.0));
    }
}
