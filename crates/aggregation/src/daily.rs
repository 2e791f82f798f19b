//! Hourly to daily reduction and publication of the daily artifacts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use grid_common::{GridError, GriddedDataset, Period, Provenance, Variable};
use grid_store::{DatasetStore, OutputLayout};
use tracing::{info, instrument, warn};

use crate::error::{AggregationError, Result};
use crate::reduce::{GapReport, MeanAccumulator};

/// Daily datasets of one (region, year) before publication.
#[derive(Debug, Clone)]
pub struct DailyOutput {
    /// One dataset per distinct input variable set, sorted by variable names.
    pub datasets: Vec<GriddedDataset>,
    pub gaps: Vec<GapReport>,
}

impl DailyOutput {
    pub fn variables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .datasets
            .iter()
            .flat_map(|ds| ds.variable_names())
            .collect();
        names.sort();
        names
    }
}

/// Paths written by [`DailyAggregator::publish`].
#[derive(Debug, Clone)]
pub struct PublishedDaily {
    pub datasets: Vec<PathBuf>,
    pub tabular: PathBuf,
}

/// Reduces normalized sub-daily datasets to calendar-day means.
#[derive(Debug, Clone, Default)]
pub struct DailyAggregator {
    provenance: Provenance,
}

impl DailyAggregator {
    pub fn new(provenance: Provenance) -> Self {
        Self { provenance }
    }

    /// Reduce `inputs` to one sample per (day, lat, lon) per variable.
    ///
    /// Inputs holding the same variable set are pooled: repeated timestamps
    /// count as repeated samples of the mean. Every output shares one day
    /// axis covering the first through the last calendar day of all inputs;
    /// days without samples hold NaN.
    #[instrument(skip(self, inputs), fields(inputs = inputs.len()))]
    pub fn aggregate(&self, inputs: &[GriddedDataset]) -> Result<DailyOutput> {
        let (first, last) = time_bounds(inputs).ok_or(AggregationError::EmptyInput)?;

        let mut groups: BTreeMap<Vec<String>, Vec<&GriddedDataset>> = BTreeMap::new();
        for ds in inputs.iter().filter(|ds| ds.ntime() > 0) {
            groups.entry(ds.variable_names()).or_default().push(ds);
        }
        check_disjoint(groups.keys())?;

        let mut datasets = Vec::with_capacity(groups.len());
        let mut gaps = Vec::new();
        for (names, members) in &groups {
            let grid = members[0].grid();
            if let Some(other) = members.iter().find(|ds| !ds.grid().matches(grid)) {
                return Err(AggregationError::GridMismatch {
                    input: other.variable_names().join("_"),
                });
            }

            let mut variables = Vec::with_capacity(names.len());
            let mut days = Vec::new();
            for name in names {
                let mut acc = MeanAccumulator::new(Period::Day, first, last, grid.len());
                for ds in members {
                    for (t, &time) in ds.times().iter().enumerate() {
                        if let Some(slice) = ds.slice(name, t) {
                            acc.add_slice(time, slice)?;
                        }
                    }
                }
                let (periods, data, var_gaps) = acc.finish(name);
                days = periods;
                gaps.extend(var_gaps);

                let template = members[0]
                    .variable(name)
                    .ok_or_else(|| GridError::schema(format!("variable '{}' not found", name)))?;
                variables.push(Variable {
                    data,
                    ..template.clone()
                });
            }

            let mut daily = GriddedDataset::with_variables(days, grid.clone(), variables)?;
            daily.extend_attributes(self.provenance.to_attributes());
            info!(
                variables = ?names,
                days = daily.ntime(),
                sources = members.len(),
                "Aggregated daily dataset"
            );
            datasets.push(daily);
        }

        let empty_days = gaps.iter().filter(|g| g.is_empty_period()).count();
        if empty_days > 0 {
            warn!(empty_days, "Daily aggregation left periods without samples");
        }

        Ok(DailyOutput { datasets, gaps })
    }

    /// Publish each daily dataset and the combined table for (region, year).
    #[instrument(skip(self, output, store, layout))]
    pub fn publish(
        &self,
        output: &DailyOutput,
        store: &DatasetStore,
        layout: &OutputLayout,
        region: &str,
        year: i32,
    ) -> Result<PublishedDaily> {
        let datasets = publish_datasets(output, store, layout, region, year)?;

        let tabular = layout.tabular_path(region, year);
        let refs: Vec<&GriddedDataset> = output.datasets.iter().collect();
        store.publish_tabular(&refs, &tabular)?;

        Ok(PublishedDaily { datasets, tabular })
    }

    /// Publish `output` beside the datasets already published for
    /// (region, year), then rebuild the table from all of them.
    #[instrument(skip(self, output, store, layout))]
    pub fn publish_additional(
        &self,
        output: &DailyOutput,
        store: &DatasetStore,
        layout: &OutputLayout,
        region: &str,
        year: i32,
    ) -> Result<PublishedDaily> {
        let datasets = publish_datasets(output, store, layout, region, year)?;
        let tabular = rebuild_table(store, layout, region, year)?;
        Ok(PublishedDaily { datasets, tabular })
    }
}

/// Rewrite the (region, year) table from the published daily datasets.
pub fn rebuild_table(
    store: &DatasetStore,
    layout: &OutputLayout,
    region: &str,
    year: i32,
) -> Result<PathBuf> {
    let published = layout.daily_datasets(region, year)?;
    if published.is_empty() {
        return Err(AggregationError::EmptyInput);
    }
    let loaded = published
        .iter()
        .map(|path| store.load(path))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let tabular = layout.tabular_path(region, year);
    let refs: Vec<&GriddedDataset> = loaded.iter().collect();
    store.publish_tabular(&refs, &tabular)?;
    info!(datasets = loaded.len(), path = %tabular.display(), "Table rebuilt");
    Ok(tabular)
}

fn publish_datasets(
    output: &DailyOutput,
    store: &DatasetStore,
    layout: &OutputLayout,
    region: &str,
    year: i32,
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(output.datasets.len());
    for ds in &output.datasets {
        let mut ds = ds.clone();
        ds.set_attribute("region", region);
        let path = layout.daily_path(region, year, &ds.variable_names());
        store.publish_dataset(&ds, &path)?;
        paths.push(path);
    }
    Ok(paths)
}

fn time_bounds(inputs: &[GriddedDataset]) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let first = inputs.iter().filter_map(|ds| ds.times().first()).min()?;
    let last = inputs.iter().filter_map(|ds| ds.times().last()).max()?;
    Some((*first, *last))
}

/// A variable may belong to only one variable set.
fn check_disjoint<'a>(sets: impl Iterator<Item = &'a Vec<String>>) -> Result<()> {
    let mut owner: BTreeMap<&str, &Vec<String>> = BTreeMap::new();
    for set in sets {
        for name in set {
            if let Some(previous) = owner.insert(name.as_str(), set) {
                return Err(GridError::schema(format!(
                    "variable '{}' appears in inputs with variables {:?} and {:?}",
                    name, previous, set
                ))
                .into());
            }
        }
    }
    Ok(())
}
