//! Daily to monthly reduction with unit conversion.

use std::path::PathBuf;

use grid_common::{GriddedDataset, Period, Provenance, Variable};
use grid_store::{DatasetStore, OutputLayout};
use tracing::{info, instrument};

use crate::error::{AggregationError, Result};
use crate::reduce::{GapReport, MeanAccumulator};
use crate::units::UnitConversionTable;

/// Monthly dataset of one variable before publication.
#[derive(Debug, Clone)]
pub struct MonthlyOutput {
    pub variable: String,
    pub dataset: GriddedDataset,
    pub gaps: Vec<GapReport>,
    /// Whether a unit conversion was applied.
    pub converted: bool,
}

/// Reduces one variable of a daily dataset to calendar-month means.
#[derive(Debug, Clone, Default)]
pub struct MonthlyAggregator {
    conversions: UnitConversionTable,
    provenance: Provenance,
}

impl MonthlyAggregator {
    pub fn new(conversions: UnitConversionTable, provenance: Provenance) -> Self {
        Self {
            conversions,
            provenance,
        }
    }

    pub fn conversions(&self) -> &UnitConversionTable {
        &self.conversions
    }

    /// Convert `variable` of `daily` and average it per calendar month.
    ///
    /// The month axis spans the first through the last month of the daily
    /// axis; a month labelled by its first day.
    #[instrument(skip(self, daily))]
    pub fn aggregate(&self, daily: &GriddedDataset, variable: &str) -> Result<MonthlyOutput> {
        let mut selected = daily.select(&[variable])?;
        let converted = !self.conversions.apply(&mut selected)?.is_empty();

        let (Some(&first), Some(&last)) = (selected.times().first(), selected.times().last())
        else {
            return Err(AggregationError::EmptyInput);
        };

        let grid = selected.grid().clone();
        let mut acc = MeanAccumulator::new(Period::Month, first, last, grid.len());
        for (t, &time) in selected.times().iter().enumerate() {
            if let Some(slice) = selected.slice(variable, t) {
                acc.add_slice(time, slice)?;
            }
        }
        let (months, data, gaps) = acc.finish(variable);

        let template = selected
            .variable(variable)
            .ok_or(AggregationError::EmptyInput)?;
        let mut dataset = GriddedDataset::with_variables(
            months,
            grid,
            [Variable {
                data,
                ..template.clone()
            }],
        )?;
        dataset.extend_attributes(
            daily
                .attributes()
                .iter()
                .filter(|(k, _)| !Provenance::is_provenance_key(k))
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        dataset.extend_attributes(self.provenance.to_attributes());

        info!(
            variable,
            months = dataset.ntime(),
            converted,
            "Aggregated monthly dataset"
        );
        Ok(MonthlyOutput {
            variable: variable.to_string(),
            dataset,
            gaps,
            converted,
        })
    }

    /// Publish the monthly dataset for (region, year).
    pub fn publish(
        &self,
        output: &MonthlyOutput,
        store: &DatasetStore,
        layout: &OutputLayout,
        region: &str,
        year: i32,
    ) -> Result<PathBuf> {
        let path = layout.monthly_path(region, year, &output.variable);
        store.publish_dataset(&output.dataset, &path)?;
        Ok(path)
    }
}
