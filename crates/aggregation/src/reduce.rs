//! Mean reduction of time slices onto calendar periods.

use chrono::NaiveDateTime;
use grid_common::{GridError, Period};
use tracing::{debug, warn};

use crate::error::Result;

/// One output cell of a reduction pass: the period start and the flat
/// `(lat, lon)` index within the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregationKey {
    pub period: NaiveDateTime,
    pub cell: usize,
}

/// A period whose output holds NaN cells because no sample contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapReport {
    pub variable: String,
    pub period_start: NaiveDateTime,
    pub missing_cells: usize,
    pub total_cells: usize,
}

impl GapReport {
    /// True when not a single cell of the period received a sample.
    pub fn is_empty_period(&self) -> bool {
        self.missing_cells == self.total_cells
    }
}

/// Running sums and counts for every [`AggregationKey`] of a fixed period axis.
///
/// Sums are kept in f64 and NaN samples are skipped, so the result only
/// depends on which samples were added, not in which order.
#[derive(Debug, Clone)]
pub struct MeanAccumulator {
    period: Period,
    periods: Vec<NaiveDateTime>,
    cells: usize,
    sums: Vec<f64>,
    counts: Vec<u32>,
}

impl MeanAccumulator {
    /// Accumulator over every period from the one holding `first` to the one
    /// holding `last`.
    pub fn new(period: Period, first: NaiveDateTime, last: NaiveDateTime, cells: usize) -> Self {
        let periods = period.span(first, last);
        let n = periods.len() * cells;
        Self {
            period,
            periods,
            cells,
            sums: vec![0.0; n],
            counts: vec![0; n],
        }
    }

    pub fn periods(&self) -> &[NaiveDateTime] {
        &self.periods
    }

    pub fn key(&self, time: NaiveDateTime, cell: usize) -> AggregationKey {
        AggregationKey {
            period: self.period.truncate(time),
            cell,
        }
    }

    fn offset(&self, key: &AggregationKey) -> Result<usize> {
        let p = self.periods.binary_search(&key.period).map_err(|_| {
            GridError::InvalidTime(format!(
                "{} start {} outside the aggregation window",
                self.period, key.period
            ))
        })?;
        Ok(p * self.cells + key.cell)
    }

    /// Add the `(lat, lon)` slice sampled at `time`.
    pub fn add_slice(&mut self, time: NaiveDateTime, values: &[f32]) -> Result<()> {
        if values.len() != self.cells {
            return Err(GridError::ShapeMismatch {
                name: format!("slice at {}", time),
                expected: self.cells,
                got: values.len(),
            }
            .into());
        }
        let base = self.offset(&self.key(time, 0))?;
        for (cell, &v) in values.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            self.sums[base + cell] += v as f64;
            self.counts[base + cell] += 1;
        }
        Ok(())
    }

    /// Period axis, flat `(period, lat, lon)` means and the gaps found.
    ///
    /// A key with no contributing sample yields NaN.
    pub fn finish(self, variable: &str) -> (Vec<NaiveDateTime>, Vec<f32>, Vec<GapReport>) {
        let means: Vec<f32> = self
            .sums
            .iter()
            .zip(&self.counts)
            .map(|(&sum, &count)| {
                if count == 0 {
                    f32::NAN
                } else {
                    (sum / count as f64) as f32
                }
            })
            .collect();

        let mut gaps = Vec::new();
        for (p, start) in self.periods.iter().enumerate() {
            let counts = &self.counts[p * self.cells..(p + 1) * self.cells];
            let missing_cells = counts.iter().filter(|&&c| c == 0).count();
            if missing_cells == 0 {
                continue;
            }
            let gap = GapReport {
                variable: variable.to_string(),
                period_start: *start,
                missing_cells,
                total_cells: self.cells,
            };
            if gap.is_empty_period() {
                warn!(
                    variable,
                    period = %self.period,
                    start = %start,
                    "No samples for period, filled with NaN"
                );
            } else {
                debug!(
                    variable,
                    start = %start,
                    missing_cells,
                    "Period has cells without samples"
                );
            }
            gaps.push(gap);
        }

        (self.periods, means, gaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 2, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_daily_mean_skips_nan() {
        let mut acc = MeanAccumulator::new(Period::Day, at(1, 0), at(1, 23), 2);
        acc.add_slice(at(1, 0), &[1.0, f32::NAN]).unwrap();
        acc.add_slice(at(1, 12), &[3.0, 4.0]).unwrap();

        let (periods, means, gaps) = acc.finish("tp");
        assert_eq!(periods, vec![at(1, 0)]);
        assert_eq!(means, vec![2.0, 4.0]);
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_empty_period_reported() {
        let mut acc = MeanAccumulator::new(Period::Day, at(1, 6), at(3, 6), 1);
        acc.add_slice(at(1, 6), &[1.0]).unwrap();
        acc.add_slice(at(3, 6), &[3.0]).unwrap();

        let (periods, means, gaps) = acc.finish("tp");
        assert_eq!(periods.len(), 3);
        assert!(means[1].is_nan());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].period_start, at(2, 0));
        assert!(gaps[0].is_empty_period());
    }

    #[test]
    fn test_monthly_keys() {
        let acc = MeanAccumulator::new(Period::Month, at(3, 0), at(20, 0), 4);
        let key = acc.key(at(17, 9), 3);
        assert_eq!(key.period, at(1, 0));
        assert_eq!(key.cell, 3);
        assert_eq!(acc.periods().len(), 1);
    }

    #[test]
    fn test_slice_outside_window() {
        let mut acc = MeanAccumulator::new(Period::Day, at(1, 0), at(2, 0), 1);
        assert!(acc.add_slice(at(5, 0), &[1.0]).is_err());
        assert!(acc.add_slice(at(1, 0), &[1.0, 2.0]).is_err());
    }
}
