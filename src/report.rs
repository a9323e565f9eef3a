//! Turns the raw samples of a repeat into the plain value stream consumed by output formats.

use crate::{
    columns::{BenchResults, Column, RunInfo},
    error::ColFailed,
    scheduler::RepeatSamples,
    stamp::StampConfig,
};

/// One sample with every column evaluated.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRow {
    /// Cycles since the start of the repeat.
    pub elapsed: u64,
    pub period: usize,
    pub deadline: u64,
    pub payload_calls: u64,
    pub spins: u64,
    pub retries: u32,
    /// One value per table column, in column order.
    pub values: Vec<Result<f64, ColFailed>>,
}

/// Everything an output format needs to print one repeat.
#[derive(Clone, Debug)]
pub struct RepeatReport {
    pub workload: &'static str,
    pub repeat: usize,
    pub info: RunInfo,
    /// Table columns. Post-output columns are not part of this.
    pub columns: Vec<Column>,
    pub rows: Vec<ReportRow>,
    /// Post-output columns evaluated over the whole repeat.
    pub post: Vec<(Column, Result<f64, ColFailed>)>,
}

/// Per column statistics over the rows of a report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColumnSummary {
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl RepeatReport {
    pub fn new(
        workload: &'static str,
        samples: &RepeatSamples,
        sc: &StampConfig,
        columns: &[Column],
        info: RunInfo,
    ) -> Self {
        let (post_columns, columns): (Vec<Column>, Vec<Column>) =
            columns.iter().partition(|c| c.is_post_output());
        let rows = samples
            .samples
            .iter()
            .zip(samples.deltas(sc))
            .map(|(sample, delta)| {
                let results = BenchResults { delta, info };
                ReportRow {
                    elapsed: sample.tsc,
                    period: sample.period,
                    deadline: sample.deadline,
                    payload_calls: sample.payload_calls,
                    spins: sample.spins,
                    retries: sample.stamp.retries(),
                    values: columns.iter().map(|c| c.value(&results)).collect(),
                }
            })
            .collect();
        let total = BenchResults {
            delta: samples.total(sc),
            info,
        };
        let post = post_columns
            .into_iter()
            .map(|c| {
                let v = if total.delta.is_empty() {
                    Ok(f64::NAN)
                } else {
                    c.value(&total)
                };
                (c, v)
            })
            .collect();
        RepeatReport {
            workload,
            repeat: samples.repeat,
            info,
            columns,
            rows,
            post,
        }
    }

    /// The values of column `idx` with failures as NaN.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows
            .iter()
            .map(move |r| r.values[idx].as_ref().copied().unwrap_or(f64::NAN))
    }

    /// Min, max and median of column `idx`, ignoring NaN and failed cells.
    /// `None` if the column has no value at all.
    pub fn summary(&self, idx: usize) -> Option<ColumnSummary> {
        let mut values: Vec<f64> = self.column_values(idx).filter(|v| !v.is_nan()).collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        Some(ColumnSummary {
            min: values[0],
            max: values[values.len() - 1],
            median: values[values.len() / 2],
        })
    }

    pub fn total_retries(&self) -> u64 {
        self.rows.iter().map(|r| r.retries as u64).sum()
    }
}

#[cfg(test)]
fn report(values: &[Result<f64, ColFailed>]) -> RepeatReport {
    RepeatReport {
        workload: "w",
        repeat: 0,
        info: RunInfo {
            elements: 1,
            iterations: 1,
        },
        columns: vec![crate::columns::by_name("Cycles").copied().unwrap()],
        rows: values
            .iter()
            .enumerate()
            .map(|(i, v)| ReportRow {
                elapsed: i as u64,
                period: 0,
                deadline: i as u64,
                payload_calls: 1,
                spins: 1,
                retries: i as u32 % 2,
                values: vec![v.clone()],
            })
            .collect(),
        post: Vec::new(),
    }
}

#[test]
fn test_summary_skips_failed_and_nan() {
    let r = report(&[
        Ok(3.0),
        Err(ColFailed::new("fail")),
        Ok(1.0),
        Ok(f64::NAN),
        Ok(2.0),
    ]);
    assert_eq!(
        r.summary(0),
        Some(ColumnSummary {
            min: 1.0,
            max: 3.0,
            median: 2.0
        })
    );
    assert_eq!(r.total_retries(), 2);
}

#[test]
fn test_summary_of_failed_column() {
    let r = report(&[Err(ColFailed::new("fail")), Ok(f64::NAN)]);
    assert_eq!(r.summary(0), None);
    assert!(r.column_values(0).all(f64::is_nan));
}
