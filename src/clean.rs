//! Turns validated rows into a gap-free, outlier-bounded record set.
//!
//! Steps, in order: parse timestamps (dropping failures), forward-fill
//! missing numbers per location, impute what is left with the location
//! median, then replace IQR outliers with the location median.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info};

use crate::analyzers::utility::{median, quantile};
use crate::record::{RawRow, Record, parse_timestamp};

/// Fence multiplier applied to the inter-quartile range.
pub const IQR_MULTIPLIER: f64 = 1.5;

/// Groups smaller than this have undefined quartiles and are left alone.
pub const MIN_IQR_POINTS: usize = 4;

const COLUMNS: [&str; 2] = ["vehicle_count", "avg_speed_kmh"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataQualityError {
    #[error("{failed} of {total} timestamps could not be parsed")]
    UnparseableTimestamps { failed: usize, total: usize },
    #[error("column '{column}' has no numeric values")]
    EmptyColumn { column: &'static str },
}

/// Counters describing what cleaning changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleaningReport {
    pub rows_in: usize,
    pub unparseable_timestamps: usize,
    pub forward_filled: usize,
    pub median_imputed: usize,
    pub outliers_corrected: usize,
}

#[derive(Debug, Clone)]
pub struct Cleaned {
    pub records: Vec<Record>,
    pub report: CleaningReport,
}

struct PendingRow {
    timestamp: NaiveDateTime,
    values: [Option<f64>; 2],
}

/// Cleans a validated row set.
///
/// # Errors
///
/// Fails when more than half the timestamps are unparseable, or when a
/// numeric column has no value anywhere in the upload.
#[tracing::instrument(skip_all, fields(rows = rows.len()))]
pub fn clean(rows: Vec<RawRow>) -> Result<Cleaned, DataQualityError> {
    let mut report = CleaningReport {
        rows_in: rows.len(),
        ..Default::default()
    };

    let mut groups: BTreeMap<String, Vec<PendingRow>> = BTreeMap::new();
    for row in rows {
        match parse_timestamp(&row.timestamp) {
            Some(timestamp) => groups.entry(row.location_id).or_default().push(PendingRow {
                timestamp,
                values: [row.vehicle_count, row.avg_speed_kmh],
            }),
            None => report.unparseable_timestamps += 1,
        }
    }

    if report.unparseable_timestamps * 2 > report.rows_in {
        return Err(DataQualityError::UnparseableTimestamps {
            failed: report.unparseable_timestamps,
            total: report.rows_in,
        });
    }
    if report.unparseable_timestamps > 0 {
        debug!(
            dropped = report.unparseable_timestamps,
            "Dropped rows with unparseable timestamps"
        );
    }

    let global_medians = global_medians(&groups);

    let mut records = Vec::with_capacity(report.rows_in - report.unparseable_timestamps);
    for (location_id, mut group) in groups {
        group.sort_by_key(|row| row.timestamp);

        let mut columns: [Vec<f64>; 2] = [Vec::new(), Vec::new()];
        for (col, name) in COLUMNS.into_iter().enumerate() {
            let filled = fill_gaps(&group, col, global_medians[col], &mut report)
                .ok_or(DataQualityError::EmptyColumn { column: name })?;
            columns[col] = filled;
        }

        if group.len() >= MIN_IQR_POINTS {
            for values in columns.iter_mut() {
                report.outliers_corrected += correct_outliers(values);
            }
        }

        let [counts, speeds] = columns;
        records.extend(
            group
                .iter()
                .zip(counts.into_iter().zip(speeds))
                .map(|(row, (vehicle_count, avg_speed_kmh))| Record {
                    timestamp: row.timestamp,
                    location_id: location_id.clone(),
                    vehicle_count,
                    avg_speed_kmh,
                }),
        );
    }

    records.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.location_id.cmp(&b.location_id))
    });

    info!(
        records = records.len(),
        dropped = report.unparseable_timestamps,
        forward_filled = report.forward_filled,
        median_imputed = report.median_imputed,
        outliers_corrected = report.outliers_corrected,
        "Cleaning complete"
    );

    Ok(Cleaned { records, report })
}

/// Median of each column over every location, used when a location has no
/// value at all for a column.
fn global_medians(groups: &BTreeMap<String, Vec<PendingRow>>) -> [Option<f64>; 2] {
    let mut medians = [None; 2];
    for (col, slot) in medians.iter_mut().enumerate() {
        let present: Vec<f64> = groups
            .values()
            .flatten()
            .filter_map(|row| row.values[col])
            .collect();
        *slot = median(&present);
    }
    medians
}

/// Forward-fills one column of a chronologically sorted group, then imputes
/// leading gaps with the group median. Returns `None` only if no value can
/// be found at all.
fn fill_gaps(
    group: &[PendingRow],
    col: usize,
    fallback: Option<f64>,
    report: &mut CleaningReport,
) -> Option<Vec<f64>> {
    let mut last = None;
    let filled: Vec<Option<f64>> = group
        .iter()
        .map(|row| match row.values[col] {
            Some(v) => {
                last = Some(v);
                Some(v)
            }
            None => {
                if last.is_some() {
                    report.forward_filled += 1;
                }
                last
            }
        })
        .collect();

    let present: Vec<f64> = filled.iter().flatten().copied().collect();
    let fill = median(&present).or(fallback);

    filled
        .into_iter()
        .map(|v| match v {
            Some(v) => Some(v),
            None => {
                report.median_imputed += 1;
                fill
            }
        })
        .collect()
}

/// Replaces values outside the IQR fence with the median, repeating until
/// every value sits inside the fence of the corrected column. Returns how
/// many replacements were made.
fn correct_outliers(values: &mut [f64]) -> usize {
    let mut corrected = 0;
    // A replacement can narrow the quartiles, so one pass is not a fixed point.
    for _ in 0..values.len() {
        let replaced = fence_pass(values);
        if replaced == 0 {
            break;
        }
        corrected += replaced;
    }
    corrected
}

fn fence_pass(values: &mut [f64]) -> usize {
    let (Some(q1), Some(q3), Some(mid)) = (
        quantile(values, 0.25),
        quantile(values, 0.75),
        median(values),
    ) else {
        return 0;
    };
    let iqr = q3 - q1;
    let lower = q1 - IQR_MULTIPLIER * iqr;
    let upper = q3 + IQR_MULTIPLIER * iqr;

    let mut replaced = 0;
    for v in values.iter_mut() {
        if *v < lower || *v > upper {
            *v = mid;
            replaced += 1;
        }
    }
    replaced
}
