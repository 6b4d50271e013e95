//! Structural checks run before any numeric work.

use thiserror::Error;

use crate::parser::ParsedCsv;
use crate::record::{RawRow, parse_numeric};

pub const REQUIRED_COLUMNS: [&str; 4] = ["timestamp", "location_id", "vehicle_count", "avg_speed_kmh"];

/// Minimum number of rows needed for a meaningful baseline.
pub const MIN_RECORDS: usize = 10;

/// A single reason an upload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationProblem {
    #[error("CSV file is empty")]
    Empty,
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Column '{0}' must be numeric")]
    NonNumeric(String),
    #[error("CSV must contain at least {needed} records for analysis (found {found})")]
    TooFewRecords { needed: usize, found: usize },
}

/// Every problem found in an upload, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .problems.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct ValidationError {
    pub problems: Vec<ValidationProblem>,
}

impl ValidationError {
    /// One user-facing message per problem.
    pub fn messages(&self) -> Vec<String> {
        self.problems.iter().map(ToString::to_string).collect()
    }
}

/// Checks required columns, numeric column contents and row count, then
/// returns the rows as [`RawRow`]s.
pub fn validate(csv: &ParsedCsv) -> Result<Vec<RawRow>, ValidationError> {
    if csv.headers.is_empty() || csv.is_empty() {
        return Err(ValidationError {
            problems: vec![ValidationProblem::Empty],
        });
    }

    let mut problems = Vec::new();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| csv.column(c).is_none())
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        problems.push(ValidationProblem::MissingColumns(missing));
    }

    for name in ["vehicle_count", "avg_speed_kmh"] {
        if let Some(idx) = csv.column(name) {
            let non_numeric = csv
                .rows
                .iter()
                .any(|row| parse_numeric(row.get(idx).unwrap_or("")).is_err());
            if non_numeric {
                problems.push(ValidationProblem::NonNumeric(name.to_string()));
            }
        }
    }

    if csv.len() < MIN_RECORDS {
        problems.push(ValidationProblem::TooFewRecords {
            needed: MIN_RECORDS,
            found: csv.len(),
        });
    }

    if !problems.is_empty() {
        return Err(ValidationError { problems });
    }

    // All four columns are present past this point.
    let [ts, loc, count, speed] = REQUIRED_COLUMNS.map(|c| csv.column(c).unwrap_or_default());
    let cell = |row: &csv::StringRecord, idx: usize| row.get(idx).unwrap_or("").to_string();

    Ok(csv
        .rows
        .iter()
        .map(|row| RawRow {
            timestamp: cell(row, ts),
            location_id: cell(row, loc),
            vehicle_count: parse_numeric(row.get(count).unwrap_or("")).ok().flatten(),
            avg_speed_kmh: parse_numeric(row.get(speed).unwrap_or("")).ok().flatten(),
        })
        .collect())
}
