//! Data types shared by the analysis stages and the response payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How far a record strays from its time-of-day baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = String;

    /// Accepts the labels the insight service has been seen to use.
    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" | "severe" => Ok(Severity::High),
            "medium" | "moderate" | "warning" => Ok(Severity::Medium),
            "low" | "minor" | "info" => Ok(Severity::Low),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// A flagged observation.
///
/// The same shape is used for anomalies found locally and for those returned
/// by the insight service, which may name the location `location` and omit
/// the numeric context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub timestamp: String,
    #[serde(alias = "location")]
    pub location_id: String,
    pub severity: Severity,
    /// Fractional deviation from the baseline mean (`0.5` = 50% above).
    #[serde(default)]
    pub deviation_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_count: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Mean, spread and range of one column within one hour bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatSummary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Baselines of one location keyed by hour of day, per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationBaselines {
    pub vehicle_count: BTreeMap<u32, StatSummary>,
    pub avg_speed: BTreeMap<u32, StatSummary>,
}

/// Baselines of every location, as rendered in responses.
pub type BaselineReport = BTreeMap<String, LocationBaselines>;

/// First and last timestamp in a record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}
