//! Traffic observations before and after cleaning.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::num::ParseFloatError;

/// Wire format for every timestamp the service emits.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Layouts accepted for the `timestamp` column, tried in order after RFC 3339.
const ACCEPTED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// One CSV row as read from the upload. Numeric cells are `None` when empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub timestamp: String,
    pub location_id: String,
    pub vehicle_count: Option<f64>,
    pub avg_speed_kmh: Option<f64>,
}

/// A cleaned observation: parsed timestamp, no gaps, outliers corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(with = "timestamp_serde")]
    pub timestamp: NaiveDateTime,
    pub location_id: String,
    pub vehicle_count: f64,
    pub avg_speed_kmh: f64,
}

impl Record {
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }
}

#[cfg(test)]
impl From<&Record> for RawRow {
    fn from(record: &Record) -> Self {
        RawRow {
            timestamp: record.timestamp.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            location_id: record.location_id.clone(),
            vehicle_count: Some(record.vehicle_count),
            avg_speed_kmh: Some(record.avg_speed_kmh),
        }
    }
}

/// Parses a timestamp cell. Offsets are dropped after conversion so the
/// wall-clock hour of the sensor is kept.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }

    for format in ACCEPTED_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a numeric cell. Empty cells and the usual missing-value tokens
/// yield `Ok(None)`; anything else that is not a number is an error.
pub fn parse_numeric(raw: &str) -> Result<Option<f64>, ParseFloatError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.to_ascii_lowercase().as_str() {
        "na" | "n/a" | "nan" | "null" | "none" => return Ok(None),
        _ => {}
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        Ok(_) => Ok(None),
        Err(e) => Err(e),
    }
}

mod timestamp_serde {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
    }
}
