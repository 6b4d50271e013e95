//! Bounded request body for the insight service.

use chrono::Datelike;
use serde::Serialize;

use crate::analyzers::baseline::BaselineMap;
use crate::analyzers::summary::{SummaryStats, locations, time_range};
use crate::analyzers::types::{Anomaly, BaselineReport, TimeRange};
use crate::record::{Record, format_timestamp};

/// Most records forwarded to the insight service per request.
pub const MAX_PAYLOAD_RECORDS: usize = 100;

const ANALYSIS_REQUEST: &str = "Detect traffic anomalies and provide insights";

/// One record as the insight flow expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadRecord {
    pub timestamp: String,
    pub location: String,
    pub vehicle_count: f64,
    pub avg_speed: f64,
    pub hour: u32,
    /// 0 = Monday.
    pub day_of_week: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightPayload {
    pub raw_data: Vec<PayloadRecord>,
    pub baselines: BaselineReport,
    pub anomalies: Vec<Anomaly>,
    pub summary_stats: SummaryStats,
    pub time_range: Option<TimeRange>,
    pub locations: Vec<String>,
    pub analysis_request: &'static str,
}

impl InsightPayload {
    pub fn build(records: &[Record], baselines: &BaselineMap, anomalies: &[Anomaly]) -> Self {
        let raw_data = sample_records(records, MAX_PAYLOAD_RECORDS)
            .into_iter()
            .map(|r| PayloadRecord {
                timestamp: format_timestamp(&r.timestamp),
                location: r.location_id.clone(),
                vehicle_count: r.vehicle_count,
                avg_speed: r.avg_speed_kmh,
                hour: r.hour(),
                day_of_week: r.timestamp.weekday().num_days_from_monday(),
            })
            .collect();

        InsightPayload {
            raw_data,
            baselines: baselines.report(),
            anomalies: anomalies.to_vec(),
            summary_stats: SummaryStats::from_records(records),
            time_range: time_range(records),
            locations: locations(records),
            analysis_request: ANALYSIS_REQUEST,
        }
    }
}

/// Picks at most `limit` records spread evenly across the set, so the
/// sample covers the whole time range rather than just its start.
pub fn sample_records(records: &[Record], limit: usize) -> Vec<&Record> {
    if records.len() <= limit {
        return records.iter().collect();
    }
    (0..limit).map(|i| &records[i * records.len() / limit]).collect()
}
