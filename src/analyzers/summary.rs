//! Record-set summaries used in the response and the insight payload.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::analyzers::types::TimeRange;
use crate::analyzers::utility::{mean, round2};
use crate::record::{Record, format_timestamp};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_records: usize,
    pub unique_locations: usize,
    pub time_span_hours: f64,
    pub avg_vehicle_count: f64,
    pub avg_speed: f64,
    /// Hour of day with the highest mean vehicle count.
    pub peak_hour_traffic: Option<u32>,
    /// Hour of day with the lowest mean vehicle count.
    pub lowest_hour_traffic: Option<u32>,
}

impl SummaryStats {
    pub fn from_records(records: &[Record]) -> Self {
        let counts: Vec<f64> = records.iter().map(|r| r.vehicle_count).collect();
        let speeds: Vec<f64> = records.iter().map(|r| r.avg_speed_kmh).collect();

        let time_span_hours = match (
            records.iter().map(|r| r.timestamp).min(),
            records.iter().map(|r| r.timestamp).max(),
        ) {
            (Some(first), Some(last)) => (last - first).num_seconds() as f64 / 3600.0,
            _ => 0.0,
        };

        let mut by_hour: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
        for r in records {
            let entry = by_hour.entry(r.hour()).or_default();
            entry.0 += r.vehicle_count;
            entry.1 += 1;
        }
        let hourly_means: Vec<(u32, f64)> = by_hour
            .into_iter()
            .map(|(hour, (sum, n))| (hour, sum / n as f64))
            .collect();

        // Ties resolve to the earliest hour.
        let mut peak: Option<(u32, f64)> = None;
        let mut lowest: Option<(u32, f64)> = None;
        for &(hour, m) in &hourly_means {
            if peak.is_none_or(|(_, best)| m > best) {
                peak = Some((hour, m));
            }
            if lowest.is_none_or(|(_, best)| m < best) {
                lowest = Some((hour, m));
            }
        }

        SummaryStats {
            total_records: records.len(),
            unique_locations: locations(records).len(),
            time_span_hours: round2(time_span_hours),
            avg_vehicle_count: round2(mean(&counts)),
            avg_speed: round2(mean(&speeds)),
            peak_hour_traffic: peak.map(|(h, _)| h),
            lowest_hour_traffic: lowest.map(|(h, _)| h),
        }
    }
}

/// Distinct location ids in first-seen order.
pub fn locations(records: &[Record]) -> Vec<String> {
    let mut seen = Vec::new();
    for r in records {
        if !seen.contains(&r.location_id) {
            seen.push(r.location_id.clone());
        }
    }
    seen
}

/// Earliest and latest timestamp, or `None` for an empty set.
pub fn time_range(records: &[Record]) -> Option<TimeRange> {
    let start = records.iter().map(|r| r.timestamp).min()?;
    let end = records.iter().map(|r| r.timestamp).max()?;
    Some(TimeRange {
        start: format_timestamp(&start),
        end: format_timestamp(&end),
    })
}
