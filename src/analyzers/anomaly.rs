use tracing::debug;

use crate::analyzers::baseline::BaselineMap;
use crate::analyzers::types::{Anomaly, Severity};
use crate::record::{Record, format_timestamp};

/// Deviation at or above which a record is a high-severity anomaly.
pub const HIGH_THRESHOLD: f64 = 0.50;
/// Deviation at or above which a record is a medium-severity anomaly.
pub const MEDIUM_THRESHOLD: f64 = 0.30;

/// Converts a fractional deviation from baseline into a severity.
///
/// | abs(deviation) | Severity      |
/// |----------------|---------------|
/// | >= 0.50        | high          |
/// | >= 0.30        | medium        |
/// | < 0.30         | not anomalous |
pub fn classify(deviation: f64) -> Option<Severity> {
    match deviation.abs() {
        d if d >= HIGH_THRESHOLD => Some(Severity::High),
        d if d >= MEDIUM_THRESHOLD => Some(Severity::Medium),
        _ => None,
    }
}

/// Scores every record against its `(location, hour)` baseline.
///
/// Records without a baseline, or whose baseline mean is zero, are never
/// flagged. Output follows input order.
#[tracing::instrument(skip_all, fields(records = records.len()))]
pub fn detect(records: &[Record], baselines: &BaselineMap) -> Vec<Anomaly> {
    let anomalies: Vec<Anomaly> = records
        .iter()
        .filter_map(|record| {
            let baseline = baselines.get(&record.location_id, record.hour())?;
            if baseline.mean_count == 0.0 {
                return None;
            }
            let deviation = (record.vehicle_count - baseline.mean_count) / baseline.mean_count;
            let severity = classify(deviation)?;

            Some(Anomaly {
                timestamp: format_timestamp(&record.timestamp),
                location_id: record.location_id.clone(),
                severity,
                deviation_pct: deviation,
                vehicle_count: Some(record.vehicle_count),
                baseline: Some(baseline.mean_count),
                description: Some(describe(deviation)),
            })
        })
        .collect();

    debug!(anomalies = anomalies.len(), "Scoring complete");
    anomalies
}

fn describe(deviation: f64) -> String {
    let kind = if deviation > 0.0 { "spike" } else { "drop" };
    format!(
        "Traffic {kind} of {:.0}% detected",
        (deviation * 100.0).abs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn record(ts: &str, loc: &str, count: f64) -> Record {
        Record {
            timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").unwrap(),
            location_id: loc.to_string(),
            vehicle_count: count,
            avg_speed_kmh: 40.0,
        }
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0.50), Some(Severity::High));
        assert_eq!(classify(0.499), Some(Severity::Medium));
        assert_eq!(classify(0.30), Some(Severity::Medium));
        assert_eq!(classify(0.299), None);
        assert_eq!(classify(0.0), None);
        assert_eq!(classify(-0.30), Some(Severity::Medium));
        assert_eq!(classify(-0.75), Some(Severity::High));
        assert_eq!(classify(1.0), Some(Severity::High));
    }

    #[test]
    fn test_detect_flags_in_input_order() {
        let records = vec![
            record("2024-01-22 08:00:00", "LOC_A", 40.0),
            record("2024-01-23 08:00:00", "LOC_A", 160.0),
            record("2024-01-24 08:00:00", "LOC_A", 100.0),
        ];
        let baselines = BaselineMap::from_records(&records);
        let anomalies = detect(&records, &baselines);

        assert_eq!(anomalies.len(), 2);
        assert_eq!(anomalies[0].timestamp, "2024-01-22T08:00:00");
        assert_eq!(anomalies[0].severity, Severity::High);
        assert!((anomalies[0].deviation_pct + 0.6).abs() < 1e-9);
        assert_eq!(anomalies[0].description.as_deref(), Some("Traffic drop of 60% detected"));
        assert_eq!(anomalies[1].timestamp, "2024-01-23T08:00:00");
        assert_eq!(anomalies[1].baseline, Some(100.0));
    }

    #[test]
    fn test_detect_medium() {
        let records = vec![
            record("2024-01-22 08:00:00", "LOC_A", 65.0),
            record("2024-01-23 08:00:00", "LOC_A", 135.0),
        ];
        let baselines = BaselineMap::from_records(&records);
        let anomalies = detect(&records, &baselines);

        assert_eq!(anomalies.len(), 2);
        assert!(anomalies.iter().all(|a| a.severity == Severity::Medium));
    }

    #[test]
    fn test_missing_baseline_is_not_flagged() {
        let known = vec![record("2024-01-22 08:00:00", "LOC_A", 10.0)];
        let baselines = BaselineMap::from_records(&known);
        let records = vec![
            record("2024-01-22 09:00:00", "LOC_A", 1000.0),
            record("2024-01-22 08:00:00", "LOC_B", 1000.0),
        ];
        assert!(detect(&records, &baselines).is_empty());
    }

    #[test]
    fn test_zero_mean_baseline_is_skipped() {
        let records = vec![
            record("2024-01-22 03:00:00", "LOC_A", 0.0),
            record("2024-01-23 03:00:00", "LOC_A", 0.0),
        ];
        let baselines = BaselineMap::from_records(&records);
        assert!(detect(&records, &baselines).is_empty());
    }
}
