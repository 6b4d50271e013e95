use std::collections::BTreeMap;

use crate::analyzers::types::{BaselineReport, LocationBaselines, StatSummary};
use crate::analyzers::utility::{mean, round2, sample_stddev};
use crate::record::Record;

/// Expected traffic for one location during one hour of the day.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub location_id: String,
    pub hour_of_day: u32,
    pub mean_count: f64,
    /// Sample standard deviation of `vehicle_count`; 0 for a single member.
    pub spread: f64,
    pub min_count: f64,
    pub max_count: f64,
    pub samples: usize,
    pub mean_speed_kmh: f64,
    pub speed_spread: f64,
    pub min_speed_kmh: f64,
    pub max_speed_kmh: f64,
}

/// Baselines keyed by location, then hour of day.
///
/// Only groups with at least one record are present.
#[derive(Debug, Clone, Default)]
pub struct BaselineMap {
    by_location: BTreeMap<String, BTreeMap<u32, Baseline>>,
}

#[derive(Default)]
struct Accumulator {
    counts: Vec<f64>,
    speeds: Vec<f64>,
}

impl BaselineMap {
    /// Groups records by `(location_id, hour)` and summarizes each group.
    pub fn from_records(records: &[Record]) -> Self {
        let mut groups: BTreeMap<&str, BTreeMap<u32, Accumulator>> = BTreeMap::new();

        for record in records {
            let acc = groups
                .entry(record.location_id.as_str())
                .or_default()
                .entry(record.hour())
                .or_default();
            acc.counts.push(record.vehicle_count);
            acc.speeds.push(record.avg_speed_kmh);
        }

        let by_location = groups
            .into_iter()
            .map(|(location_id, hours)| {
                let hours = hours
                    .into_iter()
                    .map(|(hour, acc)| (hour, summarize(location_id, hour, &acc)))
                    .collect();
                (location_id.to_string(), hours)
            })
            .collect();

        Self { by_location }
    }

    pub fn get(&self, location_id: &str, hour: u32) -> Option<&Baseline> {
        self.by_location.get(location_id)?.get(&hour)
    }

    /// Number of `(location, hour)` entries.
    pub fn len(&self) -> usize {
        self.by_location.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Baseline> {
        self.by_location.values().flat_map(BTreeMap::values)
    }

    /// Nested `{location: {vehicle_count: {hour: stats}, avg_speed: {...}}}`
    /// view with values rounded to two decimals.
    pub fn report(&self) -> BaselineReport {
        self.by_location
            .iter()
            .map(|(location_id, hours)| {
                let mut view = LocationBaselines::default();
                for (hour, b) in hours {
                    view.vehicle_count.insert(
                        *hour,
                        rounded(b.mean_count, b.spread, b.min_count, b.max_count),
                    );
                    view.avg_speed.insert(
                        *hour,
                        rounded(
                            b.mean_speed_kmh,
                            b.speed_spread,
                            b.min_speed_kmh,
                            b.max_speed_kmh,
                        ),
                    );
                }
                (location_id.clone(), view)
            })
            .collect()
    }
}

fn summarize(location_id: &str, hour: u32, acc: &Accumulator) -> Baseline {
    let mean_count = mean(&acc.counts);
    let mean_speed_kmh = mean(&acc.speeds);

    Baseline {
        location_id: location_id.to_string(),
        hour_of_day: hour,
        mean_count,
        spread: sample_stddev(&acc.counts, mean_count),
        min_count: acc.counts.iter().copied().fold(f64::INFINITY, f64::min),
        max_count: acc.counts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        samples: acc.counts.len(),
        mean_speed_kmh,
        speed_spread: sample_stddev(&acc.speeds, mean_speed_kmh),
        min_speed_kmh: acc.speeds.iter().copied().fold(f64::INFINITY, f64::min),
        max_speed_kmh: acc.speeds.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

fn rounded(mean: f64, std: f64, min: f64, max: f64) -> StatSummary {
    StatSummary {
        mean: round2(mean),
        std: round2(std),
        min: round2(min),
        max: round2(max),
    }
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
    fn test_groups_by_location_and_hour() {
        let records = vec![
            record("2024-01-22 08:00:00", "LOC_A", 100.0),
            record("2024-01-23 08:15:00", "LOC_A", 140.0),
            record("2024-01-22 09:00:00", "LOC_A", 50.0),
            record("2024-01-22 08:00:00", "LOC_B", 10.0),
        ];
        let map = BaselineMap::from_records(&records);

        assert_eq!(map.len(), 3);
        let a8 = map.get("LOC_A", 8).unwrap();
        assert_eq!(a8.mean_count, 120.0);
        assert_eq!(a8.samples, 2);
        assert_eq!(a8.min_count, 100.0);
        assert_eq!(a8.max_count, 140.0);
        assert!((a8.spread - 28.2843).abs() < 1e-3);
        assert_eq!(map.get("LOC_B", 8).unwrap().mean_count, 10.0);
    }

    #[test]
    fn test_single_member_has_zero_spread() {
        let map = BaselineMap::from_records(&[record("2024-01-22 03:00:00", "LOC_A", 7.0)]);
        assert_eq!(map.get("LOC_A", 3).unwrap().spread, 0.0);
    }

    #[test]
    fn test_missing_group_is_absent_not_zero() {
        let map = BaselineMap::from_records(&[record("2024-01-22 03:00:00", "LOC_A", 7.0)]);
        assert!(map.get("LOC_A", 4).is_none());
        assert!(map.get("LOC_Z", 3).is_none());
    }

    #[test]
    fn test_mean_counts_every_record_once() {
        let records: Vec<Record> = (0..48)
            .map(|i| {
                let ts = format!("2024-01-{:02} {:02}:00:00", 22 + i / 24, i % 24);
                record(&ts, "LOC_A", i as f64)
            })
            .collect();
        let map = BaselineMap::from_records(&records);

        assert_eq!(map.len(), 24);
        assert_eq!(map.iter().map(|b| b.samples).sum::<usize>(), 48);
        for hour in 0..24u32 {
            let expected = (hour as f64 + (hour + 24) as f64) / 2.0;
            assert_eq!(map.get("LOC_A", hour).unwrap().mean_count, expected);
        }
    }

    #[test]
    fn test_report_shape() {
        let records = vec![
            record("2024-01-22 08:00:00", "LOC_A", 100.0),
            record("2024-01-23 08:00:00", "LOC_A", 101.0),
            record("2024-01-24 08:00:00", "LOC_A", 103.0),
        ];
        let report = BaselineMap::from_records(&records).report();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["LOC_A"]["vehicle_count"]["8"]["mean"], 101.33);
        assert_eq!(json["LOC_A"]["vehicle_count"]["8"]["min"], 100.0);
        assert_eq!(json["LOC_A"]["avg_speed"]["8"]["std"], 0.0);
    }
}
