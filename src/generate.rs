//! Synthetic traffic data with injected anomalies.
//!
//! Produces hourly rows per location following commuter profiles (night,
//! morning peak, lunch, evening peak, off-peak), thinner weekend traffic,
//! random variation and occasional incident/event/weather disturbances.
//! Output is reproducible for a given seed.

use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Weekday};
use csv::WriterBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

const OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const COUNT_BOUNDS: (i64, i64) = (10, 1000);
const SPEED_BOUNDS: (i64, i64) = (5, 80);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// One week, 5% anomalies.
    NormalWeek,
    /// Three days, 15% anomalies.
    HighCongestion,
    /// Two weeks, 8% anomalies.
    ExtendedPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disturbance {
    /// Crash or breakdown: many vehicles, slow speeds.
    Incident,
    /// Stadium or concert traffic: very many vehicles, moderate speeds.
    Event,
    Weather,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub start: NaiveDate,
    pub days: u32,
    pub locations: Vec<String>,
    /// Probability that a given row is disturbed.
    pub anomaly_rate: f64,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2024, 1, 22).unwrap_or_default(),
            days: 7,
            locations: vec!["LOC_01".into(), "LOC_02".into(), "LOC_03".into()],
            anomaly_rate: 0.08,
            seed: 42,
        }
    }
}

impl GeneratorConfig {
    pub fn for_scenario(scenario: Scenario) -> Self {
        let (days, anomaly_rate) = match scenario {
            Scenario::NormalWeek => (7, 0.05),
            Scenario::HighCongestion => (3, 0.15),
            Scenario::ExtendedPeriod => (14, 0.08),
        };
        Self {
            days,
            anomaly_rate,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedRow {
    pub timestamp: String,
    pub location_id: String,
    pub vehicle_count: i64,
    pub avg_speed_kmh: i64,
    #[serde(skip)]
    pub disturbance: Option<Disturbance>,
}

/// Typical count and speed for an hour of a weekday.
fn hourly_profile(hour: u32) -> (f64, i64) {
    match hour {
        7..=9 => (420.0, 24),
        12..=13 => (280.0, 38),
        17..=19 => (480.0, 20),
        0..=5 => (60.0, 65),
        _ => (180.0, 52),
    }
}

pub fn generate(config: &GeneratorConfig) -> Vec<GeneratedRow> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let start = config.start.and_time(chrono::NaiveTime::MIN);
    let hours = i64::from(config.days) * 24;
    let anomaly_rate = if config.anomaly_rate.is_nan() {
        0.0
    } else {
        config.anomaly_rate.clamp(0.0, 1.0)
    };

    let mut rows = Vec::with_capacity(config.locations.len() * hours as usize);
    for location in &config.locations {
        let location_factor = rng.gen_range(0.8..1.2);

        for offset in 0..hours {
            let at = start + Duration::hours(offset);
            rows.push(generate_row(&mut rng, location, at, location_factor, anomaly_rate));
        }
    }

    debug!(rows = rows.len(), seed = config.seed, "Generated synthetic traffic");
    rows
}

fn generate_row(
    rng: &mut StdRng,
    location: &str,
    at: NaiveDateTime,
    location_factor: f64,
    anomaly_rate: f64,
) -> GeneratedRow {
    let (base_count, base_speed) = hourly_profile(at.hour());
    let mut count = (base_count * location_factor) as i64;
    let mut speed = base_speed;

    if matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
        count = (count as f64 * 0.6) as i64;
        speed = (speed as f64 * 1.15) as i64;
    }

    count += rng.gen_range(-40..50);
    speed += rng.gen_range(-6..8);

    let disturbance = if rng.gen_bool(anomaly_rate) {
        let kind = match rng.gen_range(0..3) {
            0 => Disturbance::Incident,
            1 => Disturbance::Event,
            _ => Disturbance::Weather,
        };
        let (count_factor, speed_factor) = match kind {
            Disturbance::Incident => (rng.gen_range(1.4..1.8), rng.gen_range(0.4..0.6)),
            Disturbance::Event => (rng.gen_range(1.6..2.0), rng.gen_range(0.7..0.85)),
            Disturbance::Weather => (rng.gen_range(1.2..1.4), rng.gen_range(0.6..0.75)),
        };
        count = (count as f64 * count_factor) as i64;
        speed = (speed as f64 * speed_factor) as i64;
        Some(kind)
    } else {
        None
    };

    GeneratedRow {
        timestamp: at.format(OUTPUT_FORMAT).to_string(),
        location_id: location.to_string(),
        vehicle_count: count.clamp(COUNT_BOUNDS.0, COUNT_BOUNDS.1),
        avg_speed_kmh: speed.clamp(SPEED_BOUNDS.0, SPEED_BOUNDS.1),
        disturbance,
    }
}

/// Writes generated rows as an upload-ready CSV.
pub fn write_csv(path: impl AsRef<Path>, rows: &[GeneratedRow]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new().has_headers(true).from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    let disturbed = rows.iter().filter(|r| r.disturbance.is_some()).count();
    info!(path = %path.display(), rows = rows.len(), disturbed, "Synthetic CSV written");
    Ok(())
}
