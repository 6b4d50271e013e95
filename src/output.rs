//! Final response assembly and persistence for analysis results.
//!
//! Builds the [`ProcessedPayload`] returned by the API and the CLI, and
//! writes it (or the cleaned records) to disk.

use anyhow::Result;
use csv::WriterBuilder;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info};

use crate::analyzers::baseline::BaselineMap;
use crate::analyzers::summary::{locations, time_range};
use crate::analyzers::types::{Anomaly, BaselineReport, TimeRange};
use crate::record::{Record, format_timestamp, parse_timestamp};
use crate::services::insight::{AnalysisOutcome, AnalysisSource};
use crate::services::insight_api::AnalysisResult;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedData {
    pub total_records: usize,
    pub locations: Vec<String>,
    pub time_range: Option<TimeRange>,
    pub raw_data: Vec<Record>,
}

/// How the narrative analysis was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnalysisMeta {
    pub source: AnalysisSource,
    pub attempts: u32,
    pub degraded: bool,
}

/// Successful response body of an analysis request.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedPayload {
    pub success: bool,
    pub processed_data: ProcessedData,
    pub baselines: BaselineReport,
    pub langflow_analysis: AnalysisResult,
    pub detected_anomalies: Vec<Anomaly>,
    pub merged_anomalies: Vec<Anomaly>,
    pub analysis_meta: AnalysisMeta,
}

pub fn compose(
    records: Vec<Record>,
    baselines: &BaselineMap,
    detected: Vec<Anomaly>,
    outcome: AnalysisOutcome,
) -> ProcessedPayload {
    let analysis_meta = AnalysisMeta {
        source: outcome.source,
        attempts: outcome.attempts,
        degraded: outcome.degraded(),
    };
    let merged_anomalies = merge_anomalies(&outcome.result.anomalies, &detected);

    ProcessedPayload {
        success: true,
        processed_data: ProcessedData {
            total_records: records.len(),
            locations: locations(&records),
            time_range: time_range(&records),
            raw_data: records,
        },
        baselines: baselines.report(),
        langflow_analysis: outcome.result,
        detected_anomalies: detected,
        merged_anomalies,
        analysis_meta,
    }
}

/// Combines external and statistical anomalies keyed by
/// `(timestamp, location_id)`.
///
/// External entries come first and win on key collisions. Statistical
/// entries with a new key are appended in their original order.
pub fn merge_anomalies(external: &[Anomaly], detected: &[Anomaly]) -> Vec<Anomaly> {
    let mut seen: HashSet<(String, &str)> = HashSet::new();
    let mut merged = Vec::with_capacity(external.len() + detected.len());

    for anomaly in external {
        seen.insert(merge_key(anomaly));
        merged.push(anomaly.clone());
    }
    for anomaly in detected {
        if seen.insert(merge_key(anomaly)) {
            merged.push(anomaly.clone());
        }
    }
    merged
}

/// External services may format timestamps differently; equal instants
/// must share a key.
fn merge_key(anomaly: &Anomaly) -> (String, &str) {
    let timestamp = match parse_timestamp(&anomaly.timestamp) {
        Some(ts) => format_timestamp(&ts),
        None => anomaly.timestamp.trim().to_string(),
    };
    (timestamp, anomaly.location_id.trim())
}

/// Logs the headline numbers of a payload.
pub fn print_summary(payload: &ProcessedPayload) {
    info!(
        records = payload.processed_data.total_records,
        locations = payload.processed_data.locations.len(),
        detected = payload.detected_anomalies.len(),
        merged = payload.merged_anomalies.len(),
        source = ?payload.analysis_meta.source,
        degraded = payload.analysis_meta.degraded,
        "Analysis complete"
    );
    info!("{}", payload.langflow_analysis.insights);
    for recommendation in &payload.langflow_analysis.recommendations {
        info!(recommendation = %recommendation, "Recommendation");
    }
}

/// Writes the payload as pretty-printed JSON.
pub fn write_json(path: impl AsRef<Path>, payload: &ProcessedPayload) -> Result<()> {
    let path = path.as_ref();
    debug!(path = %path.display(), "Writing JSON payload");
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, payload)?;
    Ok(())
}

/// Writes cleaned records as CSV with a header row, replacing any
/// existing file.
pub fn write_records(path: impl AsRef<Path>, records: &[Record]) -> Result<()> {
    let path = path.as_ref();
    debug!(path = %path.display(), rows = records.len(), "Writing cleaned CSV");

    let mut writer = WriterBuilder::new().has_headers(true).from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}
