//! Drives one upload through every analysis stage.
//!
//! `Received → Validated → Cleaned → Baselined → Scored → Analyzed →
//! Composed → Done`. Validation and cleaning may fail the request; the
//! analysis stage degrades to the mock instead of failing.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::analyzers::anomaly::detect;
use crate::analyzers::baseline::BaselineMap;
use crate::analyzers::types::Anomaly;
use crate::clean::{CleaningReport, clean};
use crate::error::PipelineError;
use crate::output::{ProcessedPayload, compose};
use crate::parser::parse_csv;
use crate::record::Record;
use crate::services::insight::InsightClient;
use crate::services::payload::InsightPayload;
use crate::validate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Cleaned,
    Baselined,
    Scored,
    Analyzed,
    Composed,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Cleaned => "cleaned",
            Stage::Baselined => "baselined",
            Stage::Scored => "scored",
            Stage::Analyzed => "analyzed",
            Stage::Composed => "composed",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything computed before the external analysis step.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub records: Vec<Record>,
    pub report: CleaningReport,
    pub baselines: BaselineMap,
    pub anomalies: Vec<Anomaly>,
}

/// Longest time a request may spend on the external analysis.
pub const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Pipeline {
    insight: InsightClient,
    budget: Duration,
}

impl Pipeline {
    pub fn new(insight: InsightClient, budget: Duration) -> Self {
        Self { insight, budget }
    }

    pub fn insight(&self) -> &InsightClient {
        &self.insight
    }

    /// Runs the local stages: parse, validate, clean, baseline and score.
    pub fn prepare(&self, bytes: &[u8]) -> Result<Prepared, PipelineError> {
        prepare_upload(bytes)
    }

    /// Runs the full pipeline, spending at most the configured budget
    /// (capped at [`MAX_BUDGET`]) on the external analysis.
    ///
    /// The local stages run on the blocking pool.
    #[tracing::instrument(skip_all, fields(bytes = bytes.len()))]
    pub async fn run(&self, bytes: &[u8]) -> Result<ProcessedPayload, PipelineError> {
        let started = Instant::now();
        let deadline = started + self.budget.min(MAX_BUDGET);

        let owned = bytes.to_vec();
        let span = tracing::Span::current();
        let prepared =
            tokio::task::spawn_blocking(move || span.in_scope(|| prepare_upload(&owned)))
                .await
                .map_err(|e| PipelineError::Internal(format!("preparation task failed: {e}")))??;
        let payload = InsightPayload::build(&prepared.records, &prepared.baselines, &prepared.anomalies);

        let outcome = self.insight.analyze(&payload, deadline).await;
        transition(Stage::Scored, Stage::Analyzed);

        let Prepared {
            records,
            baselines,
            anomalies,
            ..
        } = prepared;
        let composed = compose(records, &baselines, anomalies, outcome);
        transition(Stage::Analyzed, Stage::Composed);

        info!(
            records = composed.processed_data.total_records,
            anomalies = composed.merged_anomalies.len(),
            degraded = composed.analysis_meta.degraded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis request finished"
        );
        transition(Stage::Composed, Stage::Done);
        Ok(composed)
    }
}

#[tracing::instrument(skip_all, fields(bytes = bytes.len()))]
fn prepare_upload(bytes: &[u8]) -> Result<Prepared, PipelineError> {
    let mut stage = Stage::Received;
    let result = prepare_stages(bytes, &mut stage);
    if let Err(e) = &result {
        warn!(stage = %stage, kind = e.kind(), error = %e, "Pipeline failed");
        debug!(from = %stage, to = %Stage::Failed, "Stage transition");
    }
    result
}

fn prepare_stages(bytes: &[u8], stage: &mut Stage) -> Result<Prepared, PipelineError> {
    let parsed = parse_csv(bytes)?;
    let rows = validate(&parsed)?;
    advance(stage, Stage::Validated);
    debug!(rows = rows.len(), "Upload validated");

    let cleaned = clean(rows)?;
    advance(stage, Stage::Cleaned);

    let baselines = BaselineMap::from_records(&cleaned.records);
    advance(stage, Stage::Baselined);
    debug!(baselines = baselines.len(), "Baselines computed");

    let anomalies = detect(&cleaned.records, &baselines);
    advance(stage, Stage::Scored);
    info!(anomalies = anomalies.len(), "Statistical anomalies scored");

    Ok(Prepared {
        records: cleaned.records,
        report: cleaned.report,
        baselines,
        anomalies,
    })
}

fn advance(stage: &mut Stage, next: Stage) {
    transition(*stage, next);
    *stage = next;
}

fn transition(from: Stage, to: Stage) {
    debug!(from = %from, to = %to, "Stage transition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::insight::{AnalysisSource, RetryPolicy};
    use crate::services::insight_api::{HealthStatus, InsightApi, ServiceError};
    use serde_json::Value;
    use std::sync::Arc;

    struct DownApi;

    #[async_trait::async_trait]
    impl InsightApi for DownApi {
        async fn analyze(&self, _payload: &InsightPayload) -> Result<Value, ServiceError> {
            Err(ServiceError::Connection("refused".into()))
        }

        async fn health(&self) -> HealthStatus {
            HealthStatus::Unreachable
        }
    }

    fn pipeline(mock_mode: bool) -> Pipeline {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_millis(100),
        };
        let insight = InsightClient::new(Arc::new(DownApi), policy).with_mock_mode(mock_mode);
        Pipeline::new(insight, Duration::from_secs(10))
    }

    /// One location, one day, flat traffic except a single busier hour.
    fn flat_day_csv() -> String {
        let mut csv = String::from("timestamp,location_id,vehicle_count,avg_speed_kmh\n");
        for hour in 0..24 {
            let count = if hour == 8 { 200 } else { 100 };
            csv.push_str(&format!("2024-01-22 {hour:02}:00:00,LOC_01,{count},50\n"));
        }
        csv
    }

    #[test]
    fn test_single_day_has_no_anomalies() {
        let prepared = pipeline(true).prepare(flat_day_csv().as_bytes()).unwrap();

        assert_eq!(prepared.records.len(), 24);
        // The 200 sits outside the location's IQR fence and is replaced
        // with the median before scoring.
        assert_eq!(prepared.report.outliers_corrected, 1);
        assert_eq!(prepared.records[8].vehicle_count, 100.0);
        assert_eq!(prepared.baselines.get("LOC_01", 8).unwrap().mean_count, 100.0);
        assert_eq!(prepared.baselines.len(), 24);
        assert!(prepared.anomalies.is_empty());
    }

    #[test]
    fn test_missing_column_is_validation_error() {
        let csv = "timestamp,location_id,vehicle_count\n2024-01-22 00:00:00,LOC_01,10\n";
        let err = pipeline(true).prepare(csv.as_bytes()).unwrap_err();

        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(err.to_string().contains("avg_speed_kmh"));
    }

    #[test]
    fn test_unreadable_timestamps_are_data_quality_error() {
        let mut csv = String::from("timestamp,location_id,vehicle_count,avg_speed_kmh\n");
        for i in 0..12 {
            csv.push_str(&format!("sometime-{i},LOC_01,100,50\n"));
        }
        let err = pipeline(true).prepare(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::DataQuality(_)));
        assert_eq!(err.kind(), "data_quality");
    }

    #[tokio::test]
    async fn test_run_in_mock_mode() {
        let payload = pipeline(true).run(flat_day_csv().as_bytes()).await.unwrap();

        assert!(payload.success);
        assert_eq!(payload.processed_data.total_records, 24);
        assert_eq!(payload.analysis_meta.source, AnalysisSource::Mock);
        assert!(!payload.analysis_meta.degraded);
        assert!(payload.merged_anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_run_reports_validation_errors() {
        let csv = "timestamp,location_id,vehicle_count\n2024-01-22 00:00:00,LOC_01,10\n";
        let err = pipeline(true).run(csv.as_bytes()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_run_with_unbounded_budget() {
        let insight =
            InsightClient::new(Arc::new(DownApi), RetryPolicy::default()).with_mock_mode(true);
        let pipeline = Pipeline::new(insight, Duration::MAX);

        let payload = pipeline.run(flat_day_csv().as_bytes()).await.unwrap();
        assert_eq!(payload.analysis_meta.source, AnalysisSource::Mock);
    }

    #[tokio::test]
    async fn test_run_degrades_when_service_is_down() {
        let payload = pipeline(false).run(flat_day_csv().as_bytes()).await.unwrap();

        assert_eq!(payload.analysis_meta.source, AnalysisSource::Fallback);
        assert_eq!(payload.analysis_meta.attempts, 3);
        assert!(payload.analysis_meta.degraded);
        assert!(!payload.langflow_analysis.insights.is_empty());
    }
}
