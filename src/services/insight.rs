//! Retry, deadline and fallback handling around an [`InsightApi`].
//!
//! [`InsightClient::analyze`] never fails: after the attempts are used up,
//! the deadline passes, or a non-retryable error occurs, it returns the
//! deterministic mock and marks the outcome as degraded.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::analyzers::types::Anomaly;
use crate::services::insight_api::{AnalysisResult, HealthStatus, InsightApi, ServiceError};
use crate::services::mock::mock_analysis;
use crate::services::payload::InsightPayload;

/// Attempt limits and backoff timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for a single attempt; clipped to the remaining budget.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(45),
        }
    }
}

/// What the retry loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Fire attempt `number` (1-based) with at most `timeout` to finish.
    Attempt { number: u32, timeout: Duration },
    /// Every attempt has been used.
    Exhausted,
    /// The request budget is spent.
    DeadlineReached,
}

/// Retry state: attempts made, next delay and the hard deadline.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    next_delay: Duration,
    deadline: Instant,
    policy: RetryPolicy,
}

impl Backoff {
    pub fn new(policy: RetryPolicy, deadline: Instant) -> Self {
        Self {
            attempt: 0,
            next_delay: policy.base_delay,
            deadline,
            policy,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Decides whether another attempt may fire at `now`.
    pub fn begin_attempt(&mut self, now: Instant) -> Step {
        if self.attempt >= self.policy.max_attempts {
            return Step::Exhausted;
        }
        let remaining = self.deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            return Step::DeadlineReached;
        }
        self.attempt += 1;
        Step::Attempt {
            number: self.attempt,
            timeout: remaining.min(self.policy.attempt_timeout),
        }
    }

    /// Delay to sleep before the next attempt, or `None` when no attempt
    /// would be left or the sleep would run past the deadline.
    pub fn delay_before_next(&mut self, now: Instant) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let delay = self.next_delay;
        if now + delay >= self.deadline {
            return None;
        }
        self.next_delay = (self.next_delay * 2).min(self.policy.max_delay);
        Some(delay)
    }
}

/// Where an [`AnalysisResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    External,
    Mock,
    Fallback,
}

/// An analysis plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub source: AnalysisSource,
    pub attempts: u32,
}

impl AnalysisOutcome {
    /// True when the real service was wanted but the mock was used.
    pub fn degraded(&self) -> bool {
        self.source == AnalysisSource::Fallback
    }
}

#[derive(Clone)]
pub struct InsightClient {
    api: Arc<dyn InsightApi>,
    policy: RetryPolicy,
    mock_mode: bool,
    health_precheck: bool,
}

impl InsightClient {
    pub fn new(api: Arc<dyn InsightApi>, policy: RetryPolicy) -> Self {
        Self {
            api,
            policy,
            mock_mode: false,
            health_precheck: false,
        }
    }

    /// Skip the network entirely and always answer with the mock.
    pub fn with_mock_mode(mut self, enabled: bool) -> Self {
        self.mock_mode = enabled;
        self
    }

    /// Probe service health before calling it. The probe only logs.
    pub fn with_health_precheck(mut self, enabled: bool) -> Self {
        self.health_precheck = enabled;
        self
    }

    pub async fn health(&self) -> HealthStatus {
        if self.mock_mode {
            return HealthStatus::MockMode;
        }
        self.api.health().await
    }

    /// Obtains an analysis for `payload`, giving up at `deadline`.
    #[tracing::instrument(skip_all, fields(records = payload.raw_data.len(), anomalies = payload.anomalies.len()))]
    pub async fn analyze(&self, payload: &InsightPayload, deadline: Instant) -> AnalysisOutcome {
        if self.mock_mode {
            debug!("Mock mode enabled, skipping insight service");
            return AnalysisOutcome {
                result: self.mock(payload),
                source: AnalysisSource::Mock,
                attempts: 0,
            };
        }

        if self.health_precheck {
            let status = self.api.health().await;
            if status != HealthStatus::Healthy {
                warn!(?status, "Insight service health precheck failed, calling anyway");
            }
        }

        let mut backoff = Backoff::new(self.policy, deadline);
        let last_error = loop {
            let timeout = match backoff.begin_attempt(Instant::now()) {
                Step::Attempt { number, timeout } => {
                    debug!(attempt = number, timeout_ms = timeout.as_millis() as u64, "Calling insight service");
                    timeout
                }
                Step::Exhausted => break None,
                Step::DeadlineReached => {
                    warn!(attempts = backoff.attempts(), "Request budget spent before insight call");
                    break Some(ServiceError::Timeout);
                }
            };

            let error = match tokio::time::timeout(timeout, self.api.analyze(payload)).await {
                Ok(Ok(value)) => match normalize_response(value) {
                    Ok(result) => {
                        info!(attempts = backoff.attempts(), "Insight service answered");
                        return AnalysisOutcome {
                            result,
                            source: AnalysisSource::External,
                            attempts: backoff.attempts(),
                        };
                    }
                    Err(e) => e,
                },
                Ok(Err(e)) => e,
                Err(_) => ServiceError::Timeout,
            };

            if !error.is_retryable() {
                warn!(attempt = backoff.attempts(), error = %error, "Insight call failed, not retryable");
                break Some(error);
            }

            match backoff.delay_before_next(Instant::now()) {
                Some(delay) => {
                    warn!(
                        attempt = backoff.attempts(),
                        error = %error,
                        backoff_ms = delay.as_millis() as u64,
                        "Insight call failed, will retry after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => break Some(error),
            }
        };

        warn!(
            attempts = backoff.attempts(),
            error = ?last_error,
            "Insight service unavailable, using degraded fallback analysis"
        );
        AnalysisOutcome {
            result: self.mock(payload),
            source: AnalysisSource::Fallback,
            attempts: backoff.attempts(),
        }
    }

    fn mock(&self, payload: &InsightPayload) -> AnalysisResult {
        mock_analysis(&payload.anomalies, payload.locations.len())
    }
}

/// Checks a reply and maps it into an [`AnalysisResult`].
///
/// Accepts the flat `{anomalies, insights, recommendations}` shape and the
/// nested `agent_results` shape produced by multi-agent flows.
/// `recommendations` may be a list or a single string.
pub fn normalize_response(value: Value) -> Result<AnalysisResult, ServiceError> {
    let (anomalies, insights, recommendations) = match value.get("agent_results") {
        Some(agents) => (
            agents.pointer("/anomaly_detection/anomalies").cloned(),
            agents.pointer("/insights_generation/summary").cloned(),
            agents.pointer("/insights_generation/recommendations").cloned(),
        ),
        None => (
            value.get("anomalies").cloned(),
            value.get("insights").cloned(),
            value.get("recommendations").cloned(),
        ),
    };

    let anomalies = match anomalies {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<Anomaly>(item) {
                Ok(anomaly) => Some(anomaly),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed external anomaly");
                    None
                }
            })
            .collect(),
        _ => return Err(ServiceError::InvalidShape("missing anomalies array".into())),
    };

    let insights = match insights {
        Some(Value::String(s)) => s,
        _ => return Err(ServiceError::InvalidShape("missing insights string".into())),
    };

    let recommendations = match recommendations {
        Some(Value::String(s)) => vec![s],
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(ServiceError::InvalidShape(format!(
                    "recommendation is not a string: {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(ServiceError::InvalidShape("missing recommendations".into())),
    };

    Ok(AnalysisResult {
        anomalies,
        insights,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::baseline::BaselineMap;
    use crate::analyzers::types::Severity;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays canned replies, one per call, then repeats the last one.
    struct ScriptedApi {
        replies: Mutex<VecDeque<Result<Value, ServiceError>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedApi {
        fn new(replies: Vec<Result<Value, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::from(vec![Ok(good_reply())])),
                calls: AtomicU32::new(0),
                delay,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl InsightApi for ScriptedApi {
        async fn analyze(&self, _payload: &InsightPayload) -> Result<Value, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        }

        async fn health(&self) -> HealthStatus {
            HealthStatus::Unreachable
        }
    }

    fn good_reply() -> Value {
        json!({
            "anomalies": [{
                "timestamp": "2024-01-22T08:00:00",
                "location": "LOC_01",
                "severity": "high",
                "deviation_pct": 0.8
            }],
            "insights": "Morning surge at LOC_01.",
            "recommendations": ["Retime signals"]
        })
    }

    fn unavailable() -> Result<Value, ServiceError> {
        Err(ServiceError::Status {
            status: 503,
            body: "busy".into(),
        })
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn payload() -> InsightPayload {
        let anomalies = vec![Anomaly {
            timestamp: "2024-01-22T09:00:00".into(),
            location_id: "LOC_02".into(),
            severity: Severity::Medium,
            deviation_pct: 0.4,
            vehicle_count: Some(140.0),
            baseline: Some(100.0),
            description: None,
        }];
        InsightPayload::build(&[], &BaselineMap::default(), &anomalies)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let api = ScriptedApi::new(vec![unavailable(), unavailable(), Ok(good_reply())]);
        let client = InsightClient::new(api.clone(), fast_policy());

        let outcome = client.analyze(&payload(), far_deadline()).await;

        assert_eq!(api.calls(), 3);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.source, AnalysisSource::External);
        assert!(!outcome.degraded());
        assert_eq!(outcome.result.insights, "Morning surge at LOC_01.");
        assert_eq!(outcome.result.anomalies[0].location_id, "LOC_01");
    }

    #[tokio::test]
    async fn test_always_failing_falls_back_after_three_attempts() {
        let api = ScriptedApi::new(vec![unavailable()]);
        let client = InsightClient::new(api.clone(), fast_policy());

        let outcome = client.analyze(&payload(), far_deadline()).await;

        assert_eq!(api.calls(), 3);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.degraded());
        assert_eq!(outcome.result.anomalies.len(), 1);
        assert_eq!(outcome.result.anomalies[0].location_id, "LOC_02");
        assert!(!outcome.result.insights.is_empty());
        assert!(!outcome.result.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_client_error_short_circuits() {
        let api = ScriptedApi::new(vec![Err(ServiceError::Status {
            status: 401,
            body: "unauthorized".into(),
        })]);
        let client = InsightClient::new(api.clone(), fast_policy());

        let outcome = client.analyze(&payload(), far_deadline()).await;

        assert_eq!(api.calls(), 1);
        assert_eq!(outcome.source, AnalysisSource::Fallback);
    }

    #[tokio::test]
    async fn test_invalid_shape_is_retried() {
        let api = ScriptedApi::new(vec![Ok(json!({"insights": 42})), Ok(good_reply())]);
        let client = InsightClient::new(api.clone(), fast_policy());

        let outcome = client.analyze(&payload(), far_deadline()).await;

        assert_eq!(api.calls(), 2);
        assert_eq!(outcome.source, AnalysisSource::External);
    }

    #[tokio::test]
    async fn test_slow_attempts_time_out() {
        let api = ScriptedApi::slow(Duration::from_secs(5));
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            ..fast_policy()
        };
        let client = InsightClient::new(api.clone(), policy);

        let outcome = client.analyze(&payload(), far_deadline()).await;

        assert_eq!(api.calls(), 3);
        assert!(outcome.degraded());
    }

    #[tokio::test]
    async fn test_spent_budget_skips_the_call() {
        let api = ScriptedApi::new(vec![Ok(good_reply())]);
        let client = InsightClient::new(api.clone(), fast_policy());

        let outcome = client.analyze(&payload(), Instant::now()).await;

        assert_eq!(api.calls(), 0);
        assert_eq!(outcome.attempts, 0);
        assert!(outcome.degraded());
    }

    #[tokio::test]
    async fn test_mock_mode_skips_network() {
        let api = ScriptedApi::new(vec![Ok(good_reply())]);
        let client = InsightClient::new(api.clone(), fast_policy()).with_mock_mode(true);

        let outcome = client.analyze(&payload(), far_deadline()).await;

        assert_eq!(api.calls(), 0);
        assert_eq!(outcome.source, AnalysisSource::Mock);
        assert!(!outcome.degraded());
        assert_eq!(client.health().await, HealthStatus::MockMode);
    }

    #[tokio::test]
    async fn test_failed_precheck_does_not_block() {
        let api = ScriptedApi::new(vec![Ok(good_reply())]);
        let client = InsightClient::new(api.clone(), fast_policy()).with_health_precheck(true);

        let outcome = client.analyze(&payload(), far_deadline()).await;

        assert_eq!(api.calls(), 1);
        assert_eq!(outcome.source, AnalysisSource::External);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            attempt_timeout: Duration::from_secs(1),
        };
        let now = Instant::now();
        let mut backoff = Backoff::new(policy, now + Duration::from_secs(60));

        let mut delays = Vec::new();
        while let Step::Attempt { .. } = backoff.begin_attempt(now) {
            if let Some(d) = backoff.delay_before_next(now) {
                delays.push(d.as_millis());
            }
        }
        assert_eq!(delays, vec![100, 200, 250, 250]);
        assert_eq!(backoff.attempts(), 5);
        assert_eq!(backoff.begin_attempt(now), Step::Exhausted);
    }

    #[test]
    fn test_backoff_respects_deadline() {
        let now = Instant::now();
        let mut backoff = Backoff::new(fast_policy(), now + Duration::from_millis(50));

        assert_eq!(
            backoff.begin_attempt(now),
            Step::Attempt {
                number: 1,
                timeout: Duration::from_millis(50)
            }
        );
        assert_eq!(backoff.delay_before_next(now + Duration::from_millis(49)), None);
        assert_eq!(
            backoff.begin_attempt(now + Duration::from_millis(50)),
            Step::DeadlineReached
        );
    }

    #[test]
    fn test_normalize_flat_shape() {
        let result = normalize_response(json!({
            "anomalies": [],
            "insights": "All quiet.",
            "recommendations": "Keep monitoring"
        }))
        .unwrap();
        assert_eq!(result.recommendations, vec!["Keep monitoring"]);
    }

    #[test]
    fn test_normalize_agent_results_shape() {
        let result = normalize_response(json!({
            "status": "success",
            "agent_results": {
                "anomaly_detection": {"anomalies": [{
                    "timestamp": "2024-01-22T08:00:00",
                    "location": "LOC_03",
                    "severity": "medium"
                }]},
                "insights_generation": {
                    "summary": "One medium anomaly.",
                    "recommendations": ["Watch LOC_03"]
                }
            }
        }))
        .unwrap();
        assert_eq!(result.anomalies[0].severity, Severity::Medium);
        assert_eq!(result.insights, "One medium anomaly.");
    }

    #[test]
    fn test_normalize_skips_malformed_anomalies() {
        let result = normalize_response(json!({
            "anomalies": [
                {"timestamp": "2024-01-22T08:00:00", "location": "LOC_01", "severity": "catastrophic"},
                {"location": "LOC_02", "severity": "high"},
                {"timestamp": "2024-01-22T09:00:00", "location": "LOC_03", "severity": "high"}
            ],
            "insights": "Evening congestion at LOC_03.",
            "recommendations": ["Retime LOC_03 signals"]
        }))
        .unwrap();

        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].location_id, "LOC_03");
        assert_eq!(result.insights, "Evening congestion at LOC_03.");
    }

    #[test]
    fn test_normalize_rejects_bad_shapes() {
        for bad in [
            json!({"insights": "x", "recommendations": []}),
            json!({"anomalies": {}, "insights": "x", "recommendations": []}),
            json!({"anomalies": [], "recommendations": []}),
            json!({"anomalies": [], "insights": "x", "recommendations": [1]}),
        ] {
            let err = normalize_response(bad).unwrap_err();
            assert!(matches!(err, ServiceError::InvalidShape(_)));
        }
    }
}
