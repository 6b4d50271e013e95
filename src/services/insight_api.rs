//! Trait and types for talking to an AI insight service.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyzers::types::Anomaly;
use crate::services::payload::InsightPayload;

/// Narrative analysis of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub anomalies: Vec<Anomaly>,
    pub insights: String,
    pub recommendations: Vec<String>,
}

/// Reported reachability of the insight service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unreachable,
    MockMode,
}

/// Why a call to the insight service failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response body is not JSON: {0}")]
    Malformed(String),
    #[error("response has unexpected shape: {0}")]
    InvalidShape(String),
    #[error("could not build request: {0}")]
    Request(String),
}

impl ServiceError {
    /// Timeouts, connection failures, 5xx, 429 and well-formed JSON of the
    /// wrong shape are worth another attempt. Everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Timeout | ServiceError::Connection(_) | ServiceError::InvalidShape(_) => {
                true
            }
            ServiceError::Status { status, .. } => *status >= 500 || *status == 429,
            ServiceError::Malformed(_) | ServiceError::Request(_) => false,
        }
    }
}

/// Abstraction over an insight provider (e.g., a Langflow flow).
#[async_trait::async_trait]
pub trait InsightApi: Send + Sync {
    /// Submits the payload and returns the raw JSON reply.
    async fn analyze(&self, payload: &InsightPayload) -> Result<serde_json::Value, ServiceError>;

    /// Best-effort reachability probe.
    async fn health(&self) -> HealthStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ServiceError {
        ServiceError::Status {
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn test_retryable_classes() {
        assert!(ServiceError::Timeout.is_retryable());
        assert!(ServiceError::Connection("refused".into()).is_retryable());
        assert!(ServiceError::InvalidShape("no insights".into()).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
    }

    #[test]
    fn test_non_retryable_classes() {
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!ServiceError::Malformed("<html>".into()).is_retryable());
    }

    #[test]
    fn test_health_status_labels() {
        assert_eq!(
            serde_json::to_value(HealthStatus::MockMode).unwrap(),
            serde_json::json!("mock_mode")
        );
        assert_eq!(
            serde_json::to_value(HealthStatus::Unreachable).unwrap(),
            serde_json::json!("unreachable")
        );
    }
}
