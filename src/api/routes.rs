//! API route definitions.

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::state::AppState;
use crate::error::PipelineError;
use crate::output::ProcessedPayload;

/// Multipart field holding the uploaded CSV.
const FILE_FIELD: &str = "file";

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/analyze", post(analyze))
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Traffic Pattern Detective API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "analyze": "/analyze (POST)"
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let external = state.pipeline.insight().health().await;
    Json(json!({
        "backend": "healthy",
        "external_service": external,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ProcessedPayload>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            let filename = field.file_name().map(str::to_string);
            let bytes = field.bytes().await?;
            info!(filename = ?filename, bytes = bytes.len(), "Upload received");
            upload = Some(bytes);
            break;
        }
    }
    let Some(bytes) = upload else {
        return Err(ApiError::BadRequest {
            error: "No file uploaded".to_string(),
            details: json!(format!("expected a multipart field named '{FILE_FIELD}'")),
        });
    };

    let payload = state.pipeline.run(&bytes).await?;
    Ok(Json(payload))
}

/// Error body returned by every route: `{success: false, error, details?}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest { error: String, details: Value },
    PayloadTooLarge(String),
    Unprocessable { error: String, details: Value },
    Internal,
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Csv(e) => ApiError::BadRequest {
                error: "CSV parsing error".to_string(),
                details: json!(e.to_string()),
            },
            PipelineError::Validation(e) => ApiError::BadRequest {
                error: "Invalid CSV format".to_string(),
                details: json!(e.messages()),
            },
            PipelineError::DataQuality(e) => ApiError::Unprocessable {
                error: "Data quality check failed".to_string(),
                details: json!(e.to_string()),
            },
            PipelineError::Internal(e) => {
                error!(error = %e, "Analysis failed");
                ApiError::Internal
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        warn!(error = %err, "Rejected multipart upload");
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadRequest {
                error: "Invalid upload".to_string(),
                details: json!(err.body_text()),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest { error, details } => (
                StatusCode::BAD_REQUEST,
                json!({"success": false, "error": error, "details": details}),
            ),
            ApiError::PayloadTooLarge(details) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                json!({"success": false, "error": "File too large", "details": details}),
            ),
            ApiError::Unprocessable { error, details } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({"success": false, "error": error, "details": details}),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"success": false, "error": "analysis failed"}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_internal_failure_is_500() {
        let err = ApiError::from(PipelineError::Internal("preparation task failed".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "analysis failed");
    }
}
