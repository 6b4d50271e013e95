use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, Request, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::config::LangflowConfig;
use crate::fetch::auth::ApiKey;
use crate::fetch::{BasicClient, HttpClient, fetch_bytes, json_request};
use crate::services::insight_api::{HealthStatus, InsightApi, ServiceError};
use crate::services::payload::InsightPayload;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest error body kept in a [`ServiceError::Status`].
const ERROR_BODY_LIMIT: usize = 512;

/// [`InsightApi`] backed by a Langflow `run` endpoint.
pub struct LangflowClient<C: HttpClient = Box<dyn HttpClient>> {
    client: C,
    api_url: Url,
    health_url: Url,
    timeout: Duration,
}

impl LangflowClient {
    /// Builds the client described by `config`, adding the API key header
    /// when one is configured.
    pub fn from_config(config: &LangflowConfig) -> Result<Self> {
        let basic = BasicClient::with_connect_timeout(CONNECT_TIMEOUT)
            .context("Failed to build HTTP client")?;
        let client: Box<dyn HttpClient> = match &config.api_key {
            Some(key) => Box::new(
                ApiKey::x_api_key(basic, key).context("LANGFLOW_API_KEY is not a valid header")?,
            ),
            None => Box::new(basic),
        };
        Ok(Self::with_client(client, config))
    }
}

impl<C: HttpClient> LangflowClient<C> {
    pub fn with_client(client: C, config: &LangflowConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            health_url: config.health_url(),
            timeout: config.timeout,
        }
    }

    async fn send(&self, req: Request) -> Result<(StatusCode, Vec<u8>), ServiceError> {
        fetch_bytes(&self.client, req).await.map_err(|e| {
            if e.is_timeout() {
                ServiceError::Timeout
            } else {
                ServiceError::Connection(e.to_string())
            }
        })
    }
}

#[async_trait]
impl<C: HttpClient> InsightApi for LangflowClient<C> {
    async fn analyze(&self, payload: &InsightPayload) -> Result<Value, ServiceError> {
        let req = json_request(Method::POST, self.api_url.clone(), payload, self.timeout)
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        let (status, body) = self.send(req).await?;
        debug!(status = status.as_u16(), bytes = body.len(), "Langflow replied");

        if !status.is_success() {
            let mut text = String::from_utf8_lossy(&body).into_owned();
            if text.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_slice(&body).map_err(|e| ServiceError::Malformed(e.to_string()))
    }

    async fn health(&self) -> HealthStatus {
        let mut req = Request::new(Method::GET, self.health_url.clone());
        *req.timeout_mut() = Some(HEALTH_TIMEOUT);

        match self.send(req).await {
            Ok((status, _)) if status == StatusCode::OK => HealthStatus::Healthy,
            Ok((status, _)) => {
                debug!(status = status.as_u16(), "Langflow health check returned non-OK");
                HealthStatus::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, "Langflow health check failed");
                HealthStatus::Unreachable
            }
        }
    }
}
