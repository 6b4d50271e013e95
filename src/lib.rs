pub mod analyzers;
pub mod api;
pub mod clean;
pub mod error;
pub mod fetch;
pub mod generate;
pub mod infra;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod services;
pub mod validate;

use std::sync::Arc;

use anyhow::Result;

use crate::infra::langflow::{LangflowClient, LangflowConfig};
use crate::pipeline::Pipeline;
use crate::services::insight::InsightClient;

/// Wires the Langflow client, retry policy and request budget together.
pub fn build_pipeline(config: &LangflowConfig) -> Result<Pipeline> {
    let api = Arc::new(LangflowClient::from_config(config)?);
    let insight = InsightClient::new(api, config.retry_policy())
        .with_mock_mode(config.use_mock)
        .with_health_precheck(config.health_precheck);
    Ok(Pipeline::new(insight, config.budget))
}

/// Runs the HTTP API until the process is stopped.
pub async fn serve(bind: &str, config: &LangflowConfig) -> Result<()> {
    let addr: std::net::SocketAddr = bind.parse()?;
    let app = api::router(api::state::AppState::new(build_pipeline(config)?));

    tracing::info!(
        %addr,
        langflow_url = %config.api_url,
        mock = config.use_mock,
        "Traffic Detective listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
