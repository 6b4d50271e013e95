//! Langflow-backed insight provider.
//!
//! [`LangflowConfig`] carries endpoint, credentials and retry settings.
//! [`LangflowClient`] implements [`InsightApi`](crate::services::insight_api::InsightApi)
//! over HTTP.

mod client;
mod config;

pub use client::LangflowClient;
pub use config::LangflowConfig;
