use anyhow::{Context, Result};
use reqwest::Url;
use std::str::FromStr;
use std::time::Duration;

use crate::services::insight::RetryPolicy;

pub const DEFAULT_API_URL: &str = "http://localhost:7860/api/v1/run";
const DEFAULT_BUDGET_SECS: u64 = 120;

/// Settings for the Langflow insight service and the analysis budget.
///
/// Read from the environment (after `.env` is loaded):
///
/// | Variable                   | Default                            |
/// |----------------------------|------------------------------------|
/// | `LANGFLOW_API_URL`         | `http://localhost:7860/api/v1/run` |
/// | `LANGFLOW_API_KEY`         | unset                              |
/// | `USE_MOCK_LANGFLOW`        | `true`                             |
/// | `LANGFLOW_TIMEOUT_SECS`    | `45`                               |
/// | `LANGFLOW_MAX_ATTEMPTS`    | `3`                                |
/// | `LANGFLOW_RETRY_BASE_MS`   | `500`                              |
/// | `LANGFLOW_RETRY_MAX_MS`    | `8000`                             |
/// | `LANGFLOW_HEALTH_PRECHECK` | `false`                            |
/// | `ANALYSIS_BUDGET_SECS`     | `120`                              |
#[derive(Debug, Clone)]
pub struct LangflowConfig {
    pub api_url: Url,
    pub api_key: Option<String>,
    pub use_mock: bool,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub health_precheck: bool,
    pub budget: Duration,
}

impl LangflowConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let policy = RetryPolicy::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_url = get("LANGFLOW_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = Url::parse(raw_url.trim())
            .with_context(|| format!("LANGFLOW_API_URL is not a valid URL: '{raw_url}'"))?;

        Ok(Self {
            api_url,
            api_key: get("LANGFLOW_API_KEY"),
            use_mock: parse_or(get("USE_MOCK_LANGFLOW"), "USE_MOCK_LANGFLOW", true, parse_bool)?,
            timeout: Duration::from_secs(parse_or(
                get("LANGFLOW_TIMEOUT_SECS"),
                "LANGFLOW_TIMEOUT_SECS",
                policy.attempt_timeout.as_secs(),
                u64::from_str,
            )?),
            max_attempts: parse_or(
                get("LANGFLOW_MAX_ATTEMPTS"),
                "LANGFLOW_MAX_ATTEMPTS",
                policy.max_attempts,
                u32::from_str,
            )?
            .max(1),
            retry_base: Duration::from_millis(parse_or(
                get("LANGFLOW_RETRY_BASE_MS"),
                "LANGFLOW_RETRY_BASE_MS",
                policy.base_delay.as_millis() as u64,
                u64::from_str,
            )?),
            retry_max: Duration::from_millis(parse_or(
                get("LANGFLOW_RETRY_MAX_MS"),
                "LANGFLOW_RETRY_MAX_MS",
                policy.max_delay.as_millis() as u64,
                u64::from_str,
            )?),
            health_precheck: parse_or(
                get("LANGFLOW_HEALTH_PRECHECK"),
                "LANGFLOW_HEALTH_PRECHECK",
                false,
                parse_bool,
            )?,
            budget: Duration::from_secs(parse_or(
                get("ANALYSIS_BUDGET_SECS"),
                "ANALYSIS_BUDGET_SECS",
                DEFAULT_BUDGET_SECS,
                u64::from_str,
            )?),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.retry_base,
            max_delay: self.retry_max.max(self.retry_base),
            attempt_timeout: self.timeout,
        }
    }

    /// Host root used for health checks.
    ///
    /// `http://host:7860/api/v1/run/flow_id` becomes `http://host:7860/health`.
    pub fn health_url(&self) -> Url {
        let mut url = self.api_url.clone();
        let path = url.path().to_string();
        let base = match path.find("/api/") {
            Some(idx) => &path[..idx],
            None => path.trim_end_matches('/'),
        };
        url.set_path(&format!("{base}/health"));
        url.set_query(None);
        url
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("expected true/false, got '{other}'")),
    }
}

fn parse_or<T, E: std::fmt::Display>(
    raw: Option<String>,
    key: &str,
    default: T,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<T> {
    match raw {
        Some(raw) => parse(raw.trim()).map_err(|e| anyhow::anyhow!("{key}: {e}")),
        None => Ok(default),
    }
}
