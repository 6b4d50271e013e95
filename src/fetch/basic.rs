use super::client::HttpClient;
use async_trait::async_trait;
use std::time::Duration;

/// Plain [`HttpClient`] over a shared `reqwest::Client`.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    /// Client with a connect timeout, for services that may be down.
    pub fn with_connect_timeout(connect_timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
