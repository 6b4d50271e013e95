use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiKeyError {
    #[error("invalid header name: {0}")]
    Name(#[from] InvalidHeaderName),
    #[error("invalid API key value: {0}")]
    Value(#[from] InvalidHeaderValue),
}

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// Langflow reads the key from `x-api-key`. The header is validated once,
/// at construction.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    key: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self, ApiKeyError> {
        let mut key = HeaderValue::from_str(key)?;
        key.set_sensitive(true);
        Ok(Self {
            inner,
            header_name: HeaderName::from_bytes(header_name.as_bytes())?,
            key,
        })
    }

    /// Uses the `x-api-key` header expected by Langflow.
    pub fn x_api_key(inner: C, key: &str) -> Result<Self, ApiKeyError> {
        Self::new(inner, "x-api-key", key)
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.key.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use std::time::Duration;

    fn client() -> BasicClient {
        BasicClient::with_connect_timeout(Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_rejects_bad_header_value() {
        assert!(ApiKey::x_api_key(client(), "line\nbreak").is_err());
    }

    #[test]
    fn test_x_api_key_header_is_sensitive() {
        let wrapped = ApiKey::x_api_key(client(), "secret").unwrap();
        assert_eq!(wrapped.header_name.as_str(), "x-api-key");
        assert_eq!(wrapped.key, "secret");
        assert!(wrapped.key.is_sensitive());
    }
}
