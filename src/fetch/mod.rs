mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use reqwest::{Method, Request, StatusCode, Url};
use serde::Serialize;
use std::time::Duration;

/// Builds a JSON request with a per-request timeout.
pub fn json_request<T: Serialize + ?Sized>(
    method: Method,
    url: Url,
    body: &T,
    timeout: Duration,
) -> serde_json::Result<Request> {
    let mut req = Request::new(method, url);
    *req.body_mut() = Some(serde_json::to_vec(body)?.into());
    req.headers_mut().insert(
        reqwest::header::CONTENT_TYPE,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    *req.timeout_mut() = Some(timeout);
    Ok(req)
}

/// Executes `req` and returns the status with the full body.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    req: Request,
) -> reqwest::Result<(StatusCode, Vec<u8>)> {
    let resp = client.execute(req).await?;
    let status = resp.status();
    Ok((status, resp.bytes().await?.to_vec()))
}
