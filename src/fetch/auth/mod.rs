//! [`HttpClient`](super::HttpClient) wrappers that attach credentials.

mod api_key;

pub use api_key::ApiKey;
