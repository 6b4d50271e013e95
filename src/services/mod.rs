//! External insight service: wire payload, provider trait, retry client and
//! the deterministic fallback.

pub mod insight;
pub mod insight_api;
pub mod mock;
pub mod payload;
