//! Statistics over cleaned traffic records.
//!
//! This module builds per-location, per-hour baselines, scores each record
//! against its baseline, and summarizes the record set for the external
//! insight service.

pub mod anomaly;
pub mod baseline;
pub mod summary;
pub mod types;
pub mod utility;
