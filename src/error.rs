//! Failure kinds that abort an analysis request.

use thiserror::Error;

use crate::clean::DataQualityError;
use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid CSV format: {0}")]
    Validation(#[from] ValidationError),

    #[error("Data quality check failed: {0}")]
    DataQuality(#[from] DataQualityError),

    #[error("analysis failed: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Short, stable label used in logs and metrics fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Csv(_) => "csv",
            PipelineError::Validation(_) => "validation",
            PipelineError::DataQuality(_) => "data_quality",
            PipelineError::Internal(_) => "internal",
        }
    }
}
