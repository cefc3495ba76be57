use crate::state::StoreError;

use super::status::JobStatus;

/// Errors from job lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Only raised when strict transitions are enabled.
    #[error("Illegal transition {from} → {to} for job {job_id}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job record is missing field `{0}`")]
    MissingField(String),

    #[error("Job record field `{field}` has invalid value `{value}`")]
    InvalidField { field: String, value: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobStateError {
    pub(crate) fn invalid_field(field: &str, value: &str) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}
