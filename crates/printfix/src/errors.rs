//! Fix-loop error taxonomy with retry classification.
//!
//! Every error that can end a fix run is represented here. Callers query
//! `is_retriable()` / `retry_category()` instead of matching on messages.
//!
//! ## Retry categories
//!
//! | Category      | Retriable | Handling                                  |
//! |---------------|-----------|-------------------------------------------|
//! | Transient     | yes       | retry with backoff                        |
//! | ToolFailure   | no        | recorded as a failed fix, loop continues  |
//! | Integrity     | no        | restore from backup, failed fix           |
//! | Configuration | no        | surfaced at startup                       |
//! | JobFatal      | no        | job moves to `failed`                     |

use std::fmt;

use coordination::{JobStateError, StoreError};
use thiserror::Error;

use crate::artifacts::ArtifactError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Timeout, transport or backend hiccup in an external service.
    Transient,
    /// A fix tool errored or timed out.
    ToolFailure,
    /// A fix produced a corrupt document.
    Integrity,
    /// Missing model, bad settings file, unparseable environment.
    Configuration,
    /// Missing job or diagnosis; nothing to retry.
    JobFatal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::ToolFailure => write!(f, "tool_failure"),
            Self::Integrity => write!(f, "integrity"),
            Self::Configuration => write!(f, "configuration"),
            Self::JobFatal => write!(f, "job_fatal"),
        }
    }
}

/// Errors surfaced by the orchestrator, the worker entry and collaborators.
#[derive(Debug, Error)]
pub enum FixLoopError {
    // ── Job-fatal ────────────────────────────────────────────────────────
    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("No diagnosis found for job {0}")]
    DiagnosisMissing(String),

    // ── Transient ────────────────────────────────────────────────────────
    /// The diagnosis service failed (timeout, transport, model error).
    #[error("Diagnosis failed: {0}")]
    Diagnosis(String),

    /// Rendering or conversion failed.
    #[error("Render failed: {0}")]
    Render(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    // ── Non-retriable ────────────────────────────────────────────────────
    #[error(transparent)]
    JobState(JobStateError),

    #[error("Integrity check failed for {path}: {details}")]
    Integrity { path: String, details: String },

    #[error("Tool failure [{tool}]: {message}")]
    ToolFailure { tool: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<JobStateError> for FixLoopError {
    fn from(err: JobStateError) -> Self {
        match err {
            JobStateError::NotFound(id) => Self::JobNotFound(id),
            JobStateError::Store(e) => Self::Store(e),
            other => Self::JobState(other),
        }
    }
}

impl FixLoopError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::JobNotFound(_) | Self::DiagnosisMissing(_) | Self::JobState(_) => {
                RetryCategory::JobFatal
            }
            Self::Diagnosis(_) | Self::Render(_) | Self::Store(_) | Self::Artifact(_) => {
                RetryCategory::Transient
            }
            Self::Integrity { .. } => RetryCategory::Integrity,
            Self::ToolFailure { .. } => RetryCategory::ToolFailure,
            Self::Configuration(_) => RetryCategory::Configuration,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
