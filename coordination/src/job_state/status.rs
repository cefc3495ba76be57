//! Job lifecycle states and the legal transition graph.
//!
//! The graph is advisory: [`crate::job_state::JobStore`] consults
//! [`is_legal_transition`] on every write and logs edges outside it, but
//! only rejects them when strict transitions are configured.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The set of job lifecycle states.
///
/// Every job starts at `Uploaded`. `Done`, `NeedsReview` and `Failed` stamp
/// a completion time; `Done` and `NeedsReview` may re-enter `Fixing` when a
/// user rejects the result or re-triggers the fix loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// File received, nothing processed yet.
    Uploaded,
    /// Upload is being validated and stored.
    Ingesting,
    /// Editable source is being converted to the reference PDF.
    Converting,
    /// Page images are being rendered from the reference PDF.
    Rendering,
    /// Ingest complete; ready for diagnosis.
    Ingested,
    /// Visual and structural diagnosis running.
    Diagnosing,
    /// Diagnosis stored; ready for fixing.
    Diagnosed,
    /// The fix loop is running.
    Fixing,
    /// Fix loop finished; result being checked.
    Verifying,
    /// Converged to print-ready.
    Done,
    /// Loop finished without full convergence.
    NeedsReview,
    /// Unrecoverable error.
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 12] = [
        Self::Uploaded,
        Self::Ingesting,
        Self::Converting,
        Self::Rendering,
        Self::Ingested,
        Self::Diagnosing,
        Self::Diagnosed,
        Self::Fixing,
        Self::Verifying,
        Self::Done,
        Self::NeedsReview,
        Self::Failed,
    ];

    /// Whether entering this state completes the job (stamps `completed_at`).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::NeedsReview | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Ingesting => "ingesting",
            Self::Converting => "converting",
            Self::Rendering => "rendering",
            Self::Ingested => "ingested",
            Self::Diagnosing => "diagnosing",
            Self::Diagnosed => "diagnosed",
            Self::Fixing => "fixing",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::NeedsReview => "needs_review",
            Self::Failed => "failed",
        }
    }

    /// The allowed successors of this state.
    pub fn successors(self) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|to| is_legal_transition(self, *to))
            .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Legal transitions between job states.
///
/// ```text
/// Uploaded → Ingesting → Converting → Rendering → Ingested → Diagnosing
/// Diagnosing → Diagnosed | Fixing
/// Diagnosed → Fixing
/// Fixing → Verifying
/// Verifying → Done | NeedsReview
/// Done | NeedsReview → Fixing      (manual reject / re-trigger)
/// any → Failed
/// ```
pub fn is_legal_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;

    if to == Failed {
        return true;
    }

    matches!(
        (from, to),
        (Uploaded, Ingesting)
            | (Ingesting, Converting)
            | (Converting, Rendering)
            | (Rendering, Ingested)
            | (Ingested, Diagnosing)
            | (Diagnosing, Diagnosed)
            | (Diagnosing, Fixing)
            | (Diagnosed, Fixing)
            | (Fixing, Verifying)
            | (Verifying, Done)
            | (Verifying, NeedsReview)
            | (Done, Fixing)
            | (NeedsReview, Fixing)
    )
}
