//! Convergence detection: decides when the fix loop should stop.
//!
//! Pure and deterministic. The only input is the append-only iteration
//! history plus two scalars supplied by the caller, so the same history
//! always yields the same decision.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Snapshot of one fix-loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceState {
    /// 1-based iteration number.
    pub iteration: u32,
    pub issues_before: u32,
    pub issues_after: u32,
    pub critical_before: u32,
    pub critical_after: u32,
    pub warning_before: u32,
    pub warning_after: u32,
    pub fixes_applied: u32,
    pub fixes_failed: u32,
    /// Whether any fallback-tier action ran in this iteration.
    #[serde(default)]
    pub used_fallback: bool,
}

impl ConvergenceState {
    /// Critical plus warning issues remaining after the iteration.
    pub fn important_after(&self) -> u32 {
        self.critical_after + self.warning_after
    }
}

/// Why the fix loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    MaxIterations { max: u32 },
    AllIssuesResolved,
    NoCriticalOrWarning,
    AllFixesFailed,
    NoApplicableFixes,
    Stalled { before: u32, after: u32 },
    /// Re-diagnosis kept failing after retries; the loop keeps the last
    /// good diagnosis.
    RediagnosisFailed { error: String },
    Cancelled,
}

impl StopReason {
    /// Whether the loop ended because the document reached an acceptable state.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::AllIssuesResolved | Self::NoCriticalOrWarning)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxIterations { max } => write!(f, "max iterations reached ({max})"),
            Self::AllIssuesResolved => f.write_str("all issues resolved"),
            Self::NoCriticalOrWarning => f.write_str("no critical or warning issues remain"),
            Self::AllFixesFailed => f.write_str("all fixes failed, no progress possible"),
            Self::NoApplicableFixes => f.write_str("no applicable fixes found"),
            Self::Stalled { before, after } => {
                write!(f, "issues did not decrease (C+W: {before} → {after})")
            }
            Self::RediagnosisFailed { error } => write!(f, "re-diagnosis failed: {error}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Decide whether the loop should stop after the latest iteration.
///
/// Rules, first match wins:
/// 1. iteration budget exhausted
/// 2. nothing left to fix (no issues, or none critical/warning)
/// 3. every planned fix failed, unless a fallback tier can still be tried
/// 4. nothing was planned at all
/// 5. critical+warning did not decrease and the total did not decrease
///    versus the previous iteration, unless a fallback tier can still be tried
///
/// Returns `None` to continue. An empty history always continues.
pub fn should_stop(
    history: &[ConvergenceState],
    max_iterations: u32,
    fallback_available: bool,
) -> Option<StopReason> {
    let current = history.last()?;

    if current.iteration >= max_iterations {
        return Some(StopReason::MaxIterations {
            max: max_iterations,
        });
    }

    if current.issues_after == 0 {
        return Some(StopReason::AllIssuesResolved);
    }
    if current.important_after() == 0 {
        return Some(StopReason::NoCriticalOrWarning);
    }

    if current.fixes_applied == 0 && current.fixes_failed > 0 {
        if fallback_available {
            return None;
        }
        return Some(StopReason::AllFixesFailed);
    }

    if current.fixes_applied == 0 && current.fixes_failed == 0 {
        return Some(StopReason::NoApplicableFixes);
    }

    if let [.., previous, _] = history {
        let before = previous.important_after();
        let after = current.important_after();
        let important_stalled = after >= before;
        let total_stalled = current.issues_after >= previous.issues_after;

        if important_stalled && total_stalled && !fallback_available {
            return Some(StopReason::Stalled { before, after });
        }
    }

    None
}
