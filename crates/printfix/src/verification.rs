//! Deterministic confidence scoring for a finished fix run.
//!
//! The score combines how many issues were resolved, how the loop ended and
//! what severity is left. It is advisory: the terminal job status still
//! follows `converged`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnosis::DiagnosisSummary;
use crate::orchestrator::OrchestrationResult;

/// Artifact name for the persisted [`Verification`].
pub const VERIFICATION: &str = "verification.json";

/// Score at or above which a run would be auto-approved.
pub const AUTO_APPROVE_THRESHOLD: f64 = 85.0;

const CRITICAL_PENALTY: f64 = 15.0;
const WARNING_PENALTY: f64 = 5.0;
const MAX_SEVERITY_PENALTY: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    PrintReady,
    LikelyFine,
    NeedsReview,
    ManualIntervention,
}

impl ConfidenceBand {
    pub fn for_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::PrintReady
        } else if score >= 70.0 {
            Self::LikelyFine
        } else if score >= 50.0 {
            Self::NeedsReview
        } else {
            Self::ManualIntervention
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrintReady => "print_ready",
            Self::LikelyFine => "likely_fine",
            Self::NeedsReview => "needs_review",
            Self::ManualIntervention => "manual_intervention",
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score components, each rounded to one decimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub job_id: String,
    /// 50..=100 from the share of initial issues resolved.
    pub base_score: f64,
    /// +10 converged, -10 nothing applied, -5 no decrease.
    pub convergence_bonus: f64,
    /// Remaining critical and warning issues, capped at -50.
    pub severity_penalty: f64,
    pub final_score: f64,
    pub band: ConfidenceBand,
    pub auto_approved: bool,
}

impl Verification {
    /// Score `result` against the initial and latest diagnosis summaries.
    ///
    /// Without both summaries the score is a neutral 50.
    pub fn score(
        result: &OrchestrationResult,
        initial: Option<&DiagnosisSummary>,
        latest: Option<&DiagnosisSummary>,
    ) -> Self {
        let (Some(initial), Some(latest)) = (initial, latest) else {
            return Self::assemble(&result.job_id, 50.0, 0.0, 0.0);
        };

        let base_score = if initial.total_issues == 0 || latest.total_issues == 0 {
            100.0
        } else {
            let resolved = initial.total_issues.saturating_sub(latest.total_issues);
            50.0 + f64::from(resolved) / f64::from(initial.total_issues) * 50.0
        };

        let convergence_bonus = if result.converged {
            10.0
        } else if result.total_fixes_applied == 0 {
            -10.0
        } else if result.final_issues >= result.initial_issues {
            -5.0
        } else {
            0.0
        };

        let severity_penalty = -(f64::from(latest.critical_count) * CRITICAL_PENALTY
            + f64::from(latest.warning_count) * WARNING_PENALTY)
            .min(MAX_SEVERITY_PENALTY);

        Self::assemble(&result.job_id, base_score, convergence_bonus, severity_penalty)
    }

    fn assemble(job_id: &str, base: f64, bonus: f64, penalty: f64) -> Self {
        let final_score = round1((base + bonus + penalty).clamp(0.0, 100.0));
        Self {
            job_id: job_id.to_string(),
            base_score: round1(base),
            convergence_bonus: round1(bonus),
            severity_penalty: round1(penalty),
            final_score,
            band: ConfidenceBand::for_score(final_score),
            auto_approved: final_score >= AUTO_APPROVE_THRESHOLD,
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
