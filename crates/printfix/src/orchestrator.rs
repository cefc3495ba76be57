//! The diagnose → plan → execute → re-diagnose loop.
//!
//! One loop per job, iterations strictly sequential. The loop owns the
//! convergence history and the cumulative set of issue types whose
//! source-format fixes failed; both feed the stop decision, and the latter
//! routes later iterations to the PDF fallback tier.

use std::collections::BTreeSet;
use std::sync::Arc;

use coordination::state::schema::fields;
use coordination::{
    should_stop, with_retry, ConvergenceState, FieldMap, JobStore, RetryPolicy, StopReason,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifacts::{self, ArtifactStore};
use crate::config::{EffortConfig, EffortPresets};
use crate::diagnosis::{Diagnosis, IssueType};
use crate::errors::FixLoopError;
use crate::executor::FixExecutor;
use crate::format::DocumentFormat;
use crate::planner::{rules, PlanContext, Planner};
use crate::services::DiagnosisProvider;

/// Final report of one fix-loop run. Persisted as `orchestration.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub job_id: String,
    pub iterations: u32,
    pub total_fixes_applied: u32,
    pub total_fixes_failed: u32,
    pub initial_issues: u32,
    pub final_issues: u32,
    pub initial_critical: u32,
    pub final_critical: u32,
    /// No critical and no warning issues remain.
    pub converged: bool,
    pub used_fallback: bool,
    pub stop_reason: String,
    pub stop: StopReason,
    pub history: Vec<ConvergenceState>,
}

#[derive(Clone)]
pub struct Orchestrator {
    jobs: JobStore,
    artifacts: Arc<dyn ArtifactStore>,
    diagnoser: Arc<dyn DiagnosisProvider>,
    planner: Planner,
    executor: FixExecutor,
    effort: EffortPresets,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        jobs: JobStore,
        artifacts: Arc<dyn ArtifactStore>,
        diagnoser: Arc<dyn DiagnosisProvider>,
        planner: Planner,
        executor: FixExecutor,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            diagnoser,
            planner,
            executor,
            effort: EffortPresets::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_effort_presets(mut self, effort: EffortPresets) -> Self {
        self.effort = effort;
        self
    }

    /// Retry policy for re-diagnosis calls.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn artifacts(&self) -> &dyn ArtifactStore {
        self.artifacts.as_ref()
    }

    pub async fn run(&self, job_id: &str) -> Result<OrchestrationResult, FixLoopError> {
        self.run_with_cancel(job_id, &CancellationToken::new()).await
    }

    /// Run the loop, checking `cancel` before each iteration. An action
    /// already running is never interrupted.
    pub async fn run_with_cancel(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationResult, FixLoopError> {
        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| FixLoopError::JobNotFound(job_id.to_string()))?;

        let effort = self.effort.get(job.effort).clone();
        let max_iterations = effort.max_fix_iterations;
        let file_type = job.file_type.clone().unwrap_or_else(|| ".pdf".to_string());
        let editable =
            DocumentFormat::from_file_type(&file_type).is_some_and(DocumentFormat::is_editable);

        let mut diagnosis: Diagnosis =
            artifacts::load(self.artifacts.as_ref(), job_id, artifacts::DIAGNOSIS)
                .await?
                .ok_or_else(|| FixLoopError::DiagnosisMissing(job_id.to_string()))?;
        let initial = diagnosis.summary().clone();
        self.snapshot_initial(job_id, &diagnosis).await?;

        info!(
            job_id,
            issues = initial.total_issues,
            critical = initial.critical_count,
            effort = %job.effort,
            aggressiveness = %job.aggressiveness,
            max_iterations,
            "Starting fix loop"
        );

        let mut history: Vec<ConvergenceState> = Vec::new();
        let mut failed_issue_types: BTreeSet<IssueType> = BTreeSet::new();
        let mut total_applied = 0;
        let mut total_failed = 0;
        let mut any_fallback = false;
        let mut stop = None;

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                info!(job_id, iteration, "Fix loop cancelled");
                stop = Some(StopReason::Cancelled);
                break;
            }

            let before = diagnosis.summary().clone();
            let plan = self
                .planner
                .plan(&PlanContext {
                    job_id,
                    iteration,
                    diagnosis: &diagnosis,
                    aggressiveness: job.aggressiveness,
                    file_type: &file_type,
                    target_page_size: job.target_page_size,
                    history: &history,
                    failed_issue_types: &failed_issue_types,
                    effort: &effort,
                })
                .await;

            let mut state = ConvergenceState {
                iteration,
                issues_before: before.total_issues,
                issues_after: before.total_issues,
                critical_before: before.critical_count,
                critical_after: before.critical_count,
                warning_before: before.warning_count,
                warning_after: before.warning_count,
                ..Default::default()
            };

            if plan.actions.is_empty() {
                info!(job_id, iteration, skipped = plan.skipped_issues.len(), "No applicable fixes");
                history.push(state);
                stop = Some(StopReason::NoApplicableFixes);
                break;
            }

            info!(
                job_id,
                iteration,
                planned = plan.actions.len(),
                skipped = plan.skipped_issues.len(),
                fallback = plan.has_fallback_actions(),
                "Plan ready"
            );

            let outcome = self.executor.apply(job_id, &plan).await?;
            total_applied += outcome.applied;
            total_failed += outcome.failed;
            any_fallback |= outcome.used_fallback;
            failed_issue_types.extend(outcome.failed_issue_types.iter().copied());

            state.fixes_applied = outcome.applied;
            state.fixes_failed = outcome.failed;
            state.used_fallback = outcome.used_fallback;

            match self.rediagnose(job_id, &effort).await {
                Ok(fresh) => diagnosis = fresh,
                Err(e) => {
                    // Counts stay at their pre-iteration values: nothing was measured.
                    warn!(job_id, iteration, error = %e, "Re-diagnosis failed, keeping last diagnosis");
                    history.push(state);
                    stop = Some(StopReason::RediagnosisFailed {
                        error: e.to_string(),
                    });
                    break;
                }
            }

            let after = diagnosis.summary();
            state.issues_after = after.total_issues;
            state.critical_after = after.critical_count;
            state.warning_after = after.warning_count;
            info!(
                job_id,
                iteration,
                applied = outcome.applied,
                failed = outcome.failed,
                issues = after.total_issues,
                critical = after.critical_count,
                warning = after.warning_count,
                "Iteration complete"
            );
            history.push(state);

            let fallback_available =
                has_untried_fallback(editable, &failed_issue_types, &history);
            if fallback_available {
                debug!(job_id, failed = ?failed_issue_types, "PDF fallback available");
            }
            if let Some(reason) = should_stop(&history, max_iterations, fallback_available) {
                stop = Some(reason);
                break;
            }
        }

        let stop = stop.unwrap_or(StopReason::MaxIterations {
            max: max_iterations,
        });
        let summary = diagnosis.summary();
        let result = OrchestrationResult {
            job_id: job_id.to_string(),
            iterations: history.len() as u32,
            total_fixes_applied: total_applied,
            total_fixes_failed: total_failed,
            initial_issues: initial.total_issues,
            final_issues: summary.total_issues,
            initial_critical: initial.critical_count,
            final_critical: summary.critical_count,
            converged: summary.critical_count == 0 && summary.warning_count == 0,
            used_fallback: any_fallback,
            stop_reason: stop.to_string(),
            stop,
            history,
        };

        self.persist(job_id, &diagnosis, &result).await?;

        info!(
            job_id,
            iterations = result.iterations,
            applied = result.total_fixes_applied,
            initial_issues = result.initial_issues,
            final_issues = result.final_issues,
            converged = result.converged,
            used_fallback = result.used_fallback,
            stop_reason = %result.stop_reason,
            "Fix loop complete"
        );
        Ok(result)
    }

    async fn rediagnose(
        &self,
        job_id: &str,
        effort: &EffortConfig,
    ) -> Result<Diagnosis, FixLoopError> {
        // Fresh record: fixes may have moved pdf_path or the page count.
        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| FixLoopError::JobNotFound(job_id.to_string()))?;
        with_retry(&self.retry, "re-diagnosis", FixLoopError::is_retriable, || {
            self.diagnoser.diagnose(&job, effort)
        })
        .await
    }

    /// Keep the pre-fix diagnosis. Written once; later runs leave it alone.
    async fn snapshot_initial(&self, job_id: &str, diagnosis: &Diagnosis) -> Result<(), FixLoopError> {
        if self
            .artifacts
            .exists(job_id, artifacts::DIAGNOSIS_INITIAL)
            .await?
        {
            return Ok(());
        }
        artifacts::save(self.artifacts.as_ref(), job_id, artifacts::DIAGNOSIS_INITIAL, diagnosis)
            .await?;
        debug!(job_id, "Saved initial diagnosis snapshot");
        Ok(())
    }

    async fn persist(
        &self,
        job_id: &str,
        diagnosis: &Diagnosis,
        result: &OrchestrationResult,
    ) -> Result<(), FixLoopError> {
        let store = self.artifacts.as_ref();
        artifacts::save(store, job_id, artifacts::DIAGNOSIS, diagnosis).await?;
        artifacts::save(store, job_id, artifacts::ORCHESTRATION, result).await?;

        let summary = diagnosis.summary();
        let mut update = FieldMap::new();
        update.insert(fields::ISSUES_FOUND.into(), summary.total_issues.to_string());
        update.insert(
            fields::PRINT_READINESS.into(),
            summary.print_readiness.as_str().to_string(),
        );
        self.jobs.update_fields(job_id, update).await?;
        Ok(())
    }
}

/// An editable document has failed issue types with a PDF fallback mapping
/// and no iteration has used the fallback tier yet.
pub fn has_untried_fallback(
    editable: bool,
    failed_issue_types: &BTreeSet<IssueType>,
    history: &[ConvergenceState],
) -> bool {
    editable
        && !history.iter().any(|s| s.used_fallback)
        && failed_issue_types
            .iter()
            .any(|t| rules::fallback_actions(*t).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_untried_only_once() {
        let failed = BTreeSet::from([IssueType::MarginViolation]);
        assert!(has_untried_fallback(true, &failed, &[]));
        assert!(!has_untried_fallback(false, &failed, &[]));

        let used = [ConvergenceState {
            iteration: 1,
            used_fallback: true,
            ..Default::default()
        }];
        assert!(!has_untried_fallback(true, &failed, &used));
    }

    #[test]
    fn fallback_needs_a_mapped_failed_type() {
        let failed = BTreeSet::from([IssueType::SmallFont, IssueType::BlankPage]);
        assert!(!has_untried_fallback(true, &failed, &[]));
        assert!(!has_untried_fallback(true, &BTreeSet::new(), &[]));
    }
}
