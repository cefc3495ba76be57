//! Background-task entry point for a fix run.

use coordination::{FieldMap, JobStatus};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::artifacts::{self, DIAGNOSIS, DIAGNOSIS_INITIAL};
use crate::diagnosis::Diagnosis;
use crate::errors::FixLoopError;
use crate::orchestrator::{OrchestrationResult, Orchestrator};
use crate::verification::{Verification, VERIFICATION};

/// Drive one job through `fixing → verifying → done | needs_review`.
///
/// A fatal orchestration error moves the job to `failed` with the error
/// message and is returned to the caller.
pub async fn run_fix_job(
    orchestrator: &Orchestrator,
    job_id: &str,
    cancel: &CancellationToken,
) -> Result<OrchestrationResult, FixLoopError> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("fix_job", job_id, run_id = %run_id);
    run(orchestrator, job_id, cancel).instrument(span).await
}

async fn run(
    orchestrator: &Orchestrator,
    job_id: &str,
    cancel: &CancellationToken,
) -> Result<OrchestrationResult, FixLoopError> {
    let jobs = orchestrator.jobs();
    jobs.set_state(job_id, JobStatus::Fixing, None, FieldMap::new())
        .await?;

    let result = match orchestrator.run_with_cancel(job_id, cancel).await {
        Ok(result) => result,
        Err(e) => {
            error!(job_id, error = %e, category = %e.retry_category(), "Fix run failed");
            let message = e.to_string();
            if let Err(state_err) = jobs
                .set_state(job_id, JobStatus::Failed, Some(&message), FieldMap::new())
                .await
            {
                error!(job_id, error = %state_err, "Could not mark job failed");
            }
            return Err(e);
        }
    };

    jobs.set_state(job_id, JobStatus::Verifying, None, FieldMap::new())
        .await?;
    verify(orchestrator, &result).await;
    let terminal = if result.converged {
        JobStatus::Done
    } else {
        JobStatus::NeedsReview
    };
    jobs.set_state(job_id, terminal, None, FieldMap::new())
        .await?;

    info!(
        job_id,
        status = %terminal,
        stop_reason = %result.stop_reason,
        "Fix run finished"
    );
    Ok(result)
}

/// Score the run and persist `verification.json`. Advisory only, so a
/// failure here is logged and the run still finishes.
async fn verify(orchestrator: &Orchestrator, result: &OrchestrationResult) {
    let store = orchestrator.artifacts();
    let job_id = result.job_id.as_str();

    let initial = artifacts::load::<Diagnosis>(store, job_id, DIAGNOSIS_INITIAL).await;
    let latest = artifacts::load::<Diagnosis>(store, job_id, DIAGNOSIS).await;
    let (initial, latest) = match (initial, latest) {
        (Ok(initial), Ok(latest)) => (initial, latest),
        (Err(e), _) | (_, Err(e)) => {
            warn!(job_id, error = %e, "Could not load diagnoses for verification");
            (None, None)
        }
    };

    let verification = Verification::score(
        result,
        initial.as_ref().map(Diagnosis::summary),
        latest.as_ref().map(Diagnosis::summary),
    );
    info!(
        job_id,
        confidence = verification.final_score,
        band = %verification.band,
        auto_approved = verification.auto_approved,
        "Verification scored"
    );

    if let Err(e) = artifacts::save(store, job_id, VERIFICATION, &verification).await {
        warn!(job_id, error = %e, "Failed to persist verification");
    }
}
