//! Transactional fix application.
//!
//! Each action runs on its own: resolve the document, back it up, run the
//! tool under a timeout, validate the result, re-render, record. Any failure
//! along the way becomes a failed [`FixResult`] and, when a backup exists,
//! the document is restored byte-for-byte before the next action runs.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use coordination::state::schema::fields;
use coordination::{FieldMap, JobRecord, JobStore};
use tracing::{info, warn};

use crate::artifacts::{self, ArtifactStore};
use crate::diagnosis::IssueType;
use crate::errors::FixLoopError;
use crate::fixes::{FixAction, FixPlan, FixResult};
use crate::format::DocumentFormat;
use crate::integrity;
use crate::services::{IntegrityValidator, Renderer};
use crate::tools::{ToolError, ToolLevel, ToolRegistry};

/// Aggregate of one plan execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub applied: u32,
    pub failed: u32,
    /// Targets of failed non-fallback actions.
    pub failed_issue_types: BTreeSet<IssueType>,
    /// At least one fallback action ran.
    pub used_fallback: bool,
    pub results: Vec<FixResult>,
}

#[derive(Clone)]
pub struct FixExecutor {
    registry: Arc<ToolRegistry>,
    jobs: JobStore,
    artifacts: Arc<dyn ArtifactStore>,
    renderer: Arc<dyn Renderer>,
    validator: Arc<dyn IntegrityValidator>,
    fix_timeout: Duration,
    validate_after_fix: bool,
}

impl FixExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        jobs: JobStore,
        artifacts: Arc<dyn ArtifactStore>,
        renderer: Arc<dyn Renderer>,
        validator: Arc<dyn IntegrityValidator>,
    ) -> Self {
        Self {
            registry,
            jobs,
            artifacts,
            renderer,
            validator,
            fix_timeout: Duration::from_secs(120),
            validate_after_fix: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.fix_timeout = timeout;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_after_fix = enabled;
        self
    }

    /// Run every action of `plan` in order.
    ///
    /// Only store and artifact errors abort; tool-level problems are
    /// recorded as failed results.
    pub async fn apply(
        &self,
        job_id: &str,
        plan: &FixPlan,
    ) -> Result<ExecutionOutcome, FixLoopError> {
        let mut outcome = ExecutionOutcome::default();

        for action in &plan.actions {
            let result = self.execute(job_id, action).await?;

            outcome.used_fallback |= action.is_fallback;
            if result.success {
                outcome.applied += 1;
            } else {
                outcome.failed += 1;
                if !action.is_fallback {
                    outcome
                        .failed_issue_types
                        .extend(action.target_issues.iter().copied());
                }
            }
            outcome.results.push(result);
        }

        Ok(outcome)
    }

    /// Run one action and record its result.
    pub async fn execute(
        &self,
        job_id: &str,
        action: &FixAction,
    ) -> Result<FixResult, FixLoopError> {
        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| FixLoopError::JobNotFound(job_id.to_string()))?;

        let result = self.run_action(&job, action).await;

        if result.success {
            info!(job_id, tool = %result.tool_name, description = %result.description, "Fix applied");
        } else {
            warn!(
                job_id,
                tool = %result.tool_name,
                description = %result.description,
                error = result.error.as_deref().unwrap_or(""),
                "Fix failed"
            );
        }

        self.record(job_id, result.clone()).await?;
        Ok(result)
    }

    async fn run_action(&self, job: &JobRecord, action: &FixAction) -> FixResult {
        let tool_name = action.tool_name.as_str();
        let job_id = job.id.as_str();

        let Some(tool) = self.registry.get(tool_name) else {
            return FixResult::failed(
                tool_name,
                job_id,
                format!("Unknown tool: {tool_name}"),
                ToolError::UnknownTool(tool_name.to_string()).to_string(),
            );
        };

        let path = match resolve_document(job, tool.level()) {
            Ok(path) => path,
            Err(e) => {
                return FixResult::failed(
                    tool_name,
                    job_id,
                    format!("Could not resolve document for {tool_name}"),
                    e,
                )
            }
        };

        if let Err(e) = tool.validate(&action.params) {
            return FixResult::failed(
                tool_name,
                job_id,
                format!("Invalid parameters for {tool_name}"),
                e.to_string(),
            );
        }

        let backup = if self.validate_after_fix {
            match integrity::create_backup(&path).await {
                Ok(backup) => Some(backup),
                Err(e) => {
                    return FixResult::failed(
                        tool_name,
                        job_id,
                        format!("Could not back up {}", path.display()),
                        e.to_string(),
                    )
                }
            }
        } else {
            None
        };

        let mut result = match tokio::time::timeout(
            self.fix_timeout,
            tool.apply(&path, job_id, &action.params),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => FixResult::failed(
                tool_name,
                job_id,
                format!("Exception during {tool_name}: {e}"),
                e.to_string(),
            ),
            Err(_) => {
                let err = ToolError::Timeout {
                    tool: tool_name.to_string(),
                    seconds: self.fix_timeout.as_secs(),
                };
                FixResult::failed(tool_name, job_id, err.to_string(), err.to_string())
            }
        };

        if result.success && self.validate_after_fix {
            let report = self
                .validator
                .validate(&path, DocumentFormat::from_path(&path))
                .await;
            if !report.is_valid() {
                let err = FixLoopError::Integrity {
                    path: report.path.display().to_string(),
                    details: report.details,
                };
                warn!(
                    job_id,
                    tool = tool_name,
                    category = %err.retry_category(),
                    error = %err,
                    "Fix produced a corrupt document"
                );
                result = FixResult::failed(
                    tool_name,
                    job_id,
                    "corrupted output, restored from backup",
                    err.to_string(),
                );
            }
        }

        if result.success {
            match self.renderer.render(job, &path).await {
                Ok(metadata) => {
                    let update = metadata.to_fields();
                    if !update.is_empty() {
                        if let Err(e) = self.jobs.update_fields(job_id, update).await {
                            warn!(job_id, error = %e, "Failed to merge render metadata");
                        }
                    }
                }
                Err(e) => {
                    result = FixResult::failed(
                        tool_name,
                        job_id,
                        format!("Re-render after {tool_name} failed"),
                        e.to_string(),
                    );
                }
            }
        }

        if let Some(backup) = backup {
            if result.success {
                if let Err(e) = integrity::cleanup_backup(&backup).await {
                    warn!(job_id, backup = %backup.display(), error = %e, "Backup cleanup failed");
                }
            } else if let Err(e) = integrity::restore_from_backup(&path, &backup).await {
                warn!(job_id, path = %path.display(), error = %e, "Restore from backup failed");
            } else {
                warn!(job_id, tool = tool_name, path = %path.display(), "Rolled back failed fix");
            }
        }

        result
    }

    /// Append to the fix log and refresh the job's fix counters.
    async fn record(&self, job_id: &str, result: FixResult) -> Result<(), FixLoopError> {
        let log = artifacts::append_fix(self.artifacts.as_ref(), job_id, result).await?;
        let totals = log.totals();

        let mut update = FieldMap::new();
        update.insert(fields::ISSUES_FIXED.into(), totals.applied.to_string());
        update.insert(fields::ISSUES_SKIPPED.into(), totals.failed.to_string());
        self.jobs.update_fields(job_id, update).await?;
        Ok(())
    }
}

/// Pick the file a tool edits: the editable source for source-level tools
/// on editable uploads, the reference PDF otherwise.
pub fn resolve_document(job: &JobRecord, level: ToolLevel) -> Result<PathBuf, String> {
    let editable = job
        .file_type
        .as_deref()
        .and_then(DocumentFormat::from_file_type)
        .is_some_and(DocumentFormat::is_editable);

    let chosen = match level {
        ToolLevel::Source if editable => job.source_path.as_deref(),
        _ => job.pdf_path.as_deref(),
    };

    let path = chosen.ok_or_else(|| match level {
        ToolLevel::Source if editable => format!("No source document for job {}", job.id),
        _ => format!("No PDF found for job {}", job.id),
    })?;
    Ok(Path::new(path).to_path_buf())
}
