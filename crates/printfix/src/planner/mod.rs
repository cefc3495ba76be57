//! Fix planning.
//!
//! Picks a strategy per iteration: model-assisted when the effort preset
//! asks for it (or aggressiveness is `smart_auto`) and a model is
//! configured, rule tables otherwise. A model failure after retries drops
//! to the rule tables for that iteration.

pub mod model;
pub mod rules;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use coordination::{with_retry, Aggressiveness, ConvergenceState, PageSize, RetryPolicy};
use tracing::{info, warn};

use crate::config::EffortConfig;
use crate::diagnosis::{Diagnosis, IssueType};
use crate::fixes::FixPlan;
use crate::format::DocumentFormat;

pub use model::{parse_model_plan, PlanningError, PlanningModel, PlanningRequest, ToolDescriptor};
pub use rules::{RuleInput, SeverityFilter, STRUCTURAL_TOOLS};

/// Inputs for one planning pass.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub job_id: &'a str,
    pub iteration: u32,
    pub diagnosis: &'a Diagnosis,
    pub aggressiveness: Aggressiveness,
    /// Job file type as stored (`.docx`, `pdf`).
    pub file_type: &'a str,
    pub target_page_size: Option<PageSize>,
    pub history: &'a [ConvergenceState],
    pub failed_issue_types: &'a BTreeSet<IssueType>,
    pub effort: &'a EffortConfig,
}

/// How a plan was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStrategy {
    Model,
    Rules,
    /// Model planning was selected but failed.
    RulesAfterModelFailure,
}

#[derive(Clone)]
pub struct Planner {
    model: Option<Arc<dyn PlanningModel>>,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl Planner {
    /// Rule tables only.
    pub fn rules_only() -> Self {
        Self {
            model: None,
            call_timeout: Duration::from_secs(60),
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_model(
        model: Arc<dyn PlanningModel>,
        call_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model: Some(model),
            call_timeout,
            retry,
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub async fn plan(&self, ctx: &PlanContext<'_>) -> FixPlan {
        self.plan_with_strategy(ctx).await.0
    }

    pub async fn plan_with_strategy(&self, ctx: &PlanContext<'_>) -> (FixPlan, PlanStrategy) {
        let wants_model = ctx.effort.use_ai_planning
            || ctx.aggressiveness == Aggressiveness::SmartAuto;

        let model = match (&self.model, wants_model) {
            (Some(model), true) => model.clone(),
            _ => return (self.plan_rules(ctx), PlanStrategy::Rules),
        };

        match self.plan_model(model.as_ref(), ctx).await {
            Ok(plan) => {
                info!(
                    job_id = ctx.job_id,
                    iteration = ctx.iteration,
                    actions = plan.actions.len(),
                    "Model plan accepted"
                );
                (plan, PlanStrategy::Model)
            }
            Err(e) => {
                warn!(
                    job_id = ctx.job_id,
                    iteration = ctx.iteration,
                    error = %e,
                    "Model planning failed, using rule tables"
                );
                (self.plan_rules(ctx), PlanStrategy::RulesAfterModelFailure)
            }
        }
    }

    /// Rule-table plan for `ctx`.
    pub fn plan_rules(&self, ctx: &PlanContext<'_>) -> FixPlan {
        let input = RuleInput {
            job_id: ctx.job_id,
            iteration: ctx.iteration,
            diagnosis: ctx.diagnosis,
            format: DocumentFormat::from_file_type(ctx.file_type),
            target_page_size: ctx.target_page_size,
            failed_issue_types: ctx.failed_issue_types,
        };
        rules::plan(&input, SeverityFilter::for_rules(ctx.aggressiveness))
    }

    async fn plan_model(
        &self,
        model: &dyn PlanningModel,
        ctx: &PlanContext<'_>,
    ) -> Result<FixPlan, PlanningError> {
        let request = PlanningRequest {
            job_id: ctx.job_id.to_string(),
            iteration: ctx.iteration,
            file_type: ctx.file_type.to_string(),
            editable: DocumentFormat::from_file_type(ctx.file_type)
                .is_some_and(DocumentFormat::is_editable),
            target_page_size: ctx
                .target_page_size
                .map_or("original", PageSize::as_str)
                .to_string(),
            aggressiveness: ctx.aggressiveness,
            diagnosis: ctx.diagnosis.clone(),
            history: ctx.history.to_vec(),
            failed_issue_types: ctx.failed_issue_types.clone(),
            tools: ToolDescriptor::catalog(),
            model: ctx.effort.planning_model.clone(),
        };

        let timeout = self.call_timeout;
        let request = &request;
        let raw = with_retry(
            &self.retry,
            "fix planning",
            PlanningError::is_transient,
            move || async move {
                tokio::time::timeout(timeout, model.complete(request))
                    .await
                    .map_err(|_| PlanningError::Timeout(timeout.as_secs()))?
            },
        )
        .await?;

        parse_model_plan(&raw, ctx.job_id, ctx.iteration)
    }
}
