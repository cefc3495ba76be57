//! Model-assisted planning: request shape, model seam and response parsing.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use coordination::{Aggressiveness, ConvergenceState};

use crate::diagnosis::{Diagnosis, IssueType};
use crate::fixes::{FixAction, FixPlan, ToolParams};
use crate::tools::{catalog, ToolLevel};

/// Errors from a planning-model call or its response.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("planning model timed out after {0}s")]
    Timeout(u64),

    #[error("planning model transport error: {0}")]
    Transport(String),

    #[error("planning model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed plan: {0}")]
    Malformed(String),

    #[error("no planning model configured")]
    NotConfigured,
}

impl PlanningError {
    /// Worth another attempt: timeouts, transport hiccups, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) | Self::NotConfigured => false,
        }
    }
}

/// A catalog tool as described to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub level: ToolLevel,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

impl ToolDescriptor {
    pub fn catalog() -> Vec<Self> {
        catalog::CATALOG
            .iter()
            .map(|spec| Self {
                name: spec.name,
                level: spec.level,
                description: spec.description,
                parameters: spec.parameters_schema(),
            })
            .collect()
    }
}

/// Everything the planning model sees for one iteration.
#[derive(Debug, Clone, Serialize)]
pub struct PlanningRequest {
    pub job_id: String,
    pub iteration: u32,
    pub file_type: String,
    /// Source format has its own editing tools, so PDF tools are a fallback.
    pub editable: bool,
    pub target_page_size: String,
    pub aggressiveness: Aggressiveness,
    pub diagnosis: Diagnosis,
    pub history: Vec<ConvergenceState>,
    /// Issue types whose source-format fixes failed earlier; the model should
    /// address them with PDF tools marked `is_fallback`.
    pub failed_issue_types: BTreeSet<IssueType>,
    pub tools: Vec<ToolDescriptor>,
    /// Model override from the effort preset.
    #[serde(skip)]
    pub model: Option<String>,
}

impl PlanningRequest {
    /// Instruction text sent alongside the serialized request.
    pub fn instructions(&self) -> String {
        let mut text = String::from(
            "You plan print-readiness fixes. Using only the listed tools, return JSON \
             {\"actions\": [{\"tool_name\", \"params\", \"target_issues\", \"reasoning\", \
             \"is_fallback\"}], \"skipped_issues\": [{\"type\", \"reason\"}]}.",
        );
        if self.editable && !self.failed_issue_types.is_empty() {
            let failed: Vec<&str> = self.failed_issue_types.iter().map(|t| t.as_str()).collect();
            text.push_str(&format!(
                " These issue types failed to resolve with {} tools in previous iterations: {}. \
                 Use PDF tools for them and mark those actions with is_fallback=true.",
                self.file_type.trim_start_matches('.').to_uppercase(),
                failed.join(", ")
            ));
        }
        text
    }
}

/// A chat model that turns a [`PlanningRequest`] into raw plan JSON.
#[async_trait]
pub trait PlanningModel: Send + Sync {
    async fn complete(&self, request: &PlanningRequest) -> Result<String, PlanningError>;
}

#[derive(Deserialize)]
struct ModelPlan {
    #[serde(default)]
    actions: Vec<ModelAction>,
    #[serde(default)]
    skipped_issues: Vec<ModelSkip>,
}

#[derive(Deserialize)]
struct ModelAction {
    tool_name: String,
    #[serde(default)]
    params: ToolParams,
    #[serde(default)]
    target_issues: Vec<String>,
    #[serde(default, alias = "rationale")]
    reasoning: String,
    #[serde(default)]
    is_fallback: Option<bool>,
}

#[derive(Deserialize)]
struct ModelSkip {
    #[serde(rename = "type", default = "unknown_type")]
    issue_type: String,
    #[serde(default)]
    reason: String,
}

fn unknown_type() -> String {
    "unknown".into()
}

/// Parse a model response into a plan.
///
/// Accepts a bare JSON object or one wrapped in a Markdown code fence.
/// `is_fallback` defaults to true for PDF-level tools. Unknown issue type
/// names in `target_issues` are dropped.
pub fn parse_model_plan(raw: &str, job_id: &str, iteration: u32) -> Result<FixPlan, PlanningError> {
    let body = strip_code_fence(raw);
    let plan: ModelPlan =
        serde_json::from_str(body).map_err(|e| PlanningError::Malformed(e.to_string()))?;

    let actions = plan
        .actions
        .into_iter()
        .map(|a| {
            let is_pdf_tool = catalog::spec(&a.tool_name)
                .is_some_and(|spec| spec.level == ToolLevel::Pdf);
            FixAction {
                is_fallback: a.is_fallback.unwrap_or(is_pdf_tool),
                target_issues: a
                    .target_issues
                    .iter()
                    .filter_map(|t| t.parse::<IssueType>().ok())
                    .collect(),
                tool_name: a.tool_name,
                params: a.params,
                rationale: a.reasoning,
            }
        })
        .collect();

    let skipped_issues = plan
        .skipped_issues
        .into_iter()
        .map(|s| format!("{}: {}", s.issue_type, s.reason))
        .collect();

    Ok(FixPlan {
        job_id: job_id.to_string(),
        iteration,
        actions,
        skipped_issues,
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) up to the first newline.
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
