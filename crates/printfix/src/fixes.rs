//! Fix actions, plans, results and the per-job fix log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diagnosis::IssueType;

/// Open parameter map; validated per tool at dispatch time.
pub type ToolParams = BTreeMap<String, serde_json::Value>;

/// One operation the executor should run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAction {
    pub tool_name: String,
    #[serde(default)]
    pub params: ToolParams,
    /// Issue types this action is meant to resolve.
    #[serde(default)]
    pub target_issues: Vec<IssueType>,
    #[serde(default, alias = "reasoning")]
    pub rationale: String,
    /// Alternate-path action (PDF-level tool used after the source-format
    /// tool failed).
    #[serde(default)]
    pub is_fallback: bool,
}

impl FixAction {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            params: ToolParams::new(),
            target_issues: Vec::new(),
            rationale: String::new(),
            is_fallback: false,
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn targeting(mut self, issue: IssueType) -> Self {
        self.target_issues.push(issue);
        self
    }

    pub fn because(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn fallback(mut self) -> Self {
        self.is_fallback = true;
        self
    }

    /// Identity used for plan deduplication: tool name plus params with
    /// keys in sorted order.
    pub fn dedup_key(&self) -> String {
        // BTreeMap serializes in key order, so equal maps give equal strings.
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        format!("{}:{}", self.tool_name, params)
    }
}

/// Ordered actions for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixPlan {
    pub job_id: String,
    pub iteration: u32,
    pub actions: Vec<FixAction>,
    /// Human-readable notes for issues the plan does not address.
    pub skipped_issues: Vec<String>,
}

impl FixPlan {
    pub fn has_fallback_actions(&self) -> bool {
        self.actions.iter().any(|a| a.is_fallback)
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixResult {
    pub tool_name: String,
    pub job_id: String,
    pub success: bool,
    pub description: String,
    #[serde(default)]
    pub pages_affected: Vec<u32>,
    #[serde(default)]
    pub before_value: Option<String>,
    #[serde(default)]
    pub after_value: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FixResult {
    pub fn succeeded(
        tool_name: impl Into<String>,
        job_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            job_id: job_id.into(),
            success: true,
            description: description.into(),
            pages_affected: Vec::new(),
            before_value: None,
            after_value: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        tool_name: impl Into<String>,
        job_id: impl Into<String>,
        description: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::succeeded(tool_name, job_id, description)
        }
    }

    pub fn with_pages(mut self, pages: Vec<u32>) -> Self {
        self.pages_affected = pages;
        self
    }

    pub fn with_values(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.before_value = Some(before.into());
        self.after_value = Some(after.into());
        self
    }
}

/// Append-only record of every fix attempted on a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixLog {
    entries: Vec<FixResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixLogTotals {
    pub applied: u32,
    pub failed: u32,
}

impl FixLog {
    pub fn push(&mut self, result: FixResult) {
        self.entries.push(result);
    }

    pub fn entries(&self) -> &[FixResult] {
        &self.entries
    }

    pub fn totals(&self) -> FixLogTotals {
        let applied = self.entries.iter().filter(|r| r.success).count() as u32;
        FixLogTotals {
            applied,
            failed: self.entries.len() as u32 - applied,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn dedup_key_ignores_insertion_order() {
        let a = FixAction::new("set_margins").param("top", 0.75).param("left", 0.5);
        let b = FixAction::new("set_margins").param("left", 0.5).param("top", 0.75);
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(
            a.dedup_key(),
            FixAction::new("set_margins").param("top", 0.5).dedup_key()
        );
    }

    #[test]
    fn action_accepts_reasoning_alias() {
        let action: FixAction = serde_json::from_value(json!({
            "tool_name": "auto_fit_tables",
            "target_issues": ["table_overflow"],
            "reasoning": "fit tables"
        }))
        .unwrap();
        assert_eq!(action.rationale, "fit tables");
        assert_eq!(action.target_issues, vec![IssueType::TableOverflow]);
        assert!(!action.is_fallback);
    }

    #[test]
    fn log_totals() {
        let mut log = FixLog::default();
        log.push(FixResult::succeeded("set_margins", "j", "ok"));
        log.push(FixResult::failed("replace_font", "j", "no font", "missing"));
        log.push(FixResult::succeeded("auto_fit_tables", "j", "ok"));
        assert_eq!(log.totals(), FixLogTotals { applied: 2, failed: 1 });

        let json = serde_json::to_value(&log).unwrap();
        assert!(json.is_array());
        assert_eq!(json[1]["error"], "missing");
    }
}
