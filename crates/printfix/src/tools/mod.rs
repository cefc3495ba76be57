//! Fix tool dispatch.
//!
//! Tools are resolved by name through a [`ToolRegistry`] built once at
//! startup from the static catalog. An unknown name is an ordinary error
//! the executor turns into a failed fix, never a panic.

pub mod catalog;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fixes::{FixResult, ToolParams};

pub use catalog::{ToolBackend, ToolCall, ToolSpec, CATALOG};

/// Which document a tool operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolLevel {
    /// Edits the editable source document (DOCX, XLSX, ...).
    Source,
    /// Edits the reference PDF.
    Pdf,
}

/// Errors that can occur while dispatching or running a fix tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found in registry")]
    UnknownTool(String),

    #[error("invalid parameters for {tool}: {message}")]
    InvalidParams { tool: String, message: String },

    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed: {message}")]
    Backend { tool: String, message: String },
}

impl ToolError {
    pub fn backend(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// A named document-mutation operation.
#[async_trait]
pub trait FixTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn level(&self) -> ToolLevel;

    /// JSON schema of the accepted parameter object.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Check `params` against the parameter schema without running anything.
    fn validate(&self, params: &ToolParams) -> Result<(), ToolError>;

    /// Apply the tool to the document at `path` in place.
    async fn apply(
        &self,
        path: &Path,
        job_id: &str,
        params: &ToolParams,
    ) -> Result<FixResult, ToolError>;
}

/// Name → tool map, fixed after construction.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn FixTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every catalog tool, each backed by `backend`.
    pub fn builtin(backend: Arc<dyn ToolBackend>) -> Self {
        let mut registry = Self::new();
        for spec in CATALOG {
            registry.register(Arc::new(catalog::BuiltinTool::new(spec, backend.clone())));
        }
        registry
    }

    /// Add or replace a tool under its own name.
    pub fn register(&mut self, tool: Arc<dyn FixTool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FixTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn level_of(&self, name: &str) -> Option<ToolLevel> {
        self.tools.get(name).map(|t| t.level())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tools.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBackend;

    #[async_trait]
    impl ToolBackend for NullBackend {
        async fn apply(
            &self,
            _path: &Path,
            job_id: &str,
            call: &ToolCall,
        ) -> Result<FixResult, ToolError> {
            Ok(FixResult::succeeded(call.tool_name(), job_id, "noop"))
        }
    }

    #[test]
    fn builtin_registry_has_full_catalog() {
        let registry = ToolRegistry::builtin(Arc::new(NullBackend));
        assert_eq!(registry.len(), 13);
        assert_eq!(registry.level_of("set_margins"), Some(ToolLevel::Source));
        assert_eq!(registry.level_of("pdf_rotate_pages"), Some(ToolLevel::Pdf));
        assert!(registry.get("sharpen_images").is_none());
    }

    #[tokio::test]
    async fn builtin_tool_validates_before_backend() {
        let registry = ToolRegistry::builtin(Arc::new(NullBackend));
        let tool = registry.get("pdf_scale_content").unwrap();

        let mut params = ToolParams::new();
        params.insert("scale_factor".into(), serde_json::json!(0.9));
        let result = tool
            .apply(Path::new("/tmp/doc.pdf"), "j1", &params)
            .await
            .unwrap();
        assert!(result.success);

        params.insert("dpi".into(), serde_json::json!(300));
        let err = tool
            .apply(Path::new("/tmp/doc.pdf"), "j1", &params)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { .. }));
    }
}
