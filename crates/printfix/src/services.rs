//! Collaborator seams the fix loop calls out to.
//!
//! All are injected as `Arc<dyn Trait>` when the runtime is assembled, so
//! tests swap in scripted implementations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use coordination::state::schema::fields;
use coordination::{FieldMap, JobRecord};
use serde::{Deserialize, Serialize};

use crate::config::EffortConfig;
use crate::diagnosis::Diagnosis;
use crate::errors::FixLoopError;
use crate::format::DocumentFormat;

/// Produces a fresh diagnosis of the job's current documents.
#[async_trait]
pub trait DiagnosisProvider: Send + Sync {
    async fn diagnose(
        &self,
        job: &JobRecord,
        effort: &EffortConfig,
    ) -> Result<Diagnosis, FixLoopError>;
}

/// Output of a render pass, merged into the job record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderMetadata {
    pub pdf_path: Option<PathBuf>,
    pub page_count: Option<u32>,
}

impl RenderMetadata {
    /// Job-record fields for this metadata.
    pub fn to_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        if let Some(pdf) = &self.pdf_path {
            map.insert(fields::PDF_PATH.into(), pdf.display().to_string());
        }
        if let Some(pages) = self.page_count {
            map.insert(fields::PAGES.into(), pages.to_string());
        }
        map
    }
}

/// Regenerates the reference PDF and page images after a document changed.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, job: &JobRecord, path: &Path) -> Result<RenderMetadata, FixLoopError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Valid,
    Corrupt,
}

/// Outcome of checking a document after a fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub path: PathBuf,
    pub format: Option<DocumentFormat>,
    pub status: IntegrityStatus,
    pub details: String,
}

impl IntegrityReport {
    pub fn valid(path: &Path, format: Option<DocumentFormat>, details: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            format,
            status: IntegrityStatus::Valid,
            details: details.into(),
        }
    }

    pub fn corrupt(path: &Path, format: Option<DocumentFormat>, details: impl Into<String>) -> Self {
        Self {
            status: IntegrityStatus::Corrupt,
            ..Self::valid(path, format, details)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == IntegrityStatus::Valid
    }
}

/// Decides whether a document is still well-formed.
#[async_trait]
pub trait IntegrityValidator: Send + Sync {
    async fn validate(&self, path: &Path, format: Option<DocumentFormat>) -> IntegrityReport;
}
