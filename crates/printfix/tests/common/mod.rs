//! Scripted collaborators shared by the fix-loop integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coordination::state::schema::fields;
use coordination::{FieldMap, JobRecord, JobStatus};
use printfix::artifacts::{self, MemoryArtifactStore};
use printfix::config::{EffortConfig, PrintfixConfig, RetryConfig};
use printfix::diagnosis::{Diagnosis, DiagnosisIssue, IssueSeverity, IssueSource, IssueType};
use printfix::fixes::FixResult;
use printfix::services::{DiagnosisProvider, RenderMetadata, Renderer};
use printfix::tools::{ToolBackend, ToolCall, ToolError};
use printfix::{FixLoopError, Runtime, Services};
use tempfile::TempDir;

pub const DOCX_ENTRIES: &[&str] = &["[Content_Types].xml", "word/document.xml", "word/styles.xml"];

/// Minimal ZIP: local header magic, one central directory record per
/// name, end-of-central-directory magic.
pub fn fake_zip(names: &[&str]) -> Vec<u8> {
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(&[0u8; 26]);
    for name in names {
        let mut header = vec![0u8; 46];
        header[..4].copy_from_slice(b"PK\x01\x02");
        header[28..30].copy_from_slice(&(name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(name.as_bytes());
    }
    bytes.extend_from_slice(b"PK\x05\x06");
    bytes
}

pub fn fake_pdf() -> Vec<u8> {
    b"%PDF-1.7\n1 0 obj << /Type /Catalog >> endobj\ntrailer\n%%EOF\n".to_vec()
}

pub fn diagnosis(job_id: &str, file_type: &str, issues: &[(IssueType, IssueSeverity)]) -> Diagnosis {
    let issues = issues
        .iter()
        .enumerate()
        .map(|(i, (issue_type, severity))| {
            DiagnosisIssue::new(
                *issue_type,
                *severity,
                IssueSource::Merged,
                format!("{issue_type} #{i}"),
            )
            .on_page(i as u32 % 3 + 1)
        })
        .collect();
    Diagnosis::new(job_id, "standard", file_type, 3, Vec::new(), issues)
}

// ── Diagnoser ─────────────────────────────────────────────────────────

/// Returns queued diagnoses in order, then a transient error.
#[derive(Default)]
pub struct ScriptedDiagnoser {
    script: Mutex<VecDeque<Result<Diagnosis, String>>>,
    calls: AtomicU32,
}

impl ScriptedDiagnoser {
    pub fn new(script: Vec<Result<Diagnosis, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiagnosisProvider for ScriptedDiagnoser {
    async fn diagnose(
        &self,
        _job: &JobRecord,
        _effort: &EffortConfig,
    ) -> Result<Diagnosis, FixLoopError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(diagnosis)) => Ok(diagnosis),
            Some(Err(message)) => Err(FixLoopError::Diagnosis(message)),
            None => Err(FixLoopError::Diagnosis("diagnosis service unavailable".into())),
        }
    }
}

// ── Renderer ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CountingRenderer {
    renders: AtomicU32,
}

impl CountingRenderer {
    pub fn renders(&self) -> u32 {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for CountingRenderer {
    async fn render(&self, _job: &JobRecord, _path: &Path) -> Result<RenderMetadata, FixLoopError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(RenderMetadata {
            page_count: Some(3),
            ..Default::default()
        })
    }
}

// ── Tool backend ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    /// Reports failure without touching the document.
    Fail,
    /// Returns a backend error.
    Error,
    /// Overwrites the document with garbage and reports success.
    Corrupt,
    /// Never finishes within any sane timeout.
    Hang,
}

/// Per-tool behavior sequences; the last entry repeats. Unscripted tools succeed.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<HashMap<String, VecDeque<Behavior>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, tool: &str, behaviors: &[Behavior]) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(tool.to_string(), behaviors.iter().copied().collect());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self, tool: &str) -> Behavior {
        let mut script = self.script.lock().unwrap();
        match script.get_mut(tool) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Behavior::Succeed),
            Some(queue) => queue.front().copied().unwrap_or(Behavior::Succeed),
            None => Behavior::Succeed,
        }
    }
}

#[async_trait]
impl ToolBackend for ScriptedBackend {
    async fn apply(
        &self,
        path: &Path,
        job_id: &str,
        call: &ToolCall,
    ) -> Result<FixResult, ToolError> {
        let tool = call.tool_name();
        self.calls.lock().unwrap().push(tool.to_string());

        match self.next(tool) {
            Behavior::Succeed => Ok(FixResult::succeeded(tool, job_id, format!("Applied {tool}"))),
            Behavior::Fail => Ok(FixResult::failed(
                tool,
                job_id,
                format!("{tool} made no change"),
                "nothing to change",
            )),
            Behavior::Error => Err(ToolError::backend(tool, "backend crashed")),
            Behavior::Corrupt => {
                tokio::fs::write(path, b"definitely not a document").await?;
                Ok(FixResult::succeeded(tool, job_id, format!("Applied {tool}")))
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(FixResult::succeeded(tool, job_id, format!("Applied {tool}")))
            }
        }
    }
}

// ── Harness ───────────────────────────────────────────────────────────

pub struct Harness {
    pub dir: TempDir,
    pub runtime: Runtime,
    pub diagnoser: Arc<ScriptedDiagnoser>,
    pub backend: Arc<ScriptedBackend>,
    pub renderer: Arc<CountingRenderer>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub source: PathBuf,
    pub pdf: PathBuf,
}

/// Config with millisecond retry delays so failure paths finish quickly.
pub fn test_config(storage: &Path) -> PrintfixConfig {
    PrintfixConfig {
        storage_dir: storage.to_path_buf(),
        retry: RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        ..Default::default()
    }
}

impl Harness {
    pub fn new(diagnoser: ScriptedDiagnoser, backend: ScriptedBackend) -> Self {
        let dir = TempDir::new().unwrap();
        Self::with_config(dir, diagnoser, backend, |_| {})
    }

    pub fn with_config(
        dir: TempDir,
        diagnoser: ScriptedDiagnoser,
        backend: ScriptedBackend,
        tweak: impl FnOnce(&mut PrintfixConfig),
    ) -> Self {
        let source = dir.path().join("thesis.docx");
        let pdf = dir.path().join("thesis.pdf");
        std::fs::write(&source, fake_zip(DOCX_ENTRIES)).unwrap();
        std::fs::write(&pdf, fake_pdf()).unwrap();

        let diagnoser = Arc::new(diagnoser);
        let backend = Arc::new(backend);
        let renderer = Arc::new(CountingRenderer::default());
        let artifacts = Arc::new(MemoryArtifactStore::new());

        let mut config = test_config(&dir.path().join("storage"));
        tweak(&mut config);
        let runtime = Runtime::build(
            config,
            Services {
                diagnoser: diagnoser.clone(),
                renderer: renderer.clone(),
                tool_backend: backend.clone(),
                validator: None,
                artifacts: Some(artifacts.clone()),
            },
        )
        .unwrap();

        Self {
            dir,
            runtime,
            diagnoser,
            backend,
            renderer,
            artifacts,
            source,
            pdf,
        }
    }

    /// Create a docx job, walk it to `diagnosed` and store its diagnosis.
    pub async fn seed(&self, job_id: &str, aggressiveness: &str, initial: &Diagnosis) {
        self.seed_job(job_id, aggressiveness).await;
        artifacts::save(self.artifacts.as_ref(), job_id, artifacts::DIAGNOSIS, initial)
            .await
            .unwrap();
    }

    /// Create a docx job in `diagnosed` without storing a diagnosis.
    pub async fn seed_job(&self, job_id: &str, aggressiveness: &str) {
        let mut attrs = FieldMap::new();
        attrs.insert(fields::FILE_TYPE.into(), ".docx".into());
        attrs.insert(fields::SOURCE_PATH.into(), self.source.display().to_string());
        attrs.insert(fields::PDF_PATH.into(), self.pdf.display().to_string());
        attrs.insert(fields::EFFORT.into(), "standard".into());
        attrs.insert(fields::AGGRESSIVENESS.into(), aggressiveness.into());

        let jobs = &self.runtime.jobs;
        jobs.create_job(job_id, "thesis.docx", attrs).await.unwrap();
        for status in [
            JobStatus::Ingesting,
            JobStatus::Converting,
            JobStatus::Rendering,
            JobStatus::Ingested,
            JobStatus::Diagnosing,
            JobStatus::Diagnosed,
        ] {
            jobs.set_state(job_id, status, None, FieldMap::new())
                .await
                .unwrap();
        }
    }
}
