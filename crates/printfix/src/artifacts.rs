//! Per-job JSON artifacts.
//!
//! Layout on disk: `<storage_dir>/<job_id>/<name>`.
//!
//! | Name                     | Contents                              |
//! |--------------------------|---------------------------------------|
//! | `diagnosis.json`         | latest diagnosis                      |
//! | `diagnosis_initial.json` | diagnosis before the first fix        |
//! | `fixes.json`             | fix log, one entry per attempted fix  |
//! | `orchestration.json`     | orchestration result and history      |
//! | `verification.json`      | confidence score of the finished run  |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::fixes::{FixLog, FixResult};

pub const DIAGNOSIS: &str = "diagnosis.json";
pub const DIAGNOSIS_INITIAL: &str = "diagnosis_initial.json";
pub const FIX_LOG: &str = "fixes.json";
pub const ORCHESTRATION: &str = "orchestration.json";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact IO error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact {name} for job {job_id} is not valid JSON: {source}")]
    Json {
        job_id: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// JSON document storage scoped by job.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn read(&self, job_id: &str, name: &str) -> Result<Option<Value>, ArtifactError>;

    async fn write(&self, job_id: &str, name: &str, value: &Value) -> Result<(), ArtifactError>;

    async fn exists(&self, job_id: &str, name: &str) -> Result<bool, ArtifactError> {
        Ok(self.read(job_id, name).await?.is_some())
    }
}

// ── Typed helpers ─────────────────────────────────────────────────────

pub async fn load<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    job_id: &str,
    name: &str,
) -> Result<Option<T>, ArtifactError> {
    match store.read(job_id, name).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| ArtifactError::Json {
                job_id: job_id.to_string(),
                name: name.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub async fn save<T: Serialize + ?Sized>(
    store: &dyn ArtifactStore,
    job_id: &str,
    name: &str,
    value: &T,
) -> Result<(), ArtifactError> {
    let value = serde_json::to_value(value).map_err(|source| ArtifactError::Json {
        job_id: job_id.to_string(),
        name: name.to_string(),
        source,
    })?;
    store.write(job_id, name, &value).await
}

/// Append one result to the job's fix log and return the updated log.
///
/// Read-modify-write; callers hold the job's single writer.
pub async fn append_fix(
    store: &dyn ArtifactStore,
    job_id: &str,
    result: FixResult,
) -> Result<FixLog, ArtifactError> {
    let mut log: FixLog = load(store, job_id, FIX_LOG).await?.unwrap_or_default();
    log.push(result);
    save(store, job_id, FIX_LOG, &log).await?;
    Ok(log)
}

// ── Filesystem ────────────────────────────────────────────────────────

/// Pretty-printed JSON files under a storage root.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    fn path(&self, job_id: &str, name: &str) -> PathBuf {
        self.job_dir(job_id).join(name)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn read(&self, job_id: &str, name: &str) -> Result<Option<Value>, ArtifactError> {
        let path = self.path(job_id, name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| ArtifactError::Json {
                job_id: job_id.to_string(),
                name: name.to_string(),
                source,
            })
    }

    async fn write(&self, job_id: &str, name: &str, value: &Value) -> Result<(), ArtifactError> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let json = serde_json::to_vec_pretty(value).map_err(|source| ArtifactError::Json {
            job_id: job_id.to_string(),
            name: name.to_string(),
            source,
        })?;

        // Write-then-rename so readers never see a torn file.
        let path = self.path(job_id, name);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn exists(&self, job_id: &str, name: &str) -> Result<bool, ArtifactError> {
        let path = self.path(job_id, name);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&path, e))
    }
}

// ── In-memory ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    docs: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn read(&self, job_id: &str, name: &str) -> Result<Option<Value>, ArtifactError> {
        let docs = self.docs.lock().map_err(|_| ArtifactError::LockPoisoned)?;
        Ok(docs.get(&(job_id.to_string(), name.to_string())).cloned())
    }

    async fn write(&self, job_id: &str, name: &str, value: &Value) -> Result<(), ArtifactError> {
        let mut docs = self.docs.lock().map_err(|_| ArtifactError::LockPoisoned)?;
        docs.insert((job_id.to_string(), name.to_string()), value.clone());
        Ok(())
    }
}
