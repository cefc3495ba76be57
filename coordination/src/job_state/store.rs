//! Job lifecycle persistence over a [`RecordStore`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::error::JobStateError;
use super::record::JobRecord;
use super::status::{is_legal_transition, JobStatus};
use crate::state::schema::{fields, keys};
use crate::state::{FieldMap, RecordStore};

/// Default record TTL: one day from last write.
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    /// Expiry applied (and refreshed) on every write.
    pub ttl: Duration,
    /// Reject edges outside the transition graph instead of logging them.
    pub strict_transitions: bool,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_JOB_TTL,
            strict_transitions: false,
        }
    }
}

/// Owner of all job records.
///
/// Each method issues exactly one write to the backing store, so a record is
/// never observed half-updated.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn RecordStore>,
    config: JobStoreConfig,
}

impl JobStore {
    pub fn new(store: Arc<dyn RecordStore>, config: JobStoreConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &JobStoreConfig {
        &self.config
    }

    /// Create a job in `uploaded` with both timestamps set to now.
    ///
    /// `attrs` carries file metadata and policy fields (effort,
    /// aggressiveness, target page size, ...). Reserved fields in `attrs`
    /// are overwritten.
    pub async fn create_job(
        &self,
        job_id: &str,
        original_filename: &str,
        attrs: FieldMap,
    ) -> Result<JobRecord, JobStateError> {
        let now = Utc::now().to_rfc3339();
        let mut record = attrs;
        record.insert(fields::ID.into(), job_id.to_string());
        record.insert(fields::STATUS.into(), JobStatus::Uploaded.to_string());
        record.insert(fields::ORIGINAL_FILENAME.into(), original_filename.to_string());
        record.insert(fields::CREATED_AT.into(), now.clone());
        record.insert(fields::UPDATED_AT.into(), now);

        self.store
            .merge_fields(&keys::job(job_id), record.clone(), Some(self.config.ttl))
            .await?;
        debug!(job_id, "Job created");
        JobRecord::from_fields(record)
    }

    /// Move a job to `status`, merging `extra` and the optional error message.
    ///
    /// Entering a terminal state stamps `completed_at`. Edges outside the
    /// transition graph are logged and applied, or rejected without writing
    /// when strict transitions are on.
    pub async fn set_state(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
        extra: FieldMap,
    ) -> Result<(), JobStateError> {
        let current = self.current_status(job_id).await?;

        if !is_legal_transition(current, status) {
            if self.config.strict_transitions {
                return Err(JobStateError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from: current,
                    to: status,
                });
            }
            warn!(
                job_id,
                from = %current,
                to = %status,
                "Transition outside the job lifecycle graph; applying anyway"
            );
        }

        let now = Utc::now().to_rfc3339();
        let mut update = extra;
        update.insert(fields::STATUS.into(), status.to_string());
        update.insert(fields::UPDATED_AT.into(), now.clone());
        if status.is_terminal() {
            update.insert(fields::COMPLETED_AT.into(), now);
        }
        if let Some(message) = error {
            update.insert(fields::ERROR.into(), message.to_string());
        }

        self.merge_existing(job_id, update).await?;
        debug!(job_id, from = %current, to = %status, "Job transitioned");
        Ok(())
    }

    /// Merge fields without changing status. Stamps `updated_at`.
    pub async fn update_fields(&self, job_id: &str, extra: FieldMap) -> Result<(), JobStateError> {
        let mut update = extra;
        update.remove(fields::STATUS);
        update.insert(fields::UPDATED_AT.into(), Utc::now().to_rfc3339());
        self.merge_existing(job_id, update).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, JobStateError> {
        match self.get_fields(job_id).await? {
            Some(map) => JobRecord::from_fields(map).map(Some),
            None => Ok(None),
        }
    }

    /// Raw field map, including fields without a typed counterpart.
    pub async fn get_fields(&self, job_id: &str) -> Result<Option<FieldMap>, JobStateError> {
        Ok(self.store.get_fields(&keys::job(job_id)).await?)
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<bool, JobStateError> {
        Ok(self.store.delete(&keys::job(job_id)).await?)
    }

    /// Writes never recreate a record that expired or was deleted since it
    /// was read; that would leave an orphan without `id` or `created_at`.
    async fn merge_existing(&self, job_id: &str, update: FieldMap) -> Result<(), JobStateError> {
        let written = self
            .store
            .merge_existing(&keys::job(job_id), update, Some(self.config.ttl))
            .await?;
        if written {
            Ok(())
        } else {
            Err(JobStateError::NotFound(job_id.to_string()))
        }
    }

    async fn current_status(&self, job_id: &str) -> Result<JobStatus, JobStateError> {
        let map = self
            .get_fields(job_id)
            .await?
            .ok_or_else(|| JobStateError::NotFound(job_id.to_string()))?;
        let raw = map
            .get(fields::STATUS)
            .ok_or_else(|| JobStateError::MissingField(fields::STATUS.to_string()))?;
        raw.parse::<JobStatus>()
            .map_err(|e| JobStateError::invalid_field(fields::STATUS, &e.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;

    fn store_with(strict: bool) -> JobStore {
        JobStore::new(
            MemoryStore::new().shared(),
            JobStoreConfig {
                ttl: Duration::from_secs(60),
                strict_transitions: strict,
            },
        )
    }

    fn attrs(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_job_starts_uploaded() {
        let jobs = store_with(false);
        let record = jobs
            .create_job("j1", "thesis.docx", attrs(&[("effort", "quick")]))
            .await
            .unwrap();

        assert_eq!(record.status, JobStatus::Uploaded);
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.original_filename, "thesis.docx");

        let loaded = jobs.get_job("j1").await.unwrap().unwrap();
        assert_eq!(loaded.effort, crate::job_state::EffortLevel::Quick);
    }

    #[tokio::test]
    async fn test_terminal_state_stamps_completion() {
        let jobs = store_with(false);
        jobs.create_job("j1", "a.pdf", FieldMap::new()).await.unwrap();
        jobs.set_state("j1", JobStatus::Failed, Some("converter crashed"), FieldMap::new())
            .await
            .unwrap();

        let record = jobs.get_job("j1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.completed_at.is_some());
        assert_eq!(record.error.as_deref(), Some("converter crashed"));
    }

    #[tokio::test]
    async fn test_advisory_mode_applies_illegal_edge() {
        let jobs = store_with(false);
        jobs.create_job("j1", "a.pdf", FieldMap::new()).await.unwrap();
        jobs.set_state("j1", JobStatus::Verifying, None, FieldMap::new())
            .await
            .unwrap();

        let record = jobs.get_job("j1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Verifying);
        assert!(record.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_without_writing() {
        let jobs = store_with(true);
        jobs.create_job("j1", "a.pdf", FieldMap::new()).await.unwrap();

        let err = jobs
            .set_state("j1", JobStatus::Done, None, attrs(&[("issues_found", "3")]))
            .await
            .unwrap_err();
        assert!(matches!(err, JobStateError::InvalidTransition { .. }));

        let record = jobs.get_job("j1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Uploaded);
        assert_eq!(record.issues_found, 0);
    }

    #[tokio::test]
    async fn test_set_state_merges_extra_fields() {
        let jobs = store_with(true);
        jobs.create_job("j1", "a.docx", FieldMap::new()).await.unwrap();
        jobs.set_state(
            "j1",
            JobStatus::Ingesting,
            None,
            attrs(&[("file_type", ".docx"), ("pages", "4")]),
        )
        .await
        .unwrap();

        let record = jobs.get_job("j1").await.unwrap().unwrap();
        assert_eq!(record.file_type.as_deref(), Some(".docx"));
        assert_eq!(record.pages, Some(4));
    }

    #[tokio::test]
    async fn test_update_fields_keeps_status() {
        let jobs = store_with(false);
        jobs.create_job("j1", "a.pdf", FieldMap::new()).await.unwrap();
        jobs.update_fields("j1", attrs(&[("issues_fixed", "2"), ("status", "done")]))
            .await
            .unwrap();

        let record = jobs.get_job("j1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Uploaded);
        assert_eq!(record.issues_fixed, 2);
    }

    #[tokio::test]
    async fn test_missing_job() {
        let jobs = store_with(false);
        assert!(jobs.get_job("nope").await.unwrap().is_none());
        assert!(matches!(
            jobs.set_state("nope", JobStatus::Fixing, None, FieldMap::new()).await,
            Err(JobStateError::NotFound(_))
        ));
        assert!(matches!(
            jobs.update_fields("nope", FieldMap::new()).await,
            Err(JobStateError::NotFound(_))
        ));
    }

    /// Serves a stale read of a record that is already gone from the
    /// backing store, as if it was deleted between read and write.
    struct StaleReads {
        snapshot: FieldMap,
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl RecordStore for StaleReads {
        async fn get_fields(&self, _key: &str) -> crate::state::StoreResult<Option<FieldMap>> {
            Ok(Some(self.snapshot.clone()))
        }

        async fn merge_fields(
            &self,
            key: &str,
            fields: FieldMap,
            ttl: Option<Duration>,
        ) -> crate::state::StoreResult<()> {
            self.inner.merge_fields(key, fields, ttl).await
        }

        async fn merge_existing(
            &self,
            key: &str,
            fields: FieldMap,
            ttl: Option<Duration>,
        ) -> crate::state::StoreResult<bool> {
            self.inner.merge_existing(key, fields, ttl).await
        }

        async fn delete(&self, key: &str) -> crate::state::StoreResult<bool> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_vanished_record_is_not_recreated() {
        let stale = Arc::new(StaleReads {
            snapshot: attrs(&[("id", "j1"), ("status", "uploaded")]),
            inner: MemoryStore::new(),
        });
        let jobs = JobStore::new(stale.clone(), JobStoreConfig::default());

        assert!(matches!(
            jobs.set_state("j1", JobStatus::Ingesting, None, FieldMap::new()).await,
            Err(JobStateError::NotFound(_))
        ));
        assert!(matches!(
            jobs.update_fields("j1", attrs(&[("issues_fixed", "1")])).await,
            Err(JobStateError::NotFound(_))
        ));
        assert_eq!(stale.inner.live_records().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_job() {
        let jobs = store_with(false);
        jobs.create_job("j1", "a.pdf", FieldMap::new()).await.unwrap();
        assert!(jobs.delete_job("j1").await.unwrap());
        assert!(jobs.get_job("j1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_expires_after_ttl() {
        let jobs = store_with(false);
        jobs.create_job("j1", "a.pdf", FieldMap::new()).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        jobs.set_state("j1", JobStatus::Ingesting, None, FieldMap::new())
            .await
            .unwrap();

        // TTL refreshed by the write above.
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(jobs.get_job("j1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(jobs.get_job("j1").await.unwrap().is_none());
    }
}
