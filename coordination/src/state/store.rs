//! Shared record store for job lifecycle state and rate-limit windows
//!
//! Two seams, one backing store:
//! - [`RecordStore`]: field-map records with TTL (job state)
//! - [`WindowStore`]: per-key sliding windows of request timestamps
//!
//! Every trait method is one atomic operation against the store. The
//! in-memory implementation holds a single mutex for the whole critical
//! section of each call, so concurrent callers never interleave partial
//! updates.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// A record is a flat map of string fields.
pub type FieldMap = BTreeMap<String, String>;

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Field-map record storage with expiry.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read all fields of a live record.
    async fn get_fields(&self, key: &str) -> StoreResult<Option<FieldMap>>;

    /// Merge `fields` into the record (creating it if absent) in one write.
    ///
    /// When `ttl` is given the record's expiry is reset to `now + ttl`.
    async fn merge_fields(
        &self,
        key: &str,
        fields: FieldMap,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// Merge `fields` into a live record only. Returns `false` without
    /// writing when the record is absent or expired.
    async fn merge_existing(
        &self,
        key: &str,
        fields: FieldMap,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Delete a record. Returns whether a live record existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;
}

/// Sliding-window counters keyed by client identity.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomic admission batch for one request at `now`:
    /// prune entries at or before `now - window`, insert `now`, count the
    /// window, and remove the inserted entry again if the count exceeds
    /// `limit`. Returns the count observed right after insertion.
    ///
    /// A key with no check for a full window is dropped.
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u64,
    ) -> StoreResult<u64>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    fields: FieldMap,
    expires_at: Option<Instant>,
}

impl StoredRecord {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Sorted request timestamps for one key; the key is idle once
/// `expires_at` (last insert + window) has passed.
#[derive(Debug)]
struct Window {
    entries: Vec<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<String, StoredRecord>,
    windows: HashMap<String, Window>,
    last_window_sweep: Option<DateTime<Utc>>,
}

impl StoreInner {
    /// Drop idle windows at most once per `window` of request time.
    fn sweep_windows(&mut self, now: DateTime<Utc>, window: chrono::Duration) {
        if self.last_window_sweep.is_some_and(|last| now < last + window) {
            return;
        }
        let before = self.windows.len();
        self.windows.retain(|_, w| w.expires_at > now);
        self.last_window_sweep = Some(now);

        let evicted = before - self.windows.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle rate-limit windows");
        }
    }
}

/// Shared reference to MemoryStore
pub type SharedMemoryStore = Arc<MemoryStore>;

/// Process-local store backing both job records and rate-limit windows.
///
/// Expiry uses the tokio clock, so paused-time tests can advance past a TTL
/// without sleeping.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedMemoryStore {
        Arc::new(self)
    }

    /// Number of live records (expired entries are not counted).
    pub fn live_records(&self) -> StoreResult<usize> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        Ok(inner.records.values().filter(|r| r.is_live(now)).count())
    }

    /// Number of keys currently holding a rate-limit window.
    pub fn window_keys(&self) -> StoreResult<usize> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.windows.len())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_fields(&self, key: &str) -> StoreResult<Option<FieldMap>> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        let Some(record) = inner.records.get(key) else {
            return Ok(None);
        };
        if record.is_live(now) {
            return Ok(Some(record.fields.clone()));
        }

        inner.records.remove(key);
        tracing::debug!(key, "Record expired");
        Ok(None)
    }

    async fn merge_fields(
        &self,
        key: &str,
        fields: FieldMap,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();

        let record = inner
            .records
            .entry(key.to_string())
            .or_insert_with(|| StoredRecord {
                fields: FieldMap::new(),
                expires_at: None,
            });

        // An expired record is replaced, not merged into.
        if !record.is_live(now) {
            record.fields.clear();
            record.expires_at = None;
        }

        record.fields.extend(fields);
        if let Some(ttl) = ttl {
            record.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn merge_existing(
        &self,
        key: &str,
        fields: FieldMap,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();

        let Some(record) = inner.records.get_mut(key) else {
            return Ok(false);
        };
        if !record.is_live(now) {
            inner.records.remove(key);
            return Ok(false);
        }

        record.fields.extend(fields);
        if let Some(ttl) = ttl {
            record.expires_at = Some(now + ttl);
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        Ok(inner
            .records
            .remove(key)
            .is_some_and(|record| record.is_live(now)))
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u64,
    ) -> StoreResult<u64> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| StoreError::Backend(format!("window out of range: {e}")))?;
        let cutoff = now - window;

        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        inner.sweep_windows(now, window);

        let bucket = inner.windows.entry(key.to_string()).or_insert_with(|| Window {
            entries: Vec::new(),
            expires_at: now,
        });
        let entries = &mut bucket.entries;

        entries.retain(|ts| *ts > cutoff);

        let slot = entries.partition_point(|ts| *ts <= now);
        entries.insert(slot, now);
        let count = entries.len() as u64;

        if count > limit {
            entries.remove(slot);
        }
        let empty = entries.is_empty();
        // Every check refreshes the key's expiry, rejected or not.
        bucket.expires_at = bucket.expires_at.max(now + window);
        if empty {
            inner.windows.remove(key);
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_merge_creates_and_merges() {
        let store = MemoryStore::new();
        store
            .merge_fields("k", fields(&[("a", "1"), ("b", "2")]), None)
            .await
            .unwrap();
        store
            .merge_fields("k", fields(&[("b", "3")]), None)
            .await
            .unwrap();

        let record = store.get_fields("k").await.unwrap().unwrap();
        assert_eq!(record.get("a").map(String::as_str), Some("1"));
        assert_eq!(record.get("b").map(String::as_str), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .merge_fields("k", fields(&[("a", "1")]), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get_fields("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get_fields("k").await.unwrap().is_none());
        assert_eq!(store.live_records().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_refreshes_ttl() {
        let store = MemoryStore::new();
        let ttl = Some(Duration::from_secs(10));
        store.merge_fields("k", fields(&[("a", "1")]), ttl).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        store.merge_fields("k", fields(&[("b", "2")]), ttl).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        let record = store.get_fields("k").await.unwrap().unwrap();
        assert_eq!(record.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_record_is_not_merged_into() {
        let store = MemoryStore::new();
        store
            .merge_fields("k", fields(&[("old", "x")]), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        store
            .merge_fields("k", fields(&[("new", "y")]), None)
            .await
            .unwrap();
        let record = store.get_fields("k").await.unwrap().unwrap();
        assert!(!record.contains_key("old"));
        assert!(record.contains_key("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_existing_skips_absent_and_expired() {
        let store = MemoryStore::new();
        assert!(!store
            .merge_existing("k", fields(&[("a", "1")]), None)
            .await
            .unwrap());
        assert!(store.get_fields("k").await.unwrap().is_none());

        store
            .merge_fields("k", fields(&[("a", "1")]), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(store
            .merge_existing("k", fields(&[("b", "2")]), None)
            .await
            .unwrap());
        assert_eq!(store.get_fields("k").await.unwrap().unwrap().len(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store
            .merge_existing("k", fields(&[("c", "3")]), None)
            .await
            .unwrap());
        assert_eq!(store.live_records().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryStore::new();
        store.merge_fields("k", fields(&[("a", "1")]), None).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_admit_rolls_back_over_limit() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let window = Duration::from_secs(60);

        assert_eq!(store.admit("c", now, window, 2).await.unwrap(), 1);
        assert_eq!(store.admit("c", now, window, 2).await.unwrap(), 2);
        // Over the limit: counted, then removed again.
        assert_eq!(store.admit("c", now, window, 2).await.unwrap(), 3);
        assert_eq!(store.admit("c", now, window, 2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_admit_prunes_outside_window() {
        let store = MemoryStore::new();
        let start = Utc::now();
        let window = Duration::from_secs(60);

        store.admit("c", start, window, 10).await.unwrap();
        store.admit("c", start, window, 10).await.unwrap();

        let later = start + chrono::Duration::seconds(60);
        assert_eq!(store.admit("c", later, window, 10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_idle_windows_are_evicted() {
        let store = MemoryStore::new();
        let start = Utc::now();
        let window = Duration::from_secs(60);

        for i in 0..1000 {
            store
                .admit(&format!("client-{i}"), start, window, 60)
                .await
                .unwrap();
        }
        assert_eq!(store.window_keys().unwrap(), 1000);

        let next_day = start + chrono::Duration::days(1);
        store.admit("late-client", next_day, window, 60).await.unwrap();
        assert_eq!(store.window_keys().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_active_window_survives_sweep() {
        let store = MemoryStore::new();
        let start = Utc::now();
        let window = Duration::from_secs(60);

        store.admit("idle", start, window, 60).await.unwrap();
        let mid = start + chrono::Duration::seconds(30);
        store.admit("busy", mid, window, 60).await.unwrap();

        // "idle" expired at start + 60s, "busy" lives until start + 90s.
        let later = start + chrono::Duration::seconds(75);
        store.admit("other", later, window, 60).await.unwrap();
        assert_eq!(store.window_keys().unwrap(), 2);
        assert_eq!(store.admit("busy", later, window, 60).await.unwrap(), 2);
    }
}
