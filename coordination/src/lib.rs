//! Coordination primitives for the print-readiness fix loop
//!
//! This library provides the deterministic, I/O-light pieces the fix loop
//! is built on:
//! - `convergence`: the stop decision over an iteration history
//! - `job_state`: job lifecycle graph, typed records and the job store
//! - `rate_limit`: sliding-window admission per client key
//! - `retry`: capped exponential backoff for transient failures
//! - `state`: the record/window store seams and the in-memory store
//!
//! # Usage
//!
//! ```ignore
//! use coordination::{JobStore, JobStoreConfig, MemoryStore};
//!
//! let store = MemoryStore::new().shared();
//! let jobs = JobStore::new(store.clone(), JobStoreConfig::default());
//! jobs.create_job("abc", "thesis.docx", Default::default()).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod convergence;
pub mod job_state;
pub mod rate_limit;
pub mod retry;
pub mod state;

pub use convergence::{should_stop, ConvergenceState, StopReason};
pub use job_state::{
    is_legal_transition, Aggressiveness, EffortLevel, JobRecord, JobStateError, JobStatus,
    JobStore, JobStoreConfig, PageSize,
};
pub use rate_limit::{RateDecision, RateLimiter};
pub use retry::{with_retry, RetryPolicy};
pub use state::{FieldMap, MemoryStore, RecordStore, SharedMemoryStore, StoreError, WindowStore};
