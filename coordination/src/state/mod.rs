//! Shared state for the fix loop
//!
//! Holds the only mutable structures shared across concurrent jobs:
//! - job lifecycle records (field maps with TTL)
//! - rate-limit windows (per-client request timestamps)
//!
//! # Usage
//!
//! ```ignore
//! use coordination::state::{MemoryStore, RecordStore};
//!
//! let store = MemoryStore::new().shared();
//! store.merge_fields("printfix:job:abc", fields, Some(ttl)).await?;
//! ```

pub mod schema;
pub mod store;

pub use store::{
    FieldMap, MemoryStore, RecordStore, SharedMemoryStore, StoreError, StoreResult, WindowStore,
};
