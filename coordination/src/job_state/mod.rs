//! Job lifecycle: status graph, typed records, and the job store.

mod error;
mod record;
mod status;
mod store;

pub use error::JobStateError;
pub use record::{Aggressiveness, EffortLevel, JobRecord, PageSize};
pub use status::{is_legal_transition, JobStatus, UnknownStatus};
pub use store::{JobStore, JobStoreConfig, DEFAULT_JOB_TTL};
