//! Print-readiness fix loop.
//!
//! Takes a diagnosed job and iterates diagnose → plan → execute → re-diagnose
//! until the document converges or the effort budget runs out.
//!
//! - [`planner`] turns a diagnosis into an ordered, deduplicated [`fixes::FixPlan`]
//! - [`executor`] applies a plan transactionally (backup, timeout, validate, roll back)
//! - [`orchestrator`] runs the loop and asks `coordination::should_stop` when to quit
//! - [`worker`] wraps a run in job lifecycle transitions
//! - [`runtime`] wires the store, registry and services from [`config::PrintfixConfig`]

pub mod artifacts;
pub mod config;
pub mod diagnosis;
pub mod errors;
pub mod executor;
pub mod fixes;
pub mod format;
pub mod integrity;
pub mod model_client;
pub mod orchestrator;
pub mod planner;
pub mod runtime;
pub mod services;
pub mod tools;
pub mod verification;
pub mod worker;

pub use errors::{FixLoopError, RetryCategory};
pub use orchestrator::{OrchestrationResult, Orchestrator};
pub use runtime::{Runtime, Services};
pub use worker::run_fix_job;
