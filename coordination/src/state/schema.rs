//! Key layout for the shared record store
//!
//! Job records and rate-limit windows share one store instance; the prefixes
//! keep the two keyspaces apart.

/// Prefix for job lifecycle records
pub const JOB_PREFIX: &str = "printfix:job";

/// Prefix for sliding-window rate-limit counters
pub const RATE_LIMIT_PREFIX: &str = "printfix:ratelimit";

/// Field names stored in a job record
pub mod fields {
    pub const ID: &str = "id";
    pub const STATUS: &str = "status";
    pub const ORIGINAL_FILENAME: &str = "original_filename";
    pub const EFFORT: &str = "effort";
    pub const AGGRESSIVENESS: &str = "aggressiveness";
    pub const FILE_TYPE: &str = "file_type";
    pub const FILE_SIZE_BYTES: &str = "file_size_bytes";
    pub const PAGES: &str = "pages";
    pub const SOURCE_PATH: &str = "source_path";
    pub const PDF_PATH: &str = "pdf_path";
    pub const TARGET_PAGE_SIZE: &str = "target_page_size";
    pub const ISSUES_FOUND: &str = "issues_found";
    pub const ISSUES_FIXED: &str = "issues_fixed";
    pub const ISSUES_SKIPPED: &str = "issues_skipped";
    pub const PRINT_READINESS: &str = "print_readiness";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const COMPLETED_AT: &str = "completed_at";
    pub const ERROR: &str = "error";
}

/// Key builders for compound keys
pub mod keys {
    use super::{JOB_PREFIX, RATE_LIMIT_PREFIX};

    /// Create a job record key
    pub fn job(job_id: &str) -> String {
        format!("{}:{}", JOB_PREFIX, job_id)
    }

    /// Create a rate-limit window key for a client identity
    pub fn rate_window(client_key: &str) -> String {
        format!("{}:{}", RATE_LIMIT_PREFIX, client_key)
    }
}
