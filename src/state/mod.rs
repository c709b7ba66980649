//! State module for crawl jobs and their pages
//!
//! # Components
//!
//! - `JobStatus`: lifecycle of a crawl job (queued, running, paused, terminal)
//! - `PageStatus`: lifecycle of one page inside a job

mod job_status;
mod page_status;

// Re-export main types
pub use job_status::JobStatus;
pub use page_status::PageStatus;
