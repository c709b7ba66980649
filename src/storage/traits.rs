//! Storage traits and error types
//!
//! This module defines the trait interface for the job store and
//! associated error types.

use crate::state::{JobStatus, PageStatus};
use crate::storage::{
    JobRecord, NewJob, PageFetch, PageRecord, ProductData, ProductRecord, ProviderRecord,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Page not found: {0}")]
    PageNotFound(i64),

    #[error("Invalid transition for page {page_id}: {from} -> {to}")]
    InvalidPageTransition {
        page_id: i64,
        from: PageStatus,
        to: PageStatus,
    },

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidJobTransition {
        job_id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for job store implementations
///
/// Every worker in the fleet talks to the same store, possibly from different
/// processes. Implementations must make each status and lease change atomic with
/// respect to every other writer; in-process locking alone is not enough.
pub trait JobStore: Send + Sync {
    // ===== Provider Management =====

    /// Registers a provider and returns its ID
    fn insert_provider(
        &self,
        name: &str,
        crawler_type: &str,
        settings: Option<&str>,
    ) -> StorageResult<i64>;

    /// Gets a provider by ID, or None if the row does not exist
    fn get_provider(&self, provider_id: i64) -> StorageResult<Option<ProviderRecord>>;

    // ===== Job Management =====

    /// Creates a job in the Queued status
    fn insert_job(&self, job: &NewJob, now: DateTime<Utc>) -> StorageResult<i64>;

    /// Gets a job by ID
    fn get_job(&self, job_id: i64) -> StorageResult<JobRecord>;

    /// Lists the most recently created jobs, newest first
    fn list_jobs(&self, limit: u32) -> StorageResult<Vec<JobRecord>>;

    /// Claims the oldest eligible job for `worker_id`
    ///
    /// Eligible jobs are Queued ones, plus Running ones whose lease is absent or
    /// expired at `now`. The claim is a compare-and-set on the job's prior status and
    /// lease columns; losing a race to another worker returns `Ok(None)`.
    ///
    /// # Arguments
    ///
    /// * `worker_id` - Identity recorded as the lease owner
    /// * `now` - Current time, used for expiry checks and `started_at`
    /// * `lease_until` - Expiry written to the claimed job's lease
    fn claim_next_job(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<Option<JobRecord>>;

    /// Pushes the lease expiry forward
    ///
    /// Returns false if `worker_id` no longer owns a Running job with this ID.
    fn extend_lease(
        &self,
        job_id: i64,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Clears the lease if `worker_id` still owns it
    fn release_lease(&self, job_id: i64, worker_id: &str) -> StorageResult<bool>;

    /// Writes a terminal status (Succeeded or Failed) and clears the lease
    ///
    /// Nothing is written unless `worker_id` still holds the lease. The status is
    /// only written while the job is still Running, so an external cancel or pause
    /// is never overwritten; the owner's lease is cleared either way.
    ///
    /// # Returns
    ///
    /// True if the status was written. False if the job is no longer Running or
    /// another worker has reclaimed it.
    fn complete_job(
        &self,
        job_id: i64,
        worker_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Cancels a Queued, Running or Paused job and clears its lease
    fn cancel_job(&self, job_id: i64, now: DateTime<Utc>) -> StorageResult<bool>;

    /// Pauses a Running job on behalf of `admin`
    fn pause_job(&self, job_id: i64, admin: &str, now: DateTime<Utc>) -> StorageResult<bool>;

    /// Resumes a Paused job as Running with no lease, making it claimable
    fn resume_job(&self, job_id: i64) -> StorageResult<bool>;

    // ===== Page Management =====

    /// Tracks URLs for a job as Queued pages
    ///
    /// URLs already tracked for the job are ignored. When `cap` is given, insertion
    /// stops once the job tracks that many pages in total.
    ///
    /// # Arguments
    ///
    /// * `job_id` - Job the pages belong to
    /// * `urls` - Normalized URLs, in crawl order
    /// * `cap` - The job's `max_pages`, if any
    /// * `now` - Creation time of the new rows
    ///
    /// # Returns
    ///
    /// The number of pages actually inserted
    fn insert_pages(
        &self,
        job_id: i64,
        urls: &[String],
        cap: Option<u32>,
        now: DateTime<Utc>,
    ) -> StorageResult<usize>;

    /// Returns pages left in Processing by a previous lease holder to Queued
    fn requeue_interrupted_pages(&self, job_id: i64) -> StorageResult<usize>;

    /// Gets the oldest Queued page of a job
    fn next_queued_page(&self, job_id: i64) -> StorageResult<Option<PageRecord>>;

    /// Moves a page from Queued to Processing
    fn mark_page_processing(&self, page_id: i64) -> StorageResult<()>;

    /// Marks a Processing page Succeeded and appends its products in one transaction
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Page and products written together
    /// * `Err(StorageError::InvalidPageTransition)` - The page is no longer Processing;
    ///   nothing was written
    fn record_page_success(
        &self,
        page: &PageRecord,
        provider_id: i64,
        fetch: &PageFetch,
        products: &[ProductData],
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Marks a Processing page Failed, keeping its content for diagnosis
    fn record_page_failure(
        &self,
        page_id: i64,
        fetch: &PageFetch,
        content: Option<&str>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Marks a Queued or Processing page Skipped
    fn record_page_skipped(
        &self,
        page_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Gets a page by ID
    fn get_page(&self, page_id: i64) -> StorageResult<PageRecord>;

    /// Lists all pages of a job in creation order
    fn list_pages(&self, job_id: i64) -> StorageResult<Vec<PageRecord>>;

    // ===== Products =====

    /// Lists the products recorded for a job
    fn list_products(&self, job_id: i64) -> StorageResult<Vec<ProductRecord>>;

    // ===== Statistics =====

    /// Counts a job's pages per status; statuses with no pages are absent
    fn count_pages_by_status(&self, job_id: i64) -> StorageResult<HashMap<PageStatus, u64>>;

    /// Gets distinct error messages of a job's failed pages, oldest first
    ///
    /// Messages are compared as stored; callers that quote them truncate first and
    /// deduplicate again.
    fn distinct_page_errors(&self, job_id: i64) -> StorageResult<Vec<String>>;

    /// Counts the products recorded for a job
    fn count_products(&self, job_id: i64) -> StorageResult<u64>;
}
