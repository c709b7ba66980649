//! Storage module for the crawl job store
//!
//! This module holds all durable crawl state shared by the worker fleet:
//! - Providers and their crawler configuration
//! - Crawl jobs with their status and lease columns
//! - Crawl pages with per-page status, fetch metadata and diagnostics
//! - Extracted product audit records
//!
//! The store is the only coordination point between workers. Every status or lease change
//! is a single-row conditional update, so no in-process lock is relied on for
//! cross-process safety.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{JobStore, StorageError, StorageResult};

use crate::state::{JobStatus, PageStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

/// Opens (or creates) the shared job store database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file shared by all workers
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Store with the schema in place
/// * `Err(StorageError)` - Failed to open or initialize the database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Formats a timestamp for storage
///
/// Fixed-width RFC 3339 UTC with milliseconds, so stored timestamps compare correctly
/// as plain strings inside SQL.
pub fn db_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A retailer provider and its crawler configuration
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    pub id: i64,
    pub name: String,
    /// Crawler type identifier used to resolve a strategy
    pub crawler_type: String,
    /// Raw JSON settings blob, parsed defensively by the worker
    pub settings: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a crawl job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub provider_id: i64,
    pub start_url: String,
    pub sitemap_url: Option<String>,
    pub max_pages: Option<u32>,
}

/// Represents a crawl job in the database
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub provider_id: i64,
    pub start_url: String,
    pub sitemap_url: Option<String>,
    pub max_pages: Option<u32>,
    pub status: JobStatus,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub paused_by: Option<String>,
}

impl JobRecord {
    /// Returns true if `worker_id` holds a lease that has not expired at `now`
    pub fn is_leased_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.lease_owner.as_deref() == Some(worker_id)
            && self.lease_expires_at.map(|at| at > now).unwrap_or(false)
    }
}

/// Represents a page in the database
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub id: i64,
    pub job_id: i64,
    pub url: String,
    pub status: PageStatus,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub content_hash: Option<String>,
    /// Raw content, kept only for failed pages
    pub content: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Fetch metadata recorded on a page once it leaves Processing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageFetch {
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub content_hash: Option<String>,
}

/// A product parsed from one page, before it is persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ProductData {
    pub external_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub product_url: Option<String>,
    pub image_urls: Vec<String>,
    /// Source fragment the product was parsed from, kept for audit
    pub raw: serde_json::Value,
}

/// Represents a persisted extracted product (append-only audit record)
#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub id: i64,
    pub job_id: i64,
    pub page_id: i64,
    pub provider_id: i64,
    pub external_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub product_url: Option<String>,
    pub image_urls: Vec<String>,
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
}
