//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the JobStore trait.
//! Each worker opens its own connection to the shared database file; WAL mode plus a
//! busy timeout lets several processes claim and update jobs side by side.

use crate::state::{JobStatus, PageStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{JobStore, StorageError, StorageResult};
use crate::storage::{
    db_time, JobRecord, NewJob, PageFetch, PageRecord, ProductData, ProductRecord,
    ProviderRecord,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_COLUMNS: &str = "id, provider_id, start_url, sitemap_url, max_pages, status, \
     lease_owner, lease_expires_at, error_message, created_at, started_at, completed_at, \
     canceled_at, paused_at, paused_by";

const PAGE_COLUMNS: &str = "id, job_id, url, status, http_status, content_type, title, \
     content_hash, content, error_message, created_at, fetched_at";

const PRODUCT_COLUMNS: &str = "id, job_id, page_id, provider_id, external_id, name, \
     description, price, currency, product_url, image_urls, raw_payload, created_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens or creates the job store at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file shared by the fleet
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database, private to this handle
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }
}

// ===== Row Mapping =====

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_time(idx, &value)
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|value| parse_time(idx, &value))
        .transpose()
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status: String = row.get(5)?;
    let status = JobStatus::from_db_string(&status)
        .ok_or_else(|| conversion_error(5, format!("unknown job status '{}'", status)))?;

    Ok(JobRecord {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        start_url: row.get(2)?,
        sitemap_url: row.get(3)?,
        max_pages: row.get(4)?,
        status,
        lease_owner: row.get(6)?,
        lease_expires_at: optional_time_column(row, 7)?,
        error_message: row.get(8)?,
        created_at: time_column(row, 9)?,
        started_at: optional_time_column(row, 10)?,
        completed_at: optional_time_column(row, 11)?,
        canceled_at: optional_time_column(row, 12)?,
        paused_at: optional_time_column(row, 13)?,
        paused_by: row.get(14)?,
    })
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    let status: String = row.get(3)?;
    let status = PageStatus::from_db_string(&status)
        .ok_or_else(|| conversion_error(3, format!("unknown page status '{}'", status)))?;

    Ok(PageRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        url: row.get(2)?,
        status,
        http_status: row.get(4)?,
        content_type: row.get(5)?,
        title: row.get(6)?,
        content_hash: row.get(7)?,
        content: row.get(8)?,
        error_message: row.get(9)?,
        created_at: time_column(row, 10)?,
        fetched_at: optional_time_column(row, 11)?,
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<ProductRecord> {
    let image_urls: String = row.get(10)?;
    let image_urls: Vec<String> = serde_json::from_str(&image_urls)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

    Ok(ProductRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        page_id: row.get(2)?,
        provider_id: row.get(3)?,
        external_id: row.get(4)?,
        name: row.get(5)?,
        description: row.get(6)?,
        price: row.get(7)?,
        currency: row.get(8)?,
        product_url: row.get(9)?,
        image_urls,
        raw_payload: row.get(11)?,
        created_at: time_column(row, 12)?,
    })
}

fn query_job(conn: &Connection, job_id: i64) -> StorageResult<JobRecord> {
    conn.query_row(
        &format!("SELECT {} FROM crawl_jobs WHERE id = ?1", JOB_COLUMNS),
        params![job_id],
        job_from_row,
    )
    .optional()?
    .ok_or(StorageError::JobNotFound(job_id))
}

/// Builds the error for a page update that matched no row in the expected status
fn page_transition_error(conn: &Connection, page_id: i64, to: PageStatus) -> StorageError {
    let current: rusqlite::Result<Option<String>> = conn
        .query_row(
            "SELECT status FROM crawl_pages WHERE id = ?1",
            params![page_id],
            |row| row.get(0),
        )
        .optional();

    match current {
        Ok(Some(status)) => match PageStatus::from_db_string(&status) {
            Some(from) => StorageError::InvalidPageTransition { page_id, from, to },
            None => StorageError::Database(format!("unknown page status '{}'", status)),
        },
        Ok(None) => StorageError::PageNotFound(page_id),
        Err(e) => e.into(),
    }
}

impl JobStore for SqliteStorage {
    // ===== Provider Management =====

    fn insert_provider(
        &self,
        name: &str,
        crawler_type: &str,
        settings: Option<&str>,
    ) -> StorageResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO providers (name, crawler_type, settings, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, crawler_type, settings, db_time(Utc::now())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_provider(&self, provider_id: i64) -> StorageResult<Option<ProviderRecord>> {
        let conn = self.conn()?;
        let provider = conn
            .query_row(
                "SELECT id, name, crawler_type, settings, created_at FROM providers WHERE id = ?1",
                params![provider_id],
                |row| {
                    Ok(ProviderRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        crawler_type: row.get(2)?,
                        settings: row.get(3)?,
                        created_at: time_column(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(provider)
    }

    // ===== Job Management =====

    fn insert_job(&self, job: &NewJob, now: DateTime<Utc>) -> StorageResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO crawl_jobs (provider_id, start_url, sitemap_url, max_pages, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.provider_id,
                job.start_url,
                job.sitemap_url,
                job.max_pages,
                JobStatus::Queued.to_db_string(),
                db_time(now)
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_job(&self, job_id: i64) -> StorageResult<JobRecord> {
        let conn = self.conn()?;
        query_job(&conn, job_id)
    }

    fn list_jobs(&self, limit: u32) -> StorageResult<Vec<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM crawl_jobs ORDER BY id DESC LIMIT ?1",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![limit], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn claim_next_job(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<Option<JobRecord>> {
        let conn = self.conn()?;
        let now = db_time(now);

        let candidate: Option<(i64, String, Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT id, status, lease_owner, lease_expires_at FROM crawl_jobs
                 WHERE status = ?1
                    OR (status = ?2 AND (lease_expires_at IS NULL OR lease_expires_at < ?3))
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1",
                params![
                    JobStatus::Queued.to_db_string(),
                    JobStatus::Running.to_db_string(),
                    now
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((job_id, prior_status, prior_owner, prior_expiry)) = candidate else {
            return Ok(None);
        };

        // Only succeeds if nobody touched the row since it was read
        let changed = conn.execute(
            "UPDATE crawl_jobs
             SET status = ?1, lease_owner = ?2, lease_expires_at = ?3,
                 started_at = COALESCE(started_at, ?4)
             WHERE id = ?5 AND status = ?6 AND lease_owner IS ?7 AND lease_expires_at IS ?8",
            params![
                JobStatus::Running.to_db_string(),
                worker_id,
                db_time(lease_until),
                now,
                job_id,
                prior_status,
                prior_owner,
                prior_expiry
            ],
        )?;

        if changed == 0 {
            debug!(job_id, worker_id, "Lost claim race");
            return Ok(None);
        }

        query_job(&conn, job_id).map(Some)
    }

    fn extend_lease(
        &self,
        job_id: i64,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE crawl_jobs SET lease_expires_at = ?1
             WHERE id = ?2 AND lease_owner = ?3 AND status = ?4",
            params![
                db_time(lease_until),
                job_id,
                worker_id,
                JobStatus::Running.to_db_string()
            ],
        )?;
        Ok(changed > 0)
    }

    fn release_lease(&self, job_id: i64, worker_id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE crawl_jobs SET lease_owner = NULL, lease_expires_at = NULL
             WHERE id = ?1 AND lease_owner = ?2",
            params![job_id, worker_id],
        )?;
        Ok(changed > 0)
    }

    fn complete_job(
        &self,
        job_id: i64,
        worker_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        if !matches!(status, JobStatus::Succeeded | JobStatus::Failed) {
            return Err(StorageError::InvalidJobTransition {
                job_id,
                from: JobStatus::Running,
                to: status,
            });
        }

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE crawl_jobs
             SET status = ?1, error_message = ?2, completed_at = ?3,
                 lease_owner = NULL, lease_expires_at = NULL
             WHERE id = ?4 AND lease_owner = ?5 AND status = ?6",
            params![
                status.to_db_string(),
                error_message,
                db_time(now),
                job_id,
                worker_id,
                JobStatus::Running.to_db_string()
            ],
        )?;

        if changed == 0 {
            conn.execute(
                "UPDATE crawl_jobs SET lease_owner = NULL, lease_expires_at = NULL
                 WHERE id = ?1 AND lease_owner = ?2",
                params![job_id, worker_id],
            )?;
        }

        Ok(changed > 0)
    }

    fn cancel_job(&self, job_id: i64, now: DateTime<Utc>) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE crawl_jobs
             SET status = ?1, canceled_at = ?2, lease_owner = NULL, lease_expires_at = NULL
             WHERE id = ?3 AND status IN (?4, ?5, ?6)",
            params![
                JobStatus::Canceled.to_db_string(),
                db_time(now),
                job_id,
                JobStatus::Queued.to_db_string(),
                JobStatus::Running.to_db_string(),
                JobStatus::Paused.to_db_string()
            ],
        )?;
        Ok(changed > 0)
    }

    fn pause_job(&self, job_id: i64, admin: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE crawl_jobs SET status = ?1, paused_at = ?2, paused_by = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                JobStatus::Paused.to_db_string(),
                db_time(now),
                admin,
                job_id,
                JobStatus::Running.to_db_string()
            ],
        )?;
        Ok(changed > 0)
    }

    fn resume_job(&self, job_id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE crawl_jobs SET status = ?1, lease_owner = NULL, lease_expires_at = NULL
             WHERE id = ?2 AND status = ?3",
            params![
                JobStatus::Running.to_db_string(),
                job_id,
                JobStatus::Paused.to_db_string()
            ],
        )?;
        Ok(changed > 0)
    }

    // ===== Page Management =====

    fn insert_pages(
        &self,
        job_id: i64,
        urls: &[String],
        cap: Option<u32>,
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = db_time(now);

        let mut tracked: i64 = tx.query_row(
            "SELECT COUNT(*) FROM crawl_pages WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;

        let mut inserted = 0;
        for url in urls {
            if let Some(cap) = cap {
                if tracked >= i64::from(cap) {
                    break;
                }
            }

            let changed = tx.execute(
                "INSERT OR IGNORE INTO crawl_pages (job_id, url, status, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![job_id, url, PageStatus::Queued.to_db_string(), now],
            )?;
            if changed > 0 {
                tracked += 1;
                inserted += 1;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn requeue_interrupted_pages(&self, job_id: i64) -> StorageResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE crawl_pages SET status = ?1 WHERE job_id = ?2 AND status = ?3",
            params![
                PageStatus::Queued.to_db_string(),
                job_id,
                PageStatus::Processing.to_db_string()
            ],
        )?;
        Ok(changed)
    }

    fn next_queued_page(&self, job_id: i64) -> StorageResult<Option<PageRecord>> {
        let conn = self.conn()?;
        let page = conn
            .query_row(
                &format!(
                    "SELECT {} FROM crawl_pages WHERE job_id = ?1 AND status = ?2
                     ORDER BY id ASC LIMIT 1",
                    PAGE_COLUMNS
                ),
                params![job_id, PageStatus::Queued.to_db_string()],
                page_from_row,
            )
            .optional()?;
        Ok(page)
    }

    fn mark_page_processing(&self, page_id: i64) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE crawl_pages SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![
                PageStatus::Processing.to_db_string(),
                page_id,
                PageStatus::Queued.to_db_string()
            ],
        )?;

        if changed == 0 {
            return Err(page_transition_error(&conn, page_id, PageStatus::Processing));
        }
        Ok(())
    }

    fn record_page_success(
        &self,
        page: &PageRecord,
        provider_id: i64,
        fetch: &PageFetch,
        products: &[ProductData],
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = db_time(now);

        let changed = tx.execute(
            "UPDATE crawl_pages
             SET status = ?1, http_status = ?2, content_type = ?3, title = ?4, content_hash = ?5,
                 content = NULL, error_message = NULL, fetched_at = ?6
             WHERE id = ?7 AND status = ?8",
            params![
                PageStatus::Succeeded.to_db_string(),
                fetch.http_status,
                fetch.content_type,
                fetch.title,
                fetch.content_hash,
                now,
                page.id,
                PageStatus::Processing.to_db_string()
            ],
        )?;

        if changed == 0 {
            return Err(page_transition_error(&tx, page.id, PageStatus::Succeeded));
        }

        for product in products {
            let image_urls = serde_json::to_string(&product.image_urls)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            tx.execute(
                "INSERT INTO extracted_products
                 (job_id, page_id, provider_id, external_id, name, description, price, currency,
                  product_url, image_urls, raw_payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    page.job_id,
                    page.id,
                    provider_id,
                    product.external_id,
                    product.name,
                    product.description,
                    product.price,
                    product.currency,
                    product.product_url,
                    image_urls,
                    product.raw.to_string(),
                    now
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn record_page_failure(
        &self,
        page_id: i64,
        fetch: &PageFetch,
        content: Option<&str>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE crawl_pages
             SET status = ?1, http_status = ?2, content_type = ?3, title = ?4, content_hash = ?5,
                 content = ?6, error_message = ?7, fetched_at = ?8
             WHERE id = ?9 AND status = ?10",
            params![
                PageStatus::Failed.to_db_string(),
                fetch.http_status,
                fetch.content_type,
                fetch.title,
                fetch.content_hash,
                content,
                error_message,
                db_time(now),
                page_id,
                PageStatus::Processing.to_db_string()
            ],
        )?;

        if changed == 0 {
            return Err(page_transition_error(&conn, page_id, PageStatus::Failed));
        }
        Ok(())
    }

    fn record_page_skipped(
        &self,
        page_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE crawl_pages SET status = ?1, error_message = ?2, fetched_at = ?3
             WHERE id = ?4 AND status IN (?5, ?6)",
            params![
                PageStatus::Skipped.to_db_string(),
                reason,
                db_time(now),
                page_id,
                PageStatus::Queued.to_db_string(),
                PageStatus::Processing.to_db_string()
            ],
        )?;

        if changed == 0 {
            return Err(page_transition_error(&conn, page_id, PageStatus::Skipped));
        }
        Ok(())
    }

    fn get_page(&self, page_id: i64) -> StorageResult<PageRecord> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM crawl_pages WHERE id = ?1", PAGE_COLUMNS),
            params![page_id],
            page_from_row,
        )
        .optional()?
        .ok_or(StorageError::PageNotFound(page_id))
    }

    fn list_pages(&self, job_id: i64) -> StorageResult<Vec<PageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM crawl_pages WHERE job_id = ?1 ORDER BY id ASC",
            PAGE_COLUMNS
        ))?;
        let pages = stmt
            .query_map(params![job_id], page_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    // ===== Products =====

    fn list_products(&self, job_id: i64) -> StorageResult<Vec<ProductRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM extracted_products WHERE job_id = ?1 ORDER BY id ASC",
            PRODUCT_COLUMNS
        ))?;
        let products = stmt
            .query_map(params![job_id], product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }

    // ===== Statistics =====

    fn count_pages_by_status(&self, job_id: i64) -> StorageResult<HashMap<PageStatus, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM crawl_pages WHERE job_id = ?1 GROUP BY status",
        )?;

        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            if let Some(status) = PageStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    fn distinct_page_errors(&self, job_id: i64) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT error_message FROM crawl_pages
             WHERE job_id = ?1 AND status = ?2 AND error_message IS NOT NULL
             GROUP BY error_message
             ORDER BY MIN(id) ASC",
        )?;
        let errors = stmt
            .query_map(params![job_id, PageStatus::Failed.to_db_string()], |row| {
                row.get(0)
            })?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(errors)
    }

    fn count_products(&self, job_id: i64) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM extracted_products WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
