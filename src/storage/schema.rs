//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the crawl job store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Retailer providers and their crawler configuration
CREATE TABLE IF NOT EXISTS providers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    crawler_type TEXT NOT NULL,
    settings TEXT,
    created_at TEXT NOT NULL
);

-- Crawl jobs; status and lease columns are the fleet's coordination point
CREATE TABLE IF NOT EXISTS crawl_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL,
    start_url TEXT NOT NULL,
    sitemap_url TEXT,
    max_pages INTEGER,
    status TEXT NOT NULL,
    lease_owner TEXT,
    lease_expires_at TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    canceled_at TEXT,
    paused_at TEXT,
    paused_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawl_jobs_claim ON crawl_jobs(status, created_at);

-- Pages within a job's scope; a URL is tracked at most once per job
CREATE TABLE IF NOT EXISTS crawl_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES crawl_jobs(id),
    url TEXT NOT NULL,
    status TEXT NOT NULL,
    http_status INTEGER,
    content_type TEXT,
    title TEXT,
    content_hash TEXT,
    content TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    fetched_at TEXT,
    UNIQUE(job_id, url)
);

CREATE INDEX IF NOT EXISTS idx_crawl_pages_job_status ON crawl_pages(job_id, status, id);

-- Append-only audit trail of parsed products
CREATE TABLE IF NOT EXISTS extracted_products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES crawl_jobs(id),
    page_id INTEGER NOT NULL REFERENCES crawl_pages(id),
    provider_id INTEGER NOT NULL,
    external_id TEXT,
    name TEXT NOT NULL,
    description TEXT,
    price REAL,
    currency TEXT,
    product_url TEXT,
    image_urls TEXT NOT NULL,
    raw_payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_extracted_products_job ON extracted_products(job_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
