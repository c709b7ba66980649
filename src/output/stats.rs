//! Job statistics from the job store
//!
//! This module provides functionality for extracting and displaying
//! the progress of one crawl job.

use crate::state::PageStatus;
use crate::storage::{JobRecord, JobStore, StorageResult};
use crate::worker::distinct_errors;
use std::collections::HashMap;
use std::fmt::Write;

/// Statistics for one crawl job
#[derive(Debug, Clone)]
pub struct JobStatistics {
    pub job: JobRecord,

    /// Total number of pages tracked for the job
    pub total_pages: u64,

    /// Count of pages by status; statuses with no pages are absent
    pub pages_by_status: HashMap<PageStatus, u64>,

    /// Number of extracted products recorded
    pub products: u64,

    /// Distinct errors of failed pages, oldest first
    pub page_errors: Vec<String>,
}

impl JobStatistics {
    pub fn count(&self, status: PageStatus) -> u64 {
        self.pages_by_status.get(&status).copied().unwrap_or(0)
    }

    /// Share of attempted pages that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        let succeeded = self.count(PageStatus::Succeeded);
        let attempted = succeeded + self.count(PageStatus::Failed);
        if attempted == 0 {
            0.0
        } else {
            (succeeded as f64 / attempted as f64) * 100.0
        }
    }
}

/// Loads statistics for a job
///
/// # Arguments
///
/// * `store` - Job store to read from
/// * `job_id` - Job to report on
pub fn load_job_statistics(store: &dyn JobStore, job_id: i64) -> StorageResult<JobStatistics> {
    let job = store.get_job(job_id)?;
    let pages_by_status = store.count_pages_by_status(job_id)?;
    let total_pages = pages_by_status.values().sum();
    let products = store.count_products(job_id)?;
    let page_errors = distinct_errors(&store.distinct_page_errors(job_id)?);

    Ok(JobStatistics {
        job,
        total_pages,
        pages_by_status,
        products,
        page_errors,
    })
}

/// Formats statistics as the text printed by `print_job_statistics`
pub fn render_job_statistics(stats: &JobStatistics) -> String {
    let job = &stats.job;
    let mut out = String::new();

    let _ = writeln!(out, "=== Crawl Statistics: job {} ===\n", job.id);

    let _ = writeln!(out, "Job:");
    let _ = writeln!(out, "  Status: {}", job.status);
    let _ = writeln!(out, "  Start URL: {}", job.start_url);
    if let Some(sitemap) = &job.sitemap_url {
        let _ = writeln!(out, "  Sitemap: {}", sitemap);
    }
    if let Some(max_pages) = job.max_pages {
        let _ = writeln!(out, "  Max pages: {}", max_pages);
    }
    let _ = writeln!(out, "  Created: {}", job.created_at.to_rfc3339());
    if let Some(started) = job.started_at {
        let _ = writeln!(out, "  Started: {}", started.to_rfc3339());
    }
    if let Some(completed) = job.completed_at {
        let _ = writeln!(out, "  Completed: {}", completed.to_rfc3339());
    }
    if let Some(canceled) = job.canceled_at {
        let _ = writeln!(out, "  Canceled: {}", canceled.to_rfc3339());
    }
    if let Some(paused) = job.paused_at {
        let by = job.paused_by.as_deref().unwrap_or("unknown");
        let _ = writeln!(out, "  Paused: {} by {}", paused.to_rfc3339(), by);
    }
    if let Some(owner) = &job.lease_owner {
        let expires = job
            .lease_expires_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let _ = writeln!(out, "  Lease: {} (expires {})", owner, expires);
    }
    if let Some(error) = &job.error_message {
        let _ = writeln!(out, "  Error: {}", error);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Pages by Status:");
    for status in PageStatus::all_states() {
        let count = stats.count(status);
        let percentage = if stats.total_pages > 0 {
            (count as f64 / stats.total_pages as f64) * 100.0
        } else {
            0.0
        };
        let _ = writeln!(out, "  {}: {} ({:.1}%)", status, count, percentage);
    }
    let _ = writeln!(out, "  Total: {}", stats.total_pages);
    let _ = writeln!(out);

    if !stats.page_errors.is_empty() {
        let _ = writeln!(out, "Page Errors:");
        for error in &stats.page_errors {
            let _ = writeln!(out, "  - {}", error);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Products extracted: {}", stats.products);
    let _ = write!(
        out,
        "Success Rate: {:.1}% ({} / {} attempted pages succeeded)",
        stats.success_rate(),
        stats.count(PageStatus::Succeeded),
        stats.count(PageStatus::Succeeded) + stats.count(PageStatus::Failed)
    );

    out
}

/// Prints statistics to stdout in a formatted manner
pub fn print_job_statistics(stats: &JobStatistics) {
    println!("{}", render_job_statistics(stats));
}
