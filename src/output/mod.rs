//! Output module for job reports
//!
//! This module handles:
//! - Per-job statistics (page counts, products, errors)
//! - The compact job listing printed by the `status` command

pub mod stats;

pub use stats::{load_job_statistics, print_job_statistics, render_job_statistics, JobStatistics};

use crate::storage::JobRecord;

/// Formats jobs as a table, one line per job
pub fn render_job_list(jobs: &[JobRecord]) -> String {
    if jobs.is_empty() {
        return "No crawl jobs found".to_string();
    }

    let mut lines = vec![format!(
        "{:>6}  {:<10}  {:>8}  {:<20}  {}",
        "ID", "STATUS", "PROVIDER", "OWNER", "START URL"
    )];

    for job in jobs {
        lines.push(format!(
            "{:>6}  {:<10}  {:>8}  {:<20}  {}",
            job.id,
            job.status.to_db_string(),
            job.provider_id,
            job.lease_owner.as_deref().unwrap_or("-"),
            job.start_url
        ));
    }

    lines.join("\n")
}

/// Prints the job listing to stdout
pub fn print_job_list(jobs: &[JobRecord]) {
    println!("{}", render_job_list(jobs));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JobStore, NewJob, SqliteStorage};
    use chrono::Utc;

    #[test]
    fn test_render_empty_list() {
        assert_eq!(render_job_list(&[]), "No crawl jobs found");
    }

    #[test]
    fn test_render_job_list() {
        let store = SqliteStorage::new_in_memory().unwrap();
        let provider_id = store.insert_provider("Acme", "generic", None).unwrap();
        store
            .insert_job(
                &NewJob {
                    provider_id,
                    start_url: "https://shop.example.com/".to_string(),
                    sitemap_url: None,
                    max_pages: None,
                },
                Utc::now(),
            )
            .unwrap();

        let text = render_job_list(&store.list_jobs(10).unwrap());
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("STATUS"));
        assert!(lines[1].contains("queued"));
        assert!(lines[1].ends_with("https://shop.example.com/"));
    }
}
