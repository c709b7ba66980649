//! Job worker
//!
//! A worker process runs one claim loop. Each iteration claims the oldest eligible crawl
//! job through a lease, runs it to completion with a concurrent lease renewal task, and
//! goes back to polling.
//!
//! # Architecture
//!
//! ```text
//! Worker (claim loop)
//!     │
//!     ├─► JobStore::claim_next_job (compare-and-set lease)
//!     ├─► LeaseRenewal (extends the lease, halts on cancel / lease loss)
//!     └─► JobExecutor
//!             ├─► discovery (strategy.discover_urls)
//!             ├─► page loop (strategy.crawl_page, FIFO)
//!             └─► completion (Succeeded / Failed + summary)
//! ```
//!
//! Halting is cooperative: the claim loop hands the executor a child of the process
//! shutdown token, which the renewal task also cancels when the job is canceled or the
//! lease is lost.

mod claim_loop;
mod executor;
mod lease;
mod summary;

#[cfg(test)]
pub(crate) mod testing;

pub use claim_loop::Worker;
pub use executor::{ExecutionOutcome, JobExecutor};
pub use lease::{LeaseRenewal, RenewalExit};
pub use summary::{
    build_failure_summary, critical_summary, distinct_errors, truncate_message,
    MAX_DISTINCT_ERRORS, MAX_ERROR_LENGTH, MAX_SUMMARY_LENGTH, NO_PAGES_CRAWLED,
};

use crate::config::WorkerConfig;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Runtime settings for one worker process
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Lease owner identity written on claimed jobs
    pub worker_id: String,
    /// Sleep between claim attempts when no job is available
    pub poll_interval: Duration,
    /// Sleep after a job store failure
    pub error_backoff: Duration,
    /// How long a claim or renewal keeps the lease
    pub lease_duration: Duration,
    /// How often the lease is renewed; always shorter than `lease_duration`
    pub renewal_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        let lease_duration = Duration::from_secs(config.lease_duration_secs);

        Self {
            worker_id: config
                .worker_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(default_worker_id),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
            lease_duration,
            renewal_interval: lease_duration.mul_f64(config.lease_renewal_factor),
        }
    }

    /// Lease expiry for a claim or renewal made at `now`
    pub fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        lease_until(now, self.lease_duration)
    }
}

pub(crate) fn lease_until(now: DateTime<Utc>, lease_duration: Duration) -> DateTime<Utc> {
    let lease = chrono::Duration::from_std(lease_duration)
        .unwrap_or_else(|_| chrono::Duration::days(365));
    now + lease
}

/// Host name plus a random suffix, stable for the life of the process
pub fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "worker".to_string());

    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}
