//! Lease renewal
//!
//! While a job runs, a background task pushes its lease expiry forward on a fixed
//! interval. Each tick re-reads the job row first: if the job was canceled or another
//! worker owns it, the task cancels the executor's halt token and exits.

use crate::state::JobStatus;
use crate::storage::JobStore;
use crate::worker::lease_until;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a renewal task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalExit {
    /// Stopped by the worker after the job finished
    Stopped,
    /// Another worker owns the job, or it left the Running status
    LeaseLost,
    /// The job was canceled externally
    JobCanceled,
}

pub struct LeaseRenewal;

impl LeaseRenewal {
    /// Spawns the renewal task for a claimed job
    ///
    /// `halt` is cancelled when the job must stop; `stop` ends the task quietly once the
    /// executor is done. Store errors are logged and retried on the next tick.
    pub fn spawn(
        store: Arc<dyn JobStore>,
        job_id: i64,
        worker_id: String,
        lease_duration: Duration,
        interval: Duration,
        halt: CancellationToken,
        stop: CancellationToken,
    ) -> JoinHandle<RenewalExit> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // First tick fires immediately; the claim just set the lease

            loop {
                tokio::select! {
                    _ = stop.cancelled() => return RenewalExit::Stopped,
                    _ = ticker.tick() => {}
                }

                match renew_once(store.as_ref(), job_id, &worker_id, lease_duration) {
                    Ok(None) => {}
                    Ok(Some(exit)) => {
                        info!(job_id, worker_id = %worker_id, exit = ?exit, "Halting job");
                        halt.cancel();
                        return exit;
                    }
                    Err(e) => {
                        warn!(job_id, error = %e, "Lease renewal failed, retrying next tick");
                    }
                }
            }
        })
    }
}

fn renew_once(
    store: &dyn JobStore,
    job_id: i64,
    worker_id: &str,
    lease_duration: Duration,
) -> crate::Result<Option<RenewalExit>> {
    let job = store.get_job(job_id)?;

    match job.status {
        JobStatus::Canceled => return Ok(Some(RenewalExit::JobCanceled)),
        // The executor notices the pause between pages and releases the lease itself
        JobStatus::Paused => return Ok(None),
        _ => {}
    }

    if job.status != JobStatus::Running || job.lease_owner.as_deref() != Some(worker_id) {
        return Ok(Some(RenewalExit::LeaseLost));
    }

    let now = Utc::now();
    if store.extend_lease(job_id, worker_id, lease_until(now, lease_duration))? {
        debug!(job_id, "Lease extended");
        Ok(None)
    } else {
        // Ownership changed between the read and the write
        match store.get_job(job_id)?.status {
            JobStatus::Canceled => Ok(Some(RenewalExit::JobCanceled)),
            JobStatus::Paused => Ok(None),
            _ => Ok(Some(RenewalExit::LeaseLost)),
        }
    }
}
