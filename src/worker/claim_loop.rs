//! Job claim loop
//!
//! Polls the job store for the oldest eligible job, claims it with a lease and runs it.
//! Losing a claim race or finding nothing both mean "no job this iteration". Store
//! failures are logged and answered with a longer back-off; they never end the loop.

use crate::storage::{JobRecord, JobStore};
use crate::strategy::StrategyRegistry;
use crate::worker::{ExecutionOutcome, JobExecutor, LeaseRenewal, RenewalExit, WorkerSettings};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Worker {
    store: Arc<dyn JobStore>,
    executor: JobExecutor,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<StrategyRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        let executor = JobExecutor::new(Arc::clone(&store), registry, settings.worker_id.clone());
        Self {
            store,
            executor,
            settings,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    /// Runs the claim loop until `shutdown` is cancelled
    ///
    /// A job in progress is halted between pages and its lease released.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.settings.worker_id,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            lease_secs = self.settings.lease_duration.as_secs(),
            "Worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let delay = match self.try_claim_and_process_one_job(&shutdown).await {
                Ok(true) => continue,
                Ok(false) => self.settings.poll_interval,
                Err(e) => {
                    error!(worker_id = %self.settings.worker_id, error = %e, "Job store error, backing off");
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(worker_id = %self.settings.worker_id, "Worker stopped");
    }

    /// Claims one job and runs it to an outcome
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - A job was claimed and processed
    /// * `Ok(false)` - No job was claimable, or another worker won the claim
    /// * `Err(CrawlError)` - The job store failed; any claimed lease was released
    pub async fn try_claim_and_process_one_job(&self, shutdown: &CancellationToken) -> Result<bool> {
        let now = Utc::now();
        let Some(job) = self.store.claim_next_job(
            &self.settings.worker_id,
            now,
            self.settings.lease_until(now),
        )?
        else {
            debug!(worker_id = %self.settings.worker_id, "No job available");
            return Ok(false);
        };

        info!(
            job_id = job.id,
            worker_id = %self.settings.worker_id,
            provider_id = job.provider_id,
            "Claimed job"
        );

        if let Err(e) = self.process(&job, shutdown).await {
            // Let another worker (or this one) pick the job up again
            if let Err(release_err) = self.store.release_lease(job.id, &self.settings.worker_id) {
                warn!(job_id = job.id, error = %release_err, "Failed to release lease");
            }
            return Err(e);
        }

        Ok(true)
    }

    async fn process(&self, job: &JobRecord, shutdown: &CancellationToken) -> Result<ExecutionOutcome> {
        let provider = self.store.get_provider(job.provider_id)?;

        let halt = shutdown.child_token();
        let stop_renewal = CancellationToken::new();
        let renewal = LeaseRenewal::spawn(
            Arc::clone(&self.store),
            job.id,
            self.settings.worker_id.clone(),
            self.settings.lease_duration,
            self.settings.renewal_interval,
            halt.clone(),
            stop_renewal.clone(),
        );

        let outcome = self.executor.execute(job, provider.as_ref(), &halt).await;

        stop_renewal.cancel();
        let renewal_exit = match renewal.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(job_id = job.id, error = %e, "Lease renewal task failed");
                RenewalExit::Stopped
            }
        };

        let outcome = outcome?;
        info!(
            job_id = job.id,
            outcome = ?outcome,
            renewal = ?renewal_exit,
            "Job finished"
        );
        Ok(outcome)
    }
}
