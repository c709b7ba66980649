//! Job executor
//!
//! Runs one claimed job: discovery, the FIFO page loop, and completion. The executor
//! re-reads the job row before every page so that an external cancel or pause, or a lost
//! lease, stops the loop before more work is done. A page fetch that has started always
//! runs to completion and is recorded; halts only take effect between pages.

use crate::config::ProviderSettings;
use crate::state::{JobStatus, PageStatus};
use crate::storage::{JobRecord, JobStore, PageRecord, ProviderRecord, StorageError};
use crate::strategy::{CrawlerStrategy, PageOutcome, StrategyRegistry};
use crate::url::normalize_url;
use crate::worker::summary::{
    build_failure_summary, critical_summary, truncate_message, MAX_SUMMARY_LENGTH,
    NO_PAGES_CRAWLED,
};
use crate::{CrawlError, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// How a job execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The job reached Succeeded or Failed through normal completion
    Completed(JobStatus),
    /// A critical error failed the job immediately
    Aborted,
    /// The job was canceled externally
    Canceled,
    /// The job was paused externally; the lease was released
    Paused,
    /// Another worker owns the job now
    LeaseLost,
    /// Process shutdown stopped the job; the lease was released
    Interrupted,
}

pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    registry: Arc<StrategyRegistry>,
    worker_id: String,
}

/// Everything resolved once per execution
struct JobContext<'a> {
    job: &'a JobRecord,
    strategy: Arc<dyn CrawlerStrategy>,
    settings: ProviderSettings,
    halt: &'a CancellationToken,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<StrategyRegistry>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            worker_id: worker_id.into(),
        }
    }

    /// Executes a job claimed by this worker
    ///
    /// `provider` is the job's provider row, if it exists; without one the fallback
    /// strategy runs with default settings. `halt` stops the job cooperatively.
    ///
    /// # Arguments
    ///
    /// * `job` - The job as claimed, with this worker as lease owner
    /// * `provider` - The job's provider row, if any
    /// * `halt` - Cancelled by lease renewal or process shutdown
    ///
    /// # Returns
    ///
    /// * `Ok(ExecutionOutcome)` - How the job ended for this worker
    /// * `Err(CrawlError)` - A job store failure. The job row is left as it was, so the
    ///   caller should release the lease and let the job be reclaimed.
    pub async fn execute(
        &self,
        job: &JobRecord,
        provider: Option<&ProviderRecord>,
        halt: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let (strategy, settings) = match provider {
            Some(provider) => (
                self.registry.resolve(&provider.crawler_type),
                ProviderSettings::parse(provider.settings.as_deref()),
            ),
            None => {
                warn!(
                    job_id = job.id,
                    provider_id = job.provider_id,
                    "Provider not found, using fallback strategy with default settings"
                );
                (self.registry.fallback(), ProviderSettings::default())
            }
        };

        info!(
            job_id = job.id,
            crawler_type = strategy.crawler_type(),
            start_url = %job.start_url,
            "Executing job"
        );

        let ctx = JobContext {
            job,
            strategy,
            settings,
            halt,
        };

        let requeued = self.store.requeue_interrupted_pages(job.id)?;
        if requeued > 0 {
            info!(job_id = job.id, requeued, "Requeued pages interrupted by a previous run");
        }

        if let Some(outcome) = self.check_halt(job.id, halt)? {
            return Ok(outcome);
        }

        if let Some(outcome) = self.discover(&ctx).await? {
            return Ok(outcome);
        }

        if let Some(outcome) = self.crawl_pages(&ctx).await? {
            return Ok(outcome);
        }

        self.complete(job)
    }

    /// Tracks the discovered URLs as pages; returns an outcome if discovery ended the job
    async fn discover(&self, ctx: &JobContext<'_>) -> Result<Option<ExecutionOutcome>> {
        let job = ctx.job;

        let start_url = match normalize_url(&job.start_url) {
            Ok(url) => url,
            Err(e) => {
                let message = format!("Invalid start URL {}: {}", job.start_url, e);
                return self.fail(job, &message).map(Some);
            }
        };

        let sitemap_url = job
            .sitemap_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| match normalize_url(s) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(job_id = job.id, sitemap = %s, error = %e, "Ignoring invalid sitemap URL");
                    None
                }
            });

        let discovered = tokio::select! {
            biased;
            _ = ctx.halt.cancelled() => return self.check_halt(job.id, ctx.halt),
            result = ctx.strategy.discover_urls(&start_url, sitemap_url.as_ref(), &ctx.settings) => result,
        };

        let urls = match discovered {
            Ok(urls) => urls,
            Err(e) if e.is_critical() => {
                warn!(job_id = job.id, error = %e, "Critical error during discovery");
                return self
                    .abort(job, &critical_summary(&job.start_url, &e))
                    .map(Some);
            }
            Err(e) => {
                let message = match e {
                    CrawlError::Discovery { .. } => e.to_string(),
                    other => format!("Discovery failed: {}", other),
                };
                return self.fail(job, &message).map(Some);
            }
        };

        let mut urls = normalize_all(urls);
        if let Some(max_pages) = job.max_pages {
            urls.truncate(max_pages as usize);
        }

        let inserted = self
            .store
            .insert_pages(job.id, &urls, job.max_pages, Utc::now())?;
        info!(
            job_id = job.id,
            discovered = urls.len(),
            inserted,
            "Discovery complete"
        );

        Ok(None)
    }

    /// Crawls queued pages in creation order until none remain
    async fn crawl_pages(&self, ctx: &JobContext<'_>) -> Result<Option<ExecutionOutcome>> {
        let job = ctx.job;

        loop {
            if let Some(outcome) = self.check_halt(job.id, ctx.halt)? {
                return Ok(Some(outcome));
            }

            let Some(page) = self.store.next_queued_page(job.id)? else {
                return Ok(None);
            };

            self.store.mark_page_processing(page.id)?;
            debug!(job_id = job.id, page_id = page.id, url = %page.url, "Crawling page");

            let result = match Url::parse(&page.url) {
                Ok(url) => ctx.strategy.crawl_page(&url, &ctx.settings).await,
                Err(e) => Err(CrawlError::from(e)),
            };

            match self.record_result(ctx, &page, result) {
                Ok(Some(outcome)) => return Ok(Some(outcome)),
                Ok(None) => {}
                // A worker that reclaimed the job requeued the page under us
                Err(e @ CrawlError::Storage(StorageError::InvalidPageTransition { .. })) => {
                    return match self.check_halt(job.id, ctx.halt)? {
                        Some(outcome) => Ok(Some(outcome)),
                        None => Err(e),
                    };
                }
                Err(e) => return Err(e),
            }

            let delay = ctx.settings.request_delay();
            if !delay.is_zero() {
                tokio::select! {
                    _ = ctx.halt.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Persists one page result; returns an outcome if a critical error ended the job
    fn record_result(
        &self,
        ctx: &JobContext<'_>,
        page: &PageRecord,
        result: Result<PageOutcome>,
    ) -> Result<Option<ExecutionOutcome>> {
        let job = ctx.job;
        let now = Utc::now();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = truncate_message(&e.to_string(), MAX_SUMMARY_LENGTH);
                self.store
                    .record_page_failure(page.id, &Default::default(), None, &message, now)?;

                if e.is_critical() {
                    warn!(job_id = job.id, page_id = page.id, error = %e, "Critical error, aborting job");
                    return self.abort(job, &critical_summary(&page.url, &e)).map(Some);
                }

                warn!(job_id = job.id, page_id = page.id, error = %e, "Page crawl error");
                return Ok(None);
            }
        };

        if let Some(reason) = outcome.skip_reason.as_deref() {
            debug!(job_id = job.id, page_id = page.id, reason, "Page skipped");
            self.store.record_page_skipped(page.id, reason, now)?;
            return Ok(None);
        }

        let fetch = outcome.fetch_metadata();

        if outcome.success {
            self.store.record_page_success(
                page,
                job.provider_id,
                &fetch,
                &outcome.products,
                now,
            )?;

            let discovered = normalize_all(outcome.discovered_urls);
            let queued = if discovered.is_empty() {
                0
            } else {
                self.store
                    .insert_pages(job.id, &discovered, job.max_pages, now)?
            };

            debug!(
                job_id = job.id,
                page_id = page.id,
                products = outcome.products.len(),
                queued,
                "Page succeeded"
            );
        } else {
            let error = outcome.error.as_deref().unwrap_or("Unknown error");
            warn!(job_id = job.id, page_id = page.id, error, "Page failed");
            self.store.record_page_failure(
                page.id,
                &fetch,
                outcome.content.as_deref(),
                &truncate_message(error, MAX_SUMMARY_LENGTH),
                now,
            )?;
        }

        Ok(None)
    }

    /// Writes the final status from the job's page counts
    fn complete(&self, job: &JobRecord) -> Result<ExecutionOutcome> {
        let counts = self.store.count_pages_by_status(job.id)?;
        let succeeded = counts.get(&PageStatus::Succeeded).copied().unwrap_or(0);
        let failed = counts.get(&PageStatus::Failed).copied().unwrap_or(0);

        if succeeded + failed == 0 {
            return self.fail(job, NO_PAGES_CRAWLED);
        }

        if succeeded == 0 {
            let errors = self.store.distinct_page_errors(job.id)?;
            return self.fail(job, &build_failure_summary(failed, &errors));
        }

        info!(job_id = job.id, succeeded, failed, "Job succeeded");
        self.finish(job, JobStatus::Succeeded, None)
    }

    fn fail(&self, job: &JobRecord, message: &str) -> Result<ExecutionOutcome> {
        warn!(job_id = job.id, error = message, "Job failed");
        self.finish(job, JobStatus::Failed, Some(message))
    }

    /// Fails the job at once; a job this worker no longer owns is left alone
    fn abort(&self, job: &JobRecord, message: &str) -> Result<ExecutionOutcome> {
        Ok(match self.finish(job, JobStatus::Failed, Some(message))? {
            ExecutionOutcome::Completed(_) => ExecutionOutcome::Aborted,
            other => other,
        })
    }

    fn finish(
        &self,
        job: &JobRecord,
        status: JobStatus,
        message: Option<&str>,
    ) -> Result<ExecutionOutcome> {
        if self
            .store
            .complete_job(job.id, &self.worker_id, status, message, Utc::now())?
        {
            return Ok(ExecutionOutcome::Completed(status));
        }

        // Someone changed the status or took the lease first; theirs stands
        let outcome = match self.store.get_job(job.id)?.status {
            JobStatus::Canceled => ExecutionOutcome::Canceled,
            JobStatus::Paused => ExecutionOutcome::Paused,
            _ => ExecutionOutcome::LeaseLost,
        };
        warn!(job_id = job.id, worker_id = %self.worker_id, outcome = ?outcome, "Job not completed");
        Ok(outcome)
    }

    /// Decides whether the job must stop, from the job row and the halt token
    ///
    /// Only called between pages, so no page of this job is in Processing. A pause or
    /// shutdown releases the lease so any worker can pick the job up later.
    fn check_halt(
        &self,
        job_id: i64,
        halt: &CancellationToken,
    ) -> Result<Option<ExecutionOutcome>> {
        let current = self.store.get_job(job_id)?;

        let outcome = match current.status {
            JobStatus::Canceled => ExecutionOutcome::Canceled,
            JobStatus::Paused => ExecutionOutcome::Paused,
            JobStatus::Running if current.lease_owner.as_deref() == Some(self.worker_id.as_str()) => {
                if !halt.is_cancelled() {
                    return Ok(None);
                }
                ExecutionOutcome::Interrupted
            }
            _ => ExecutionOutcome::LeaseLost,
        };

        if matches!(
            outcome,
            ExecutionOutcome::Paused | ExecutionOutcome::Interrupted
        ) {
            self.store.release_lease(job_id, &self.worker_id)?;
        }

        info!(job_id, worker_id = %self.worker_id, outcome = ?outcome, "Job halted");
        Ok(Some(outcome))
    }
}

/// Normalizes URLs, dropping invalid ones and duplicates while keeping order
fn normalize_all(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter_map(|raw| match normalize_url(&raw) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                debug!(url = %raw, error = %e, "Dropping invalid URL");
                None
            }
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
