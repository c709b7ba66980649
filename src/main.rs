//! Shelf-Crawler main entry point
//!
//! This is the command-line interface for a crawl worker and for the small set of
//! job control operations an operator needs alongside it.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use shelf_crawler::config::{load_config_with_hash, Config};
use shelf_crawler::output::{load_job_statistics, print_job_list, print_job_statistics};
use shelf_crawler::pool::{HttpSessionEngine, SessionPool};
use shelf_crawler::storage::{open_storage, JobStore, NewJob, SqliteStorage};
use shelf_crawler::strategy::StrategyRegistry;
use shelf_crawler::url::normalize_url;
use shelf_crawler::worker::{Worker, WorkerSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Shelf-Crawler: a distributed crawl worker for retailer product listings
///
/// Workers share one job store. Each claims crawl jobs through expiring leases,
/// crawls the retailer site page by page and records the extracted products.
#[derive(Parser, Debug)]
#[command(name = "shelf-crawler")]
#[command(version)]
#[command(about = "Distributed crawl worker for retailer product listings", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "shelf-crawler.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker loop until interrupted
    Run,

    /// Register a retailer provider
    AddProvider {
        /// Display name of the provider
        #[arg(long)]
        name: String,

        /// Crawler type used to pick a strategy
        #[arg(long, default_value = "generic")]
        crawler_type: String,

        /// JSON settings blob (request delay, user agent, selectors, ...)
        #[arg(long)]
        settings: Option<String>,
    },

    /// Queue a crawl job for a provider
    Enqueue {
        #[arg(long)]
        provider: i64,

        /// URL the crawl starts from
        #[arg(long)]
        start_url: String,

        /// Sitemap used for discovery
        #[arg(long)]
        sitemap_url: Option<String>,

        /// Upper bound on pages tracked for the job
        #[arg(long)]
        max_pages: Option<u32>,
    },

    /// Cancel a queued, running or paused job
    Cancel { job_id: i64 },

    /// Pause a running job
    Pause {
        job_id: i64,

        /// Who is pausing the job
        #[arg(long, default_value = "admin")]
        by: String,
    },

    /// Resume a paused job
    Resume { job_id: i64 },

    /// Show one job's statistics, or list recent jobs
    Status {
        job_id: Option<i64>,

        /// Number of jobs to list
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let storage = open_storage(Path::new(&config.storage.database_path))
        .with_context(|| format!("Failed to open job store {}", config.storage.database_path))?;

    match cli.command {
        Command::Run => handle_run(config, storage).await,
        Command::AddProvider {
            name,
            crawler_type,
            settings,
        } => handle_add_provider(&storage, &name, &crawler_type, settings.as_deref()),
        Command::Enqueue {
            provider,
            start_url,
            sitemap_url,
            max_pages,
        } => handle_enqueue(&storage, provider, start_url, sitemap_url, max_pages),
        Command::Cancel { job_id } => {
            report(storage.cancel_job(job_id, Utc::now())?, job_id, "canceled")
        }
        Command::Pause { job_id, by } => {
            report(storage.pause_job(job_id, &by, Utc::now())?, job_id, "paused")
        }
        Command::Resume { job_id } => report(storage.resume_job(job_id)?, job_id, "resumed"),
        Command::Status { job_id, limit } => handle_status(&storage, job_id, limit),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shelf_crawler=info,warn"),
            1 => EnvFilter::new("shelf_crawler=debug,info"),
            2 => EnvFilter::new("shelf_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Runs the worker until Ctrl-C, then releases the rendering pool
async fn handle_run(config: Config, storage: SqliteStorage) -> anyhow::Result<()> {
    let pool = SessionPool::new(
        HttpSessionEngine::new(
            config.user_agent.default.clone(),
            Duration::from_secs(config.browser.request_timeout_secs),
        ),
        config.browser.max_contexts as usize,
    );

    // A registry without the fallback strategy must stop us before any claim
    let registry = StrategyRegistry::with_defaults(pool.clone(), &config)
        .context("Failed to build strategy registry")?;
    tracing::info!("Registered crawler types: {}", registry.crawler_types().join(", "));

    let settings = WorkerSettings::from_config(&config.worker);
    let worker = Worker::new(Arc::new(storage), Arc::new(registry), settings);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown requested, finishing current page"),
                Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
            }
            shutdown.cancel();
        });
    }

    worker.run(shutdown).await;
    pool.close().await;

    tracing::info!("Worker {} exited", worker.worker_id());
    Ok(())
}

fn handle_add_provider(
    storage: &SqliteStorage,
    name: &str,
    crawler_type: &str,
    settings: Option<&str>,
) -> anyhow::Result<()> {
    if let Some(settings) = settings {
        serde_json::from_str::<serde_json::Value>(settings)
            .context("Provider settings must be valid JSON")?;
    }

    let id = storage.insert_provider(name, crawler_type, settings)?;
    println!("Provider {} registered (id {}, crawler type {})", name, id, crawler_type);
    Ok(())
}

fn handle_enqueue(
    storage: &SqliteStorage,
    provider_id: i64,
    start_url: String,
    sitemap_url: Option<String>,
    max_pages: Option<u32>,
) -> anyhow::Result<()> {
    normalize_url(&start_url).with_context(|| format!("Invalid start URL {}", start_url))?;
    if let Some(sitemap) = &sitemap_url {
        normalize_url(sitemap).with_context(|| format!("Invalid sitemap URL {}", sitemap))?;
    }
    if max_pages == Some(0) {
        bail!("--max-pages must be at least 1");
    }
    if storage.get_provider(provider_id)?.is_none() {
        tracing::warn!(
            "Provider {} does not exist; the job will use the generic strategy",
            provider_id
        );
    }

    let job_id = storage.insert_job(
        &NewJob {
            provider_id,
            start_url,
            sitemap_url,
            max_pages,
        },
        Utc::now(),
    )?;
    println!("Job {} queued", job_id);
    Ok(())
}

fn handle_status(storage: &SqliteStorage, job_id: Option<i64>, limit: u32) -> anyhow::Result<()> {
    match job_id {
        Some(job_id) => {
            let stats = load_job_statistics(storage, job_id)?;
            print_job_statistics(&stats);
        }
        None => print_job_list(&storage.list_jobs(limit)?),
    }
    Ok(())
}

fn report(changed: bool, job_id: i64, action: &str) -> anyhow::Result<()> {
    if !changed {
        bail!("Job {} could not be {} in its current status", job_id, action);
    }
    println!("Job {} {}", job_id, action);
    Ok(())
}
