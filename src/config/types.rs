use serde::Deserialize;

/// Main configuration structure for a Shelf-Crawler worker process
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    pub storage: StorageConfig,
}

/// Job claiming and lease configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Stable lease-owner identity; generated from the host name when absent
    #[serde(rename = "worker-id", default)]
    pub worker_id: Option<String>,

    /// Delay between claim attempts when no job is available (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay after a job store failure while polling (milliseconds)
    #[serde(rename = "error-backoff-ms", default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// How long a claim stays valid without renewal (seconds)
    #[serde(rename = "lease-duration-secs", default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    /// Renewal interval as a fraction of the lease duration
    #[serde(rename = "lease-renewal-factor", default = "default_lease_renewal_factor")]
    pub lease_renewal_factor: f64,
}

/// Rendering context pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Maximum number of concurrently leased rendering contexts
    #[serde(rename = "max-contexts", default = "default_max_contexts")]
    pub max_contexts: u32,

    /// Per-request timeout for page fetches (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// User agent sent when a provider does not configure its own
    #[serde(default = "default_user_agent")]
    pub default: String,
}

/// Job store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file shared by the worker fleet
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_error_backoff_ms() -> u64 {
    30_000
}

fn default_lease_duration_secs() -> u64 {
    300
}

fn default_lease_renewal_factor() -> f64 {
    0.4
}

fn default_max_contexts() -> u32 {
    4
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("ShelfCrawler/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            lease_duration_secs: default_lease_duration_secs(),
            lease_renewal_factor: default_lease_renewal_factor(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            max_contexts: default_max_contexts(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            default: default_user_agent(),
        }
    }
}
