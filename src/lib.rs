//! Shelf-Crawler: a distributed crawl-job worker for retailer product listings
//!
//! This crate implements the scheduler and execution engine of a crawler fleet. Workers
//! claim crawl jobs from a shared store through expiring leases, discover the pages of a
//! retailer site, crawl them one by one through a pluggable strategy, and record every
//! extracted product for later catalog import.

pub mod config;
pub mod output;
pub mod pool;
pub mod robots;
pub mod state;
pub mod storage;
pub mod strategy;
pub mod url;
pub mod worker;

use std::error::Error as StdError;
use thiserror::Error;

/// Main error type for Shelf-Crawler operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Resource pool error: {0}")]
    Pool(#[from] pool::PoolError),

    #[error("Discovery failed for {url}: {message}")]
    Discovery { url: String, message: String },

    /// Out-of-memory, stack exhaustion or an equivalent unrecoverable condition
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("{context}: {source}")]
    Strategy {
        context: String,
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Wraps an arbitrary error raised inside a strategy
    pub fn strategy<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Strategy {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Returns true if this error, or any error in its source chain, signals resource
    /// exhaustion. Critical errors abort the whole job instead of failing one page.
    pub fn is_critical(&self) -> bool {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if is_exhaustion(err) {
                return true;
            }
            current = err.source();
        }
        false
    }
}

fn is_exhaustion(err: &(dyn StdError + 'static)) -> bool {
    if let Some(CrawlError::ResourceExhausted(_)) = err.downcast_ref::<CrawlError>() {
        return true;
    }

    if err
        .downcast_ref::<std::collections::TryReserveError>()
        .is_some()
    {
        return true;
    }

    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        if io.kind() == std::io::ErrorKind::OutOfMemory {
            return true;
        }
        // io::Error::source skips the payload itself, so inspect it directly
        if let Some(inner) = io.get_ref() {
            return is_exhaustion(inner);
        }
    }

    false
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("No strategy registered for the fallback crawler type '{0}'")]
    MissingFallbackStrategy(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Shelf-Crawler operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{Config, ProviderSettings};
pub use state::{JobStatus, PageStatus};
pub use url::normalize_url;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_exhausted_is_critical() {
        let err = CrawlError::ResourceExhausted("out of memory".to_string());
        assert!(err.is_critical());
    }

    #[test]
    fn test_wrapped_exhaustion_is_critical() {
        let inner = CrawlError::ResourceExhausted("render heap".to_string());
        let err = CrawlError::strategy("rendering product grid", inner);
        assert!(err.is_critical());
    }

    #[test]
    fn test_io_out_of_memory_is_critical() {
        let io = std::io::Error::new(std::io::ErrorKind::OutOfMemory, "alloc failed");
        assert!(CrawlError::Io(io).is_critical());
    }

    #[test]
    fn test_io_wrapping_exhaustion_is_critical() {
        let io = std::io::Error::new(
            std::io::ErrorKind::Other,
            CrawlError::ResourceExhausted("stack overflow".to_string()),
        );
        assert!(CrawlError::strategy("page script", io).is_critical());
    }

    #[test]
    fn test_try_reserve_failure_is_critical() {
        let mut buffer: Vec<u8> = Vec::new();
        let reserve_err = buffer.try_reserve(usize::MAX).unwrap_err();
        assert!(CrawlError::strategy("buffering body", reserve_err).is_critical());
    }

    #[test]
    fn test_ordinary_errors_are_not_critical() {
        let err = CrawlError::Timeout {
            url: "https://shop.example.com/".to_string(),
        };
        assert!(!err.is_critical());

        let err = CrawlError::strategy("parsing price", "unexpected token");
        assert!(!err.is_critical());
    }
}
