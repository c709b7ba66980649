//! Configuration module for Shelf-Crawler
//!
//! Worker processes read a TOML file describing lease timing, the rendering pool and the
//! job store location. Providers carry their own JSON settings, parsed defensively.
//!
//! # Example
//!
//! ```no_run
//! use shelf_crawler::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("worker.toml")).unwrap();
//! println!("Pool size: {}", config.browser.max_contexts);
//! ```

mod parser;
mod provider;
mod types;
mod validation;

// Re-export types
pub use provider::{ProviderSettings, SelectorSettings};
pub use types::{BrowserConfig, Config, StorageConfig, UserAgentConfig, WorkerConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
