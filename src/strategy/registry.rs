//! Strategy registry
//!
//! Maps crawler type strings to strategies. Lookup is case-insensitive and unknown types
//! fall back to the generic strategy, which therefore must be registered.

use crate::config::Config;
use crate::pool::SessionPool;
use crate::robots::RobotsCache;
use crate::strategy::{CrawlerStrategy, GenericStrategy, SelectorStrategy};
use crate::{ConfigError, ConfigResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Crawler type used when a provider's type is unknown
pub const FALLBACK_CRAWLER_TYPE: &str = GenericStrategy::CRAWLER_TYPE;

pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn CrawlerStrategy>>,
    fallback: Arc<dyn CrawlerStrategy>,
}

impl StrategyRegistry {
    /// Builds a registry from a set of strategies
    ///
    /// Later registrations replace earlier ones with the same type. Fails with
    /// `ConfigError::MissingFallbackStrategy` if no generic strategy is present.
    pub fn new(strategies: Vec<Arc<dyn CrawlerStrategy>>) -> ConfigResult<Self> {
        let mut by_type: HashMap<String, Arc<dyn CrawlerStrategy>> = HashMap::new();

        for strategy in strategies {
            let key = strategy.crawler_type().trim().to_lowercase();
            if by_type.insert(key.clone(), strategy).is_some() {
                warn!(crawler_type = %key, "Strategy registered twice, keeping the last one");
            }
        }

        let fallback = by_type
            .get(FALLBACK_CRAWLER_TYPE)
            .cloned()
            .ok_or_else(|| ConfigError::MissingFallbackStrategy(FALLBACK_CRAWLER_TYPE.to_string()))?;

        Ok(Self {
            strategies: by_type,
            fallback,
        })
    }

    /// Registry with the built-in generic and selector strategies
    pub fn with_defaults(pool: SessionPool, config: &Config) -> ConfigResult<Self> {
        let user_agent = config.user_agent.default.clone();

        let robots_client = reqwest::Client::builder()
            .user_agent(user_agent.as_str())
            .timeout(Duration::from_secs(config.browser.request_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Validation(format!("Failed to build HTTP client: {}", e)))?;
        let robots = Arc::new(RobotsCache::new(robots_client));

        Self::new(vec![
            Arc::new(GenericStrategy::new(
                pool.clone(),
                Arc::clone(&robots),
                user_agent.clone(),
            )),
            Arc::new(SelectorStrategy::new(pool, robots, user_agent)),
        ])
    }

    /// Resolves a crawler type to a strategy, falling back to the generic one
    pub fn resolve(&self, crawler_type: &str) -> Arc<dyn CrawlerStrategy> {
        let key = crawler_type.trim().to_lowercase();

        match self.strategies.get(&key) {
            Some(strategy) => Arc::clone(strategy),
            None => {
                warn!(
                    crawler_type = %crawler_type,
                    fallback = FALLBACK_CRAWLER_TYPE,
                    "Unknown crawler type, using fallback strategy"
                );
                Arc::clone(&self.fallback)
            }
        }
    }

    /// The strategy used when no provider configuration is available
    pub fn fallback(&self) -> Arc<dyn CrawlerStrategy> {
        debug!(crawler_type = FALLBACK_CRAWLER_TYPE, "Using fallback strategy");
        Arc::clone(&self.fallback)
    }

    pub fn contains(&self, crawler_type: &str) -> bool {
        self.strategies
            .contains_key(&crawler_type.trim().to_lowercase())
    }

    /// Registered crawler types, sorted
    pub fn crawler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.strategies.keys().cloned().collect();
        types.sort();
        types
    }
}
