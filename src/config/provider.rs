//! Per-provider crawl settings
//!
//! Providers carry a JSON settings blob written by the admin side. The worker never
//! fails a job over it: anything missing or malformed falls back to defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Crawl settings attached to one retailer provider
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderSettings {
    /// Pause after every page, success or failure (milliseconds)
    pub request_delay_ms: u64,

    /// Advisory upper bound on parallel requests to the provider
    pub max_concurrency: u32,

    /// Overrides the worker's default user agent
    pub user_agent: Option<String>,

    /// Skip pages disallowed by the site's robots.txt
    pub respect_robots_txt: bool,

    /// CSS selectors used by selector-driven strategies
    pub selectors: SelectorSettings,

    /// Free-form provider-specific settings
    pub custom: HashMap<String, serde_json::Value>,
}

/// CSS selectors locating product data on a listing page
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectorSettings {
    /// One match per product card
    pub product: Option<String>,
    pub name: Option<String>,
    pub price: Option<String>,
    pub currency: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
    pub description: Option<String>,
    /// Link to the next listing page
    pub next_page: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            request_delay_ms: 1_000,
            max_concurrency: 1,
            user_agent: None,
            respect_robots_txt: true,
            selectors: SelectorSettings::default(),
            custom: HashMap::new(),
        }
    }
}

impl ProviderSettings {
    /// Parses a provider settings blob, degrading to defaults on any problem
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::default();
        };

        match serde_json::from_str::<Self>(raw) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed provider settings, using defaults");
                Self::default()
            }
        }
    }

    /// Delay applied between consecutive page fetches
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// User agent for this provider, or the worker default
    pub fn user_agent_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.user_agent
            .as_deref()
            .filter(|ua| !ua.trim().is_empty())
            .unwrap_or(default)
    }

    /// Looks up a string value in the custom settings
    pub fn custom_str(&self, key: &str) -> Option<&str> {
        self.custom.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_settings() {
        let raw = r#"{
            "requestDelayMs": 250,
            "maxConcurrency": 2,
            "userAgent": "RetailBot/2.0",
            "respectRobotsTxt": false,
            "selectors": {"product": ".card", "name": ".card h2", "nextPage": "a.next"},
            "custom": {"currency": "EUR"}
        }"#;

        let settings = ProviderSettings::parse(Some(raw));
        assert_eq!(settings.request_delay_ms, 250);
        assert_eq!(settings.max_concurrency, 2);
        assert_eq!(settings.user_agent.as_deref(), Some("RetailBot/2.0"));
        assert!(!settings.respect_robots_txt);
        assert_eq!(settings.selectors.product.as_deref(), Some(".card"));
        assert_eq!(settings.selectors.next_page.as_deref(), Some("a.next"));
        assert_eq!(settings.custom_str("currency"), Some("EUR"));
    }

    #[test]
    fn test_partial_settings_keep_defaults() {
        let settings = ProviderSettings::parse(Some(r#"{"requestDelayMs": 50}"#));
        assert_eq!(settings.request_delay_ms, 50);
        assert_eq!(settings.max_concurrency, 1);
        assert!(settings.respect_robots_txt);
    }

    #[test]
    fn test_missing_settings_use_defaults() {
        assert_eq!(ProviderSettings::parse(None), ProviderSettings::default());
        assert_eq!(ProviderSettings::parse(Some("  ")), ProviderSettings::default());
    }

    #[test]
    fn test_malformed_settings_use_defaults() {
        assert_eq!(
            ProviderSettings::parse(Some("{not json")),
            ProviderSettings::default()
        );
        assert_eq!(
            ProviderSettings::parse(Some(r#"{"requestDelayMs": "fast"}"#)),
            ProviderSettings::default()
        );
    }

    #[test]
    fn test_user_agent_fallback() {
        let mut settings = ProviderSettings::default();
        assert_eq!(settings.user_agent_or("Default/1.0"), "Default/1.0");

        settings.user_agent = Some(" ".to_string());
        assert_eq!(settings.user_agent_or("Default/1.0"), "Default/1.0");

        settings.user_agent = Some("Custom/1.0".to_string());
        assert_eq!(settings.user_agent_or("Default/1.0"), "Custom/1.0");
    }
}
