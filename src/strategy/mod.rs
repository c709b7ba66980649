//! Crawler strategies
//!
//! A strategy knows how to discover the pages of a retailer site and how to crawl one
//! page into products. Providers name their strategy through a crawler type string that
//! the `StrategyRegistry` resolves, falling back to the generic strategy.
//!
//! # Components
//!
//! - `CrawlerStrategy`: the trait every strategy implements
//! - `GenericStrategy`: sitemap discovery plus JSON-LD product extraction
//! - `SelectorStrategy`: product cards located by provider CSS selectors
//! - `StrategyRegistry`: case-insensitive lookup with generic fallback

mod extract;
mod fetch;
mod generic;
mod registry;
mod selector;
mod sitemap;

pub use extract::{
    extract_json_ld_products, extract_links, extract_next_page, extract_selector_products,
    extract_title, parse_price, resolve_link,
};
pub use fetch::{content_hash, fetch_page, pooled_fetch, FetchedPage};
pub use generic::GenericStrategy;
pub use registry::{StrategyRegistry, FALLBACK_CRAWLER_TYPE};
pub use selector::SelectorStrategy;
pub use sitemap::{discover_site_urls, parse_sitemap, sitemap_urls, ParsedSitemap};

use crate::config::ProviderSettings;
use crate::storage::{PageFetch, ProductData};
use crate::Result;
use async_trait::async_trait;
use url::Url;

/// Result of crawling one page
///
/// An `Err` from `crawl_page` means the strategy itself broke; a page that was fetched
/// but turned out unusable (HTTP error, wrong content type) is an outcome with
/// `success == false`.
#[derive(Debug, Clone, Default)]
pub struct PageOutcome {
    pub success: bool,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub content_hash: Option<String>,
    /// Raw body; persisted only when the page fails
    pub content: Option<String>,
    pub products: Vec<ProductData>,
    pub discovered_urls: Vec<String>,
    pub error: Option<String>,
    /// Set when the page was deliberately not fetched
    pub skip_reason: Option<String>,
}

impl PageOutcome {
    /// Outcome for a page that was never fetched
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skip_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Outcome for a fetched page that could not be used
    pub fn failed(page: &FetchedPage, error: impl Into<String>) -> Self {
        Self {
            success: false,
            http_status: Some(page.status),
            content_type: page.content_type.clone(),
            content_hash: Some(content_hash(&page.body)),
            content: Some(page.body.clone()),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    /// Fetch metadata to record on the page row
    pub fn fetch_metadata(&self) -> PageFetch {
        PageFetch {
            http_status: self.http_status,
            content_type: self.content_type.clone(),
            title: self.title.clone(),
            content_hash: self.content_hash.clone(),
        }
    }
}

/// A pluggable crawl strategy
#[async_trait]
pub trait CrawlerStrategy: Send + Sync {
    /// Crawler type this strategy is registered under
    fn crawler_type(&self) -> &str;

    /// Returns the URLs a job should crawl, starting from its start URL and sitemap
    async fn discover_urls(
        &self,
        start_url: &Url,
        sitemap_url: Option<&Url>,
        settings: &ProviderSettings,
    ) -> Result<Vec<String>>;

    /// Fetches one page and extracts its products and follow-up URLs
    ///
    /// Strategies that lease pool contexts must return them before this resolves, on
    /// every path.
    async fn crawl_page(&self, url: &Url, settings: &ProviderSettings) -> Result<PageOutcome>;
}
