//! Selector-driven crawl strategy
//!
//! For retailers without structured data: product cards are located with CSS selectors
//! from the provider settings, and only next-page links are followed.

use crate::config::{ProviderSettings, SelectorSettings};
use crate::pool::SessionPool;
use crate::robots::RobotsCache;
use crate::strategy::extract::{extract_next_page, extract_selector_products, extract_title};
use crate::strategy::fetch::{content_hash, pooled_fetch, FetchedPage};
use crate::strategy::sitemap::discover_site_urls;
use crate::strategy::{CrawlerStrategy, PageOutcome};
use crate::url::normalize_same_site;
use crate::Result;
use async_trait::async_trait;
use scraper::Html;
use std::sync::Arc;
use url::Url;

pub struct SelectorStrategy {
    pool: SessionPool,
    robots: Arc<RobotsCache>,
    default_user_agent: String,
}

impl SelectorStrategy {
    pub const CRAWLER_TYPE: &'static str = "selector";

    pub fn new(
        pool: SessionPool,
        robots: Arc<RobotsCache>,
        default_user_agent: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            robots,
            default_user_agent: default_user_agent.into(),
        }
    }
}

#[async_trait]
impl CrawlerStrategy for SelectorStrategy {
    fn crawler_type(&self) -> &str {
        Self::CRAWLER_TYPE
    }

    async fn discover_urls(
        &self,
        start_url: &Url,
        sitemap_url: Option<&Url>,
        settings: &ProviderSettings,
    ) -> Result<Vec<String>> {
        let user_agent = settings.user_agent_or(&self.default_user_agent);
        discover_site_urls(&self.pool, start_url, sitemap_url, user_agent).await
    }

    async fn crawl_page(&self, url: &Url, settings: &ProviderSettings) -> Result<PageOutcome> {
        let user_agent = settings.user_agent_or(&self.default_user_agent);

        if settings.respect_robots_txt && !self.robots.is_allowed(url, user_agent).await {
            return Ok(PageOutcome::skipped("Disallowed by robots.txt"));
        }

        let page = pooled_fetch(&self.pool, url, user_agent).await?;
        Ok(analyze_listing(&page, url, &settings.selectors))
    }
}

fn analyze_listing(page: &FetchedPage, requested: &Url, selectors: &SelectorSettings) -> PageOutcome {
    if !page.is_success() {
        return PageOutcome::failed(page, format!("HTTP {}", page.status));
    }
    if !page.is_html() {
        return PageOutcome::failed(page, "Unsupported content type");
    }

    let document = Html::parse_document(&page.body);

    let products = match extract_selector_products(&document, &page.final_url, selectors) {
        Ok(products) => products,
        Err(e) => return PageOutcome::failed(page, e),
    };

    let next_page = match selectors.next_page.as_deref() {
        Some(selector) => match extract_next_page(&document, &page.final_url, selector) {
            Ok(next) => next,
            Err(e) => return PageOutcome::failed(page, e),
        },
        None => None,
    };

    PageOutcome {
        success: true,
        http_status: Some(page.status),
        content_type: page.content_type.clone(),
        title: extract_title(&document),
        content_hash: Some(content_hash(&page.body)),
        content: None,
        products,
        discovered_urls: normalize_same_site(requested, next_page),
        error: None,
        skip_reason: None,
    }
}
