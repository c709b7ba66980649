//! Generic crawl strategy
//!
//! Works on any retailer that publishes schema.org JSON-LD: discovery reads the start
//! URL and the sitemap, each page yields its JSON-LD products and same-site links.

use crate::config::ProviderSettings;
use crate::pool::SessionPool;
use crate::robots::RobotsCache;
use crate::strategy::extract::{extract_json_ld_products, extract_links, extract_title};
use crate::strategy::fetch::{content_hash, pooled_fetch, FetchedPage};
use crate::strategy::sitemap::discover_site_urls;
use crate::strategy::{CrawlerStrategy, PageOutcome};
use crate::url::normalize_same_site;
use crate::Result;
use async_trait::async_trait;
use scraper::Html;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub struct GenericStrategy {
    pool: SessionPool,
    robots: Arc<RobotsCache>,
    default_user_agent: String,
}

impl GenericStrategy {
    pub const CRAWLER_TYPE: &'static str = "generic";

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
impl CrawlerStrategy for GenericStrategy {
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
            debug!(url = %url, "Disallowed by robots.txt");
            return Ok(PageOutcome::skipped("Disallowed by robots.txt"));
        }

        let page = pooled_fetch(&self.pool, url, user_agent).await?;
        Ok(analyze_page(&page, url))
    }
}

/// Turns a fetched page into an outcome: title, JSON-LD products, same-site links
fn analyze_page(page: &FetchedPage, requested: &Url) -> PageOutcome {
    if !page.is_success() {
        return PageOutcome::failed(page, format!("HTTP {}", page.status));
    }
    if !page.is_html() {
        return PageOutcome::failed(
            page,
            format!(
                "Unsupported content type: {}",
                page.content_type.as_deref().unwrap_or("unknown")
            ),
        );
    }

    let document = Html::parse_document(&page.body);
    let links = extract_links(&document, &page.final_url);

    PageOutcome {
        success: true,
        http_status: Some(page.status),
        content_type: page.content_type.clone(),
        title: extract_title(&document),
        content_hash: Some(content_hash(&page.body)),
        content: None,
        products: extract_json_ld_products(&document, &page.final_url),
        discovered_urls: normalize_same_site(requested, links),
        error: None,
        skip_reason: None,
    }
}
