//! Sitemap discovery
//!
//! Reads `<loc>` entries from XML sitemaps. A sitemap index is followed one level deep;
//! failures of nested sitemaps are logged and skipped, a failing top-level sitemap fails
//! discovery.

use crate::pool::SessionPool;
use crate::strategy::fetch::pooled_fetch;
use crate::url::normalize_same_site;
use crate::{CrawlError, Result};
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

/// `<loc>` entries of one sitemap document
#[derive(Debug, Default, PartialEq)]
pub struct ParsedSitemap {
    pub page_urls: Vec<String>,
    pub nested_sitemaps: Vec<String>,
}

/// Parses a sitemap or sitemap index
pub fn parse_sitemap(xml: &str) -> ParsedSitemap {
    let document = Html::parse_document(xml);

    let collect = |selector: &str| -> Vec<String> {
        Selector::parse(selector)
            .map(|sel| {
                document
                    .select(&sel)
                    .map(|loc| loc.text().collect::<String>().trim().to_string())
                    .filter(|loc| !loc.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    };

    ParsedSitemap {
        page_urls: collect("urlset url loc"),
        nested_sitemaps: collect("sitemapindex sitemap loc"),
    }
}

/// Start URL plus sitemap entries, normalized, restricted to the start URL's site
pub async fn discover_site_urls(
    pool: &SessionPool,
    start_url: &Url,
    sitemap_url: Option<&Url>,
    user_agent: &str,
) -> Result<Vec<String>> {
    let mut urls = vec![start_url.to_string()];

    if let Some(sitemap_url) = sitemap_url {
        urls.extend(sitemap_urls(pool, sitemap_url, user_agent).await?);
    }

    Ok(normalize_same_site(start_url, urls))
}

/// Collects page URLs from a sitemap, following an index one level deep
pub async fn sitemap_urls(
    pool: &SessionPool,
    sitemap_url: &Url,
    user_agent: &str,
) -> Result<Vec<String>> {
    let top = fetch_sitemap(pool, sitemap_url, user_agent).await?;
    let mut urls = top.page_urls;

    for nested in top.nested_sitemaps {
        let nested_url = match Url::parse(&nested) {
            Ok(url) => url,
            Err(e) => {
                warn!(sitemap = %nested, error = %e, "Skipping unparseable nested sitemap");
                continue;
            }
        };

        match fetch_sitemap(pool, &nested_url, user_agent).await {
            Ok(sitemap) => {
                if !sitemap.nested_sitemaps.is_empty() {
                    debug!(sitemap = %nested_url, "Ignoring sitemap index nested more than one level");
                }
                urls.extend(sitemap.page_urls);
            }
            Err(e) if e.is_critical() => return Err(e),
            Err(e) => warn!(sitemap = %nested_url, error = %e, "Skipping nested sitemap"),
        }
    }

    debug!(sitemap = %sitemap_url, count = urls.len(), "Read sitemap");
    Ok(urls)
}

async fn fetch_sitemap(
    pool: &SessionPool,
    sitemap_url: &Url,
    user_agent: &str,
) -> Result<ParsedSitemap> {
    let page = pooled_fetch(pool, sitemap_url, user_agent)
        .await
        .map_err(|e| {
            if e.is_critical() {
                e
            } else {
                CrawlError::Discovery {
                    url: sitemap_url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

    if !page.is_success() {
        return Err(CrawlError::Discovery {
            url: sitemap_url.to_string(),
            message: format!("HTTP {}", page.status),
        });
    }

    Ok(parse_sitemap(&page.body))
}
