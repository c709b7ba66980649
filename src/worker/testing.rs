//! Test doubles for the worker: a scripted strategy and store fixtures

use crate::config::ProviderSettings;
use crate::storage::{JobRecord, JobStore, NewJob, ProductData, SqliteStorage};
use crate::strategy::{CrawlerStrategy, PageOutcome, StrategyRegistry};
use crate::{CrawlError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// What the scripted strategy does for one URL
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeeds with this many products and these discovered links
    Succeed {
        products: usize,
        links: Vec<&'static str>,
    },
    /// Returns a failed outcome with this error
    Fail(&'static str),
    /// Returns an ordinary error
    Error(&'static str),
    /// Returns a resource exhaustion error
    Exhausted,
    Skip(&'static str),
}

type Hook = Box<dyn Fn(&str) + Send + Sync>;

/// Strategy registered as "generic" whose behavior is scripted per URL
///
/// Unscripted URLs succeed with no products.
pub struct ScriptedStrategy {
    discovered: Vec<String>,
    discovery_error: Option<&'static str>,
    scripts: HashMap<String, Script>,
    hook: Option<Hook>,
    latency: Option<Duration>,
    crawled: Mutex<Vec<String>>,
}

impl ScriptedStrategy {
    pub fn new(discovered: &[&str]) -> Self {
        Self {
            discovered: discovered.iter().map(|u| u.to_string()).collect(),
            discovery_error: None,
            scripts: HashMap::new(),
            hook: None,
            latency: None,
            crawled: Mutex::new(Vec::new()),
        }
    }

    pub fn script(mut self, url: &str, script: Script) -> Self {
        self.scripts.insert(url.to_string(), script);
        self
    }

    pub fn failing_discovery(mut self, error: &'static str) -> Self {
        self.discovery_error = Some(error);
        self
    }

    /// Runs `hook` with the URL before each page is crawled
    pub fn on_crawl(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Makes every page fetch take `latency`
    pub fn slow(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn crawled(&self) -> Vec<String> {
        self.crawled.lock().unwrap().clone()
    }
}

pub fn product(name: &str) -> ProductData {
    ProductData {
        external_id: Some(name.to_string()),
        name: name.to_string(),
        description: None,
        price: Some(10.0),
        currency: Some("EUR".to_string()),
        product_url: None,
        image_urls: Vec::new(),
        raw: serde_json::json!({ "name": name }),
    }
}

#[async_trait]
impl CrawlerStrategy for ScriptedStrategy {
    fn crawler_type(&self) -> &str {
        "generic"
    }

    async fn discover_urls(
        &self,
        _start_url: &Url,
        _sitemap_url: Option<&Url>,
        _settings: &ProviderSettings,
    ) -> Result<Vec<String>> {
        if let Some(error) = self.discovery_error {
            return Err(CrawlError::Discovery {
                url: "https://shop.example.com/sitemap.xml".to_string(),
                message: error.to_string(),
            });
        }
        Ok(self.discovered.clone())
    }

    async fn crawl_page(&self, url: &Url, _settings: &ProviderSettings) -> Result<PageOutcome> {
        let url = url.to_string();
        if let Some(hook) = &self.hook {
            hook(&url);
        }
        self.crawled.lock().unwrap().push(url.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.scripts.get(&url).cloned() {
            None => Ok(PageOutcome {
                success: true,
                http_status: Some(200),
                ..PageOutcome::default()
            }),
            Some(Script::Succeed { products, links }) => Ok(PageOutcome {
                success: true,
                http_status: Some(200),
                content_type: Some("text/html".to_string()),
                title: Some("Listing".to_string()),
                products: (0..products).map(|i| product(&format!("item-{}", i))).collect(),
                discovered_urls: links.iter().map(|l| l.to_string()).collect(),
                ..PageOutcome::default()
            }),
            Some(Script::Fail(error)) => Ok(PageOutcome {
                success: false,
                http_status: Some(500),
                content: Some("<h1>error</h1>".to_string()),
                error: Some(error.to_string()),
                ..PageOutcome::default()
            }),
            Some(Script::Error(error)) => Err(CrawlError::strategy("scripted", error)),
            Some(Script::Exhausted) => Err(CrawlError::strategy(
                "rendering page",
                CrawlError::ResourceExhausted("out of memory".to_string()),
            )),
            Some(Script::Skip(reason)) => Ok(PageOutcome::skipped(reason)),
        }
    }
}

pub fn registry(strategy: Arc<ScriptedStrategy>) -> Arc<StrategyRegistry> {
    Arc::new(StrategyRegistry::new(vec![strategy as Arc<dyn CrawlerStrategy>]).unwrap())
}

/// Store with one generic provider (no request delay) and one queued job
pub fn queued_job(max_pages: Option<u32>) -> (Arc<SqliteStorage>, i64) {
    let store = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let provider_id = store
        .insert_provider("Acme", "generic", Some(r#"{"requestDelayMs": 0}"#))
        .unwrap();
    let job_id = store
        .insert_job(
            &NewJob {
                provider_id,
                start_url: "https://shop.example.com/".to_string(),
                sitemap_url: None,
                max_pages,
            },
            Utc::now(),
        )
        .unwrap();
    (store, job_id)
}

/// Store with one job already claimed by `worker_id`, with `urls` tracked as pages
pub fn claimed_job(worker_id: &str, urls: &[&str]) -> (Arc<SqliteStorage>, JobRecord) {
    let (store, job_id) = queued_job(None);
    let now = Utc::now();
    let job = store
        .claim_next_job(worker_id, now, now + chrono::Duration::seconds(60))
        .unwrap()
        .unwrap();
    assert_eq!(job.id, job_id);

    let urls: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
    store.insert_pages(job_id, &urls, None, now).unwrap();
    (store, job)
}
