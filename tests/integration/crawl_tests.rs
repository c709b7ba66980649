//! Integration tests for the crawl worker
//!
//! These tests run workers against a file-backed job store shared through several
//! connections, the way separate worker processes share it, and use wiremock to serve
//! retailer pages for the end-to-end strategy tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use shelf_crawler::config::{parse_config, ProviderSettings};
use shelf_crawler::pool::{HttpSessionEngine, SessionPool};
use shelf_crawler::state::{JobStatus, PageStatus};
use shelf_crawler::storage::{JobStore, NewJob, SqliteStorage};
use shelf_crawler::strategy::{CrawlerStrategy, PageOutcome, StrategyRegistry};
use shelf_crawler::worker::{Worker, WorkerSettings};
use shelf_crawler::{ConfigError, CrawlError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHOP: &str = "https://shop.example.com";

/// Per-URL behavior of the scripted strategy
#[derive(Clone)]
enum Page {
    Ok,
    Fail(&'static str),
    OutOfMemory,
}

/// Strategy registered as "generic" that crawls from a fixed script
struct ScriptedStrategy {
    name: &'static str,
    discovered: Vec<String>,
    pages: HashMap<String, Page>,
    before_crawl: Option<Box<dyn Fn(&str) + Send + Sync>>,
    crawled: Mutex<Vec<String>>,
}

impl ScriptedStrategy {
    fn new(discovered: &[&str]) -> Self {
        Self {
            name: "generic",
            discovered: discovered.iter().map(|u| u.to_string()).collect(),
            pages: HashMap::new(),
            before_crawl: None,
            crawled: Mutex::new(Vec::new()),
        }
    }

    fn page(mut self, url: &str, page: Page) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    fn crawled(&self) -> Vec<String> {
        self.crawled.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrawlerStrategy for ScriptedStrategy {
    fn crawler_type(&self) -> &str {
        self.name
    }

    async fn discover_urls(
        &self,
        _start_url: &Url,
        _sitemap_url: Option<&Url>,
        _settings: &ProviderSettings,
    ) -> shelf_crawler::Result<Vec<String>> {
        Ok(self.discovered.clone())
    }

    async fn crawl_page(
        &self,
        url: &Url,
        _settings: &ProviderSettings,
    ) -> shelf_crawler::Result<PageOutcome> {
        let url = url.to_string();
        if let Some(hook) = &self.before_crawl {
            hook(&url);
        }
        self.crawled.lock().unwrap().push(url.clone());

        match self.pages.get(&url).cloned().unwrap_or(Page::Ok) {
            Page::Ok => Ok(PageOutcome {
                success: true,
                http_status: Some(200),
                ..PageOutcome::default()
            }),
            Page::Fail(error) => Ok(PageOutcome {
                success: false,
                http_status: Some(500),
                error: Some(error.to_string()),
                ..PageOutcome::default()
            }),
            Page::OutOfMemory => {
                let oom = std::io::Error::new(std::io::ErrorKind::OutOfMemory, "render heap");
                Err(CrawlError::strategy("rendering product grid", oom))
            }
        }
    }
}

/// Temporary job store file with one provider
struct TestStore {
    _dir: TempDir,
    path: PathBuf,
    provider_id: i64,
}

impl TestStore {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.db");
        let provider_id = SqliteStorage::new(&path)
            .unwrap()
            .insert_provider("Acme", "generic", Some(r#"{"requestDelayMs": 0}"#))
            .unwrap();
        Self {
            _dir: dir,
            path,
            provider_id,
        }
    }

    /// A new connection, as a separate worker process would open
    fn connect(&self) -> SqliteStorage {
        SqliteStorage::new(&self.path).unwrap()
    }

    fn enqueue(&self, start_url: &str, max_pages: Option<u32>) -> i64 {
        self.connect()
            .insert_job(
                &NewJob {
                    provider_id: self.provider_id,
                    start_url: start_url.to_string(),
                    sitemap_url: None,
                    max_pages,
                },
                Utc::now(),
            )
            .unwrap()
    }
}

fn settings(worker_id: &str) -> WorkerSettings {
    WorkerSettings {
        worker_id: worker_id.to_string(),
        poll_interval: Duration::from_millis(10),
        error_backoff: Duration::from_millis(50),
        lease_duration: Duration::from_secs(60),
        renewal_interval: Duration::from_secs(20),
    }
}

fn scripted_worker(store: &TestStore, strategy: Arc<ScriptedStrategy>) -> Worker {
    let registry =
        StrategyRegistry::new(vec![strategy as Arc<dyn CrawlerStrategy>]).unwrap();
    Worker::new(
        Arc::new(store.connect()),
        Arc::new(registry),
        settings("worker-a"),
    )
}

fn page_statuses(store: &SqliteStorage, job_id: i64) -> Vec<(String, PageStatus)> {
    store
        .list_pages(job_id)
        .unwrap()
        .into_iter()
        .map(|p| (p.url, p.status))
        .collect()
}

fn url(path: &str) -> String {
    format!("{}{}", SHOP, path)
}

// ===== Claiming and leases =====

#[test]
fn test_concurrent_claims_single_owner_per_job() {
    let store = TestStore::new();
    let jobs: HashSet<i64> = (0..3)
        .map(|i| store.enqueue(&url(&format!("/dept/{}", i)), None))
        .collect();

    // Open connections up front, then race them from separate threads
    let connections: Vec<SqliteStorage> = (0..6).map(|_| store.connect()).collect();
    let handles: Vec<_> = connections
        .into_iter()
        .enumerate()
        .map(|(i, conn)| {
            std::thread::spawn(move || {
                let worker = format!("worker-{}", i);
                let mut claimed = Vec::new();
                loop {
                    let now = Utc::now();
                    match conn
                        .claim_next_job(&worker, now, now + ChronoDuration::seconds(60))
                        .unwrap()
                    {
                        Some(job) => {
                            assert_eq!(job.lease_owner.as_deref(), Some(worker.as_str()));
                            claimed.push(job.id);
                        }
                        None => {
                            // A lost race also reads as None; stop only once nothing is left
                            let remaining = conn
                                .list_jobs(100)
                                .unwrap()
                                .into_iter()
                                .filter(|j| j.status == JobStatus::Queued)
                                .count();
                            if remaining == 0 {
                                break;
                            }
                        }
                    }
                }
                claimed
            })
        })
        .collect();

    let mut all_claims: Vec<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all_claims.sort();

    let mut expected: Vec<i64> = jobs.into_iter().collect();
    expected.sort();
    assert_eq!(all_claims, expected);
}

#[test]
fn test_expired_lease_is_reclaimed_by_another_worker() {
    let store = TestStore::new();
    let job_id = store.enqueue(&url("/"), None);
    let worker_a = store.connect();
    let worker_b = store.connect();

    let t0 = Utc::now();
    let first = worker_a
        .claim_next_job("worker-a", t0, t0 + ChronoDuration::seconds(30))
        .unwrap()
        .unwrap();
    assert_eq!(first.id, job_id);

    // Lease still valid
    let t1 = t0 + ChronoDuration::seconds(10);
    assert!(worker_b
        .claim_next_job("worker-b", t1, t1 + ChronoDuration::seconds(30))
        .unwrap()
        .is_none());

    // Worker A stopped renewing; the lease lapses
    let t2 = t0 + ChronoDuration::seconds(31);
    let reclaimed = worker_b
        .claim_next_job("worker-b", t2, t2 + ChronoDuration::seconds(30))
        .unwrap()
        .unwrap();

    assert_eq!(reclaimed.id, job_id);
    assert_eq!(reclaimed.lease_owner.as_deref(), Some("worker-b"));
    assert_eq!(reclaimed.started_at, first.started_at);
    assert!(!worker_a
        .extend_lease(job_id, "worker-a", t2 + ChronoDuration::seconds(30))
        .unwrap());
}

#[test]
fn test_discovery_is_idempotent() {
    let store = TestStore::new();
    let job_id = store.enqueue(&url("/"), None);
    let conn = store.connect();
    let urls = vec![url("/a"), url("/b")];

    assert_eq!(conn.insert_pages(job_id, &urls, None, Utc::now()).unwrap(), 2);
    assert_eq!(conn.insert_pages(job_id, &urls, None, Utc::now()).unwrap(), 0);
    assert_eq!(conn.list_pages(job_id).unwrap().len(), 2);
}

// ===== Job execution =====

#[tokio::test]
async fn test_all_pages_failed_marks_job_failed() {
    let store = TestStore::new();
    let job_id = store.enqueue(&url("/"), None);
    let strategy = Arc::new(
        ScriptedStrategy::new(&[&url("/a"), &url("/b")])
            .page(&url("/a"), Page::Fail("HTTP 503"))
            .page(&url("/b"), Page::Fail("HTTP 404")),
    );

    let worker = scripted_worker(&store, strategy);
    assert!(worker
        .try_claim_and_process_one_job(&CancellationToken::new())
        .await
        .unwrap());

    let job = store.connect().get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("All 2 pages failed: HTTP 503 | HTTP 404")
    );
    assert!(job.lease_owner.is_none());
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn test_one_success_marks_job_succeeded() {
    let store = TestStore::new();
    let job_id = store.enqueue(&url("/"), None);
    let strategy = Arc::new(
        ScriptedStrategy::new(&[&url("/a"), &url("/b"), &url("/c")])
            .page(&url("/a"), Page::Fail("HTTP 503"))
            .page(&url("/c"), Page::Fail("HTTP 503")),
    );

    let worker = scripted_worker(&store, strategy);
    worker
        .try_claim_and_process_one_job(&CancellationToken::new())
        .await
        .unwrap();

    let job = store.connect().get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.error_message.is_none());
}

#[tokio::test]
async fn test_out_of_memory_aborts_job() {
    let store = TestStore::new();
    let job_id = store.enqueue(&url("/"), None);
    let strategy = Arc::new(
        ScriptedStrategy::new(&[&url("/a"), &url("/b"), &url("/c"), &url("/d")])
            .page(&url("/b"), Page::OutOfMemory),
    );

    let worker = scripted_worker(&store, strategy.clone());
    worker
        .try_claim_and_process_one_job(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(strategy.crawled(), vec![url("/a"), url("/b")]);

    let conn = store.connect();
    let job = conn.get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("Critical error"));
    assert_eq!(
        page_statuses(&conn, job_id),
        vec![
            (url("/a"), PageStatus::Succeeded),
            (url("/b"), PageStatus::Failed),
            (url("/c"), PageStatus::Queued),
            (url("/d"), PageStatus::Queued),
        ]
    );
}

#[tokio::test]
async fn test_external_cancel_halts_before_next_page() {
    let store = TestStore::new();
    let job_id = store.enqueue(&url("/"), None);

    // The admin side writes the cancel through its own connection
    let admin = Mutex::new(store.connect());
    let cancel_on = url("/b");
    let mut strategy = ScriptedStrategy::new(&[&url("/a"), &url("/b"), &url("/c")]);
    strategy.before_crawl = Some(Box::new(move |crawling| {
        if crawling == cancel_on {
            admin.lock().unwrap().cancel_job(job_id, Utc::now()).unwrap();
        }
    }));
    let strategy = Arc::new(strategy);

    let worker = scripted_worker(&store, strategy.clone());
    worker
        .try_claim_and_process_one_job(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(strategy.crawled(), vec![url("/a"), url("/b")]);

    let conn = store.connect();
    let job = conn.get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Canceled);
    assert!(job.canceled_at.is_some());
    assert!(job.lease_owner.is_none());
    assert_eq!(
        page_statuses(&conn, job_id)[2],
        (url("/c"), PageStatus::Queued)
    );
}

#[tokio::test]
async fn test_max_pages_limits_tracked_pages() {
    let store = TestStore::new();
    let job_id = store.enqueue(&url("/"), Some(2));
    let strategy = Arc::new(ScriptedStrategy::new(&[&url("/a"), &url("/b"), &url("/c")]));

    let worker = scripted_worker(&store, strategy.clone());
    worker
        .try_claim_and_process_one_job(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(strategy.crawled(), vec![url("/a"), url("/b")]);
    let urls: Vec<String> = store
        .connect()
        .list_pages(job_id)
        .unwrap()
        .into_iter()
        .map(|p| p.url)
        .collect();
    assert_eq!(urls, vec![url("/a"), url("/b")]);
}

#[tokio::test]
async fn test_resumed_job_is_reclaimed() {
    let store = TestStore::new();
    let job_id = store.enqueue(&url("/"), None);
    let admin = store.connect();
    let now = Utc::now();

    admin
        .claim_next_job("worker-gone", now, now + ChronoDuration::seconds(60))
        .unwrap()
        .unwrap();
    assert!(admin.pause_job(job_id, "ops", now).unwrap());
    assert!(admin.resume_job(job_id).unwrap());

    let strategy = Arc::new(ScriptedStrategy::new(&[&url("/a")]));
    let worker = scripted_worker(&store, strategy);
    assert!(worker
        .try_claim_and_process_one_job(&CancellationToken::new())
        .await
        .unwrap());

    assert_eq!(admin.get_job(job_id).unwrap().status, JobStatus::Succeeded);
}

// ===== Strategy registry =====

#[test]
fn test_registry_falls_back_to_generic() {
    let mut shopify = ScriptedStrategy::new(&[]);
    shopify.name = "shopify";
    let registry = StrategyRegistry::new(vec![
        Arc::new(ScriptedStrategy::new(&[])) as Arc<dyn CrawlerStrategy>,
        Arc::new(shopify) as Arc<dyn CrawlerStrategy>,
    ])
    .unwrap();

    assert_eq!(registry.resolve("Shopify").crawler_type(), "shopify");
    assert_eq!(registry.resolve("woocommerce").crawler_type(), "generic");
}

#[test]
fn test_registry_without_generic_is_config_error() {
    let mut shopify = ScriptedStrategy::new(&[]);
    shopify.name = "shopify";

    let result = StrategyRegistry::new(vec![Arc::new(shopify) as Arc<dyn CrawlerStrategy>]);
    assert!(matches!(
        result,
        Err(ConfigError::MissingFallbackStrategy(_))
    ));
}

// ===== Rendering pool =====

async fn mount_session_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "session=abc123; Path=/")
                .set_body_raw("ok", "text/plain"),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_reused_session_carries_no_cookies() {
    let server = mount_session_server().await;
    let login = Url::parse(&format!("{}/login", server.uri())).unwrap();
    let pool = SessionPool::new(
        HttpSessionEngine::new("ShelfCrawler/test", Duration::from_secs(5)),
        1,
    );

    let mut lease = pool.acquire().await.unwrap();
    {
        let session = lease.context().unwrap();
        session.client().get(login.clone()).send().await.unwrap();
        let cookies = session.cookie_header(&login).unwrap();
        assert!(cookies.contains("session=abc123"));
    }
    lease.release().await;

    let mut lease = pool.acquire().await.unwrap();
    assert!(lease.context().unwrap().cookie_header(&login).is_none());
    lease.release().await;

    assert_eq!(pool.created_count(), 1);
    pool.close().await;
}

#[tokio::test]
async fn test_acquire_blocks_beyond_maximum() {
    let pool = SessionPool::new(
        HttpSessionEngine::new("ShelfCrawler/test", Duration::from_secs(5)),
        1,
    );

    let mut held = pool.acquire().await.unwrap();
    let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
    assert!(blocked.is_err());

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut lease = pool.acquire().await.unwrap();
            lease.release().await;
        })
    };
    held.release().await;

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    pool.close().await;
}

// ===== End-to-end against a mock retailer =====

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

fn product_page(name: &str, price: &str) -> String {
    format!(
        r#"<html><head><title>{name}</title>
        <script type="application/ld+json">
        {{"@type": "Product", "name": "{name}", "sku": "{name}-sku",
          "offers": {{"@type": "Offer", "price": "{price}", "priceCurrency": "EUR"}}}}
        </script></head><body><a href="/">Home</a></body></html>"#,
        name = name,
        price = price
    )
}

async fn mount_retailer(server: &MockServer) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("User-agent: *\nDisallow: /private\n", "text/plain"),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                    <url><loc>{base}/p/boot</loc></url>
                    <url><loc>{base}/p/clog</loc></url>
                    <url><loc>{base}/private/staff-sale</loc></url>
                    <url><loc>https://elsewhere.example.org/p/1</loc></url>
                </urlset>"#,
                base = base
            ),
            "application/xml",
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<html><head><title>Shop</title></head><body>
            <a href="{base}/p/boot">Boot</a>
            <a href="/p/clog?utm_source=home">Clog</a>
            </body></html>"#,
            base = base
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/p/boot"))
        .respond_with(html(product_page("Boot", "89.90")))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/p/clog"))
        .respond_with(html(product_page("Clog", "35.00")))
        .mount(server)
        .await;
}

fn enqueue_live(store_path: &Path, provider_id: i64, base: &str) -> i64 {
    SqliteStorage::new(store_path)
        .unwrap()
        .insert_job(
            &NewJob {
                provider_id,
                start_url: format!("{}/", base),
                sitemap_url: Some(format!("{}/sitemap.xml", base)),
                max_pages: None,
            },
            Utc::now(),
        )
        .unwrap()
}

#[tokio::test]
async fn test_generic_strategy_end_to_end() {
    let server = MockServer::start().await;
    mount_retailer(&server).await;
    let base = server.uri();

    let store = TestStore::new();
    let job_id = enqueue_live(&store.path, store.provider_id, &base);

    let config = parse_config(&format!(
        "[storage]\ndatabase-path = \"{}\"\n",
        store.path.display()
    ))
    .unwrap();
    let pool = SessionPool::new(
        HttpSessionEngine::new(
            config.user_agent.default.clone(),
            Duration::from_secs(config.browser.request_timeout_secs),
        ),
        2,
    );
    let registry = StrategyRegistry::with_defaults(pool.clone(), &config).unwrap();
    let worker = Worker::new(
        Arc::new(store.connect()),
        Arc::new(registry),
        settings("worker-e2e"),
    );

    assert!(worker
        .try_claim_and_process_one_job(&CancellationToken::new())
        .await
        .unwrap());
    pool.close().await;

    let conn = store.connect();
    let job = conn.get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error_message);

    let statuses: HashMap<String, PageStatus> = page_statuses(&conn, job_id).into_iter().collect();
    assert_eq!(statuses.len(), 4);
    assert_eq!(statuses[&format!("{}/", base)], PageStatus::Succeeded);
    assert_eq!(statuses[&format!("{}/p/boot", base)], PageStatus::Succeeded);
    assert_eq!(statuses[&format!("{}/p/clog", base)], PageStatus::Succeeded);
    assert_eq!(
        statuses[&format!("{}/private/staff-sale", base)],
        PageStatus::Skipped
    );

    let mut products = conn.list_products(job_id).unwrap();
    products.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(products.len(), 2);
    assert_eq!(products[0].name, "Boot");
    assert_eq!(products[0].price, Some(89.90));
    assert_eq!(products[0].currency.as_deref(), Some("EUR"));
    assert_eq!(products[1].name, "Clog");
    assert_eq!(products[1].provider_id, store.provider_id);

    let home = conn
        .list_pages(job_id)
        .unwrap()
        .into_iter()
        .find(|p| p.url == format!("{}/", base))
        .unwrap();
    assert_eq!(home.title.as_deref(), Some("Shop"));
    assert!(home.content.is_none());
    assert_eq!(home.content_hash.map(|h| h.len()), Some(64));
}
