//! HTTP session engine
//!
//! Each context is a `reqwest::Client` bound to its own clearable cookie store, so two
//! leases never observe each other's cookies.

use crate::pool::{PoolError, PoolResult, RenderContext, RenderEngine};
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Settings shared by every session of one engine
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub user_agent: String,
    pub request_timeout: Duration,
}

/// Engine producing isolated HTTP sessions
#[derive(Debug, Clone)]
pub struct HttpSessionEngine {
    settings: SessionSettings,
}

impl HttpSessionEngine {
    pub fn new(user_agent: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            settings: SessionSettings {
                user_agent: user_agent.into(),
                request_timeout,
            },
        }
    }
}

#[async_trait]
impl RenderEngine for HttpSessionEngine {
    type Handle = SessionSettings;
    type Context = HttpSession;

    async fn launch(&self) -> PoolResult<SessionSettings> {
        HeaderValue::from_str(&self.settings.user_agent)
            .map_err(|e| PoolError::Launch(format!("invalid user agent: {}", e)))?;
        Ok(self.settings.clone())
    }

    async fn new_context(&self, settings: &SessionSettings) -> PoolResult<HttpSession> {
        let cookies = Arc::new(SessionCookies::default());

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.request_timeout)
            .cookie_provider(Arc::clone(&cookies))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| PoolError::Context(e.to_string()))?;

        Ok(HttpSession { client, cookies })
    }

    async fn shutdown(&self, _settings: &SessionSettings) {
        debug!("HTTP session engine shut down");
    }
}

/// Cookie store whose whole jar can be swapped out
#[derive(Default)]
pub struct SessionCookies {
    jar: RwLock<Arc<Jar>>,
}

impl SessionCookies {
    fn current(&self) -> Arc<Jar> {
        match self.jar.read() {
            Ok(jar) => Arc::clone(&jar),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Drops every stored cookie
    pub fn clear(&self) {
        match self.jar.write() {
            Ok(mut jar) => *jar = Arc::new(Jar::default()),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(Jar::default()),
        }
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.current().set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.current().cookies(url)
    }
}

/// One pooled HTTP session
pub struct HttpSession {
    client: reqwest::Client,
    cookies: Arc<SessionCookies>,
}

impl HttpSession {
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Cookie header this session would send to `url`
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        self.cookies
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }
}

#[async_trait]
impl RenderContext for HttpSession {
    async fn clear_state(&self) -> PoolResult<()> {
        self.cookies.clear();
        Ok(())
    }

    async fn close(&self) {}
}
