//! Page fetching through pooled HTTP sessions
//!
//! Transport failures (timeouts, refused connections, TLS errors) are returned as
//! errors. Any HTTP response, including 4xx/5xx, is returned as a `FetchedPage` so the
//! strategy can record the status and keep the body for diagnosis.

use crate::pool::{HttpSession, SessionPool};
use crate::{CrawlError, Result};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use sha2::{Digest, Sha256};
use url::Url;

/// A fetched HTTP response
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for HTML responses, or responses that did not declare a type
    pub fn is_html(&self) -> bool {
        match &self.content_type {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml")
            }
            None => true,
        }
    }
}

/// Fetches `url` with one session
pub async fn fetch_page(session: &HttpSession, url: &Url, user_agent: &str) -> Result<FetchedPage> {
    let response = session
        .client()
        .get(url.clone())
        .header(USER_AGENT, user_agent)
        .send()
        .await
        .map_err(|e| transport_error(url, e))?;

    let status = response.status().as_u16();
    let final_url = response.url().clone();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response.text().await.map_err(|e| transport_error(url, e))?;

    Ok(FetchedPage {
        final_url,
        status,
        content_type,
        body,
    })
}

/// Leases a session, fetches `url` and returns the session to the pool on every path
pub async fn pooled_fetch(pool: &SessionPool, url: &Url, user_agent: &str) -> Result<FetchedPage> {
    let mut lease = pool.acquire().await?;

    let result = match lease.context() {
        Ok(session) => fetch_page(session, url, user_agent).await,
        Err(e) => Err(e.into()),
    };

    lease.release().await;
    result
}

fn transport_error(url: &Url, error: reqwest::Error) -> CrawlError {
    if error.is_timeout() {
        CrawlError::Timeout {
            url: url.to_string(),
        }
    } else {
        CrawlError::Http {
            url: url.to_string(),
            source: error,
        }
    }
}

/// SHA-256 of the page body as lowercase hex
pub fn content_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}
