//! Robots.txt caching implementation
//!
//! Robots rules are cached per origin and refetched after 24 hours.

use crate::robots::{fetch_robots, ParsedRobots};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use url::Url;

/// Cached robots.txt data for an origin
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub content: ParsedRobots,
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Checks if the cached robots.txt is older than 24 hours
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > Duration::hours(24)
    }
}

/// Per-origin robots.txt cache shared by the strategies of one worker
pub struct RobotsCache {
    client: reqwest::Client,
    entries: Mutex<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    /// Creates an empty cache that fetches robots.txt with `client`
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Checks whether `url` may be crawled by `user_agent`
    ///
    /// Fetches the origin's robots.txt on first use or once the cached copy is stale.
    pub async fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        let origin = url.origin().ascii_serialization();

        let mut entries = self.entries.lock().await;
        let needs_fetch = entries
            .get(&origin)
            .map(|cached| cached.is_stale())
            .unwrap_or(true);

        if needs_fetch {
            let robots = fetch_robots(&self.client, url, user_agent).await;
            entries.insert(origin.clone(), CachedRobots::new(robots));
        }

        entries
            .get(&origin)
            .map(|cached| cached.content.is_allowed(url.as_str(), user_agent))
            .unwrap_or(true)
    }

    /// Number of origins currently cached
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
