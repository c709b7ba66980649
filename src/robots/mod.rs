//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files
//! for providers that ask for robots.txt compliance.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::ParsedRobots;

use reqwest::header::USER_AGENT;
use tracing::{debug, warn};
use url::Url;

/// Fetches robots.txt for the origin of `url`
///
/// A missing robots.txt (4xx) or an unreachable one is treated as allow-all, so a
/// flaky robots endpoint never blocks a crawl.
pub async fn fetch_robots(client: &reqwest::Client, url: &Url, user_agent: &str) -> ParsedRobots {
    let mut robots_url = url.clone();
    robots_url.set_path("/robots.txt");
    robots_url.set_query(None);
    robots_url.set_fragment(None);

    let response = match client
        .get(robots_url.clone())
        .header(USER_AGENT, user_agent)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %robots_url, error = %e, "Failed to fetch robots.txt, allowing all");
            return ParsedRobots::allow_all();
        }
    };

    if !response.status().is_success() {
        debug!(url = %robots_url, status = %response.status(), "No robots.txt, allowing all");
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => ParsedRobots::from_content(&body),
        Err(e) => {
            warn!(url = %robots_url, error = %e, "Failed to read robots.txt, allowing all");
            ParsedRobots::allow_all()
        }
    }
}
