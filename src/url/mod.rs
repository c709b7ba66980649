//! URL handling module
//!
//! This module provides URL normalization and same-site checks used when
//! discovered URLs are turned into tracked pages.

mod domain;
mod normalize;

pub use domain::{extract_domain, same_site};
pub use normalize::normalize_url;

use ::url::Url;

/// Normalizes every URL in `urls`, keeping only those on the same site as `base`
///
/// Order is preserved and duplicates (after normalization) are dropped, so the first
/// occurrence of a page decides its position in the crawl order. Unparseable URLs are
/// ignored.
pub fn normalize_same_site<I, S>(base: &Url, urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();

    for raw in urls {
        let Ok(url) = normalize_url(raw.as_ref()) else {
            continue;
        };
        if !same_site(base, &url) {
            continue;
        }
        let url = String::from(url);
        if seen.insert(url.clone()) {
            result.push(url);
        }
    }

    result
}
