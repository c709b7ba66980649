//! HTML extraction helpers shared by the built-in strategies
//!
//! This module handles parsing HTML content to extract:
//! - Page title
//! - Links to follow (from <a> tags and canonical links)
//! - Products described by schema.org JSON-LD blocks
//! - Products located by provider-configured CSS selectors

use crate::config::SelectorSettings;
use crate::storage::ProductData;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

/// Extracts the page title from the HTML document
pub fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| clean_text(element))
        .filter(|s| !s.is_empty())
}

/// Extracts all followable links from the HTML document
///
/// Includes `<a href>` (except `download` links) and `<link rel="canonical">`.
pub fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(url);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(url);
            }
        }
    }

    links
}

/// Resolves a link href to an absolute http(s) URL
///
/// Returns None for javascript:, mailto:, tel: and data: links, fragment-only links
/// and anything that does not resolve to http or https.
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    matches!(absolute.scheme(), "http" | "https").then(|| absolute.to_string())
}

// ===== JSON-LD =====

/// Extracts schema.org `Product` entries from JSON-LD blocks
///
/// Handles single objects, top-level arrays, `@graph` containers and `ItemList`s whose
/// elements are (or wrap) products. Malformed blocks are skipped.
pub fn extract_json_ld_products(document: &Html, page_url: &Url) -> Vec<ProductData> {
    let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };

    let mut products = Vec::new();
    for script in document.select(&selector) {
        let text: String = script.text().collect();
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => collect_products(&value, page_url, &mut products),
            Err(e) => debug!(url = %page_url, error = %e, "Skipping malformed JSON-LD block"),
        }
    }
    products
}

fn collect_products(value: &Value, page_url: &Url, out: &mut Vec<ProductData>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_products(item, page_url, out);
            }
        }
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                collect_products(graph, page_url, out);
            }

            if has_type(value, "Product") {
                out.extend(product_from_json_ld(value, page_url));
            } else if has_type(value, "ItemList") {
                if let Some(Value::Array(elements)) = map.get("itemListElement") {
                    for element in elements {
                        let item = element.get("item").unwrap_or(element);
                        if has_type(item, "Product") {
                            out.extend(product_from_json_ld(item, page_url));
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn has_type(value: &Value, wanted: &str) -> bool {
    let matches = |t: &str| t == wanted || t.rsplit('/').next() == Some(wanted);

    match value.get("@type") {
        Some(Value::String(t)) => matches(t.as_str()),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).any(matches),
        _ => false,
    }
}

fn product_from_json_ld(value: &Value, page_url: &Url) -> Option<ProductData> {
    let name = text_field(value, "name")?;

    let external_id = ["sku", "productID", "gtin13", "gtin", "mpn"]
        .iter()
        .find_map(|key| scalar_string(value.get(*key)?));

    let offer = match value.get("offers") {
        Some(Value::Array(offers)) => offers.first(),
        other => other,
    };
    let price = offer
        .and_then(|o| o.get("price").or_else(|| o.get("lowPrice")))
        .and_then(json_price);
    let currency = offer.and_then(|o| text_field(o, "priceCurrency"));

    let product_url = value
        .get("url")
        .and_then(Value::as_str)
        .and_then(|u| resolve_link(u, page_url))
        .or_else(|| Some(page_url.to_string()));

    Some(ProductData {
        external_id,
        name,
        description: text_field(value, "description"),
        price,
        currency,
        product_url,
        image_urls: image_list(value.get("image"), page_url),
        raw: value.clone(),
    })
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn image_list(value: Option<&Value>, page_url: &Url) -> Vec<String> {
    let resolve = |v: &Value| -> Option<String> {
        let raw = match v {
            Value::String(s) => s.as_str(),
            Value::Object(_) => v.get("url").and_then(Value::as_str)?,
            _ => return None,
        };
        resolve_link(raw, page_url)
    };

    match value {
        Some(Value::Array(items)) => items.iter().filter_map(resolve).collect(),
        Some(v) => resolve(v).into_iter().collect(),
        None => Vec::new(),
    }
}

// ===== CSS selectors =====

/// Extracts products from cards matched by the provider's CSS selectors
///
/// Field selectors are evaluated inside each product card. Cards without a name are
/// skipped. Returns an error if the product selector is missing or any selector is
/// invalid.
pub fn extract_selector_products(
    document: &Html,
    page_url: &Url,
    selectors: &SelectorSettings,
) -> Result<Vec<ProductData>, String> {
    let product = selectors
        .product
        .as_deref()
        .ok_or_else(|| "No product selector configured".to_string())?;
    let product = parse_selector(product)?;

    let name = optional_selector(&selectors.name)?;
    let price = optional_selector(&selectors.price)?;
    let currency = optional_selector(&selectors.currency)?;
    let link = optional_selector(&selectors.url)?;
    let image = optional_selector(&selectors.image)?;
    let description = optional_selector(&selectors.description)?;

    let mut products = Vec::new();
    for card in document.select(&product) {
        let product_name = match &name {
            Some(sel) => first_text(card, sel),
            None => Some(clean_text(card)).filter(|s| !s.is_empty()),
        };
        let Some(product_name) = product_name else {
            continue;
        };

        let price_text = price.as_ref().and_then(|sel| first_text(card, sel));
        let currency_code = currency
            .as_ref()
            .and_then(|sel| card.select(sel).next())
            .and_then(|el| {
                el.value()
                    .attr("content")
                    .map(str::to_string)
                    .or_else(|| Some(clean_text(el)))
            })
            .filter(|s| !s.is_empty())
            .or_else(|| price_text.as_deref().and_then(currency_from_symbol));

        let product_url = match &link {
            Some(sel) => card
                .select(sel)
                .next()
                .and_then(|el| el.value().attr("href")),
            None => card.value().attr("href"),
        }
        .and_then(|href| resolve_link(href, page_url));

        let image_urls: Vec<String> = image
            .as_ref()
            .map(|sel| {
                card.select(sel)
                    .filter_map(|el| el.value().attr("src").or_else(|| el.value().attr("data-src")))
                    .filter_map(|src| resolve_link(src, page_url))
                    .collect()
            })
            .unwrap_or_default();

        let external_id = ["data-sku", "data-product-id", "data-id"]
            .iter()
            .find_map(|attr| card.value().attr(attr))
            .map(str::to_string);

        products.push(ProductData {
            external_id,
            description: description.as_ref().and_then(|sel| first_text(card, sel)),
            price: price_text.as_deref().and_then(parse_price),
            raw: json!({
                "name": product_name,
                "price": price_text,
                "html": card.html(),
            }),
            name: product_name,
            currency: currency_code,
            product_url,
            image_urls,
        });
    }

    Ok(products)
}

/// Resolves the next listing page link, if the page has one
pub fn extract_next_page(
    document: &Html,
    page_url: &Url,
    selector: &str,
) -> Result<Option<String>, String> {
    let selector = parse_selector(selector)?;
    Ok(document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .find_map(|href| resolve_link(href, page_url)))
}

fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("Invalid selector '{}': {:?}", selector, e))
}

fn optional_selector(selector: &Option<String>) -> Result<Option<Selector>, String> {
    selector.as_deref().map(parse_selector).transpose()
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(clean_text)
        .filter(|s| !s.is_empty())
}

/// Element text with runs of whitespace collapsed
fn clean_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

// ===== Prices =====

/// Parses a human-formatted price
///
/// Accepts currency symbols and both `1,299.00` and `1.299,00` styles. When only one
/// separator kind is present, a comma followed by exactly two digits is a decimal
/// comma; repeated separators are thousands separators.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ',');
    if cleaned.is_empty() {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(comma)) => {
            let decimals = cleaned.len() - comma - 1;
            if cleaned.matches(',').count() == 1 && decimals == 2 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (Some(_), None) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned.to_string(),
    };

    normalized.parse::<f64>().ok()
}

fn currency_from_symbol(text: &str) -> Option<String> {
    let code = if text.contains('€') {
        "EUR"
    } else if text.contains('£') {
        "GBP"
    } else if text.contains('¥') {
        "JPY"
    } else if text.contains('$') {
        "USD"
    } else {
        return None;
    };
    Some(code.to_string())
}
