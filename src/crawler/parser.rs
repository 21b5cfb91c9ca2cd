//! HTML parsing for the link processor
//!
//! Extracts the page title and the outgoing links worth following.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// What the link processor needs from a page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    /// Trimmed `<title>` text, if non-empty
    pub title: Option<String>,

    /// Absolute http(s) links in document order, without duplicates
    pub links: Vec<String>,
}

/// Parses an HTML document
///
/// # Link Extraction Rules
///
/// **Include:** `<a href>` anywhere and `<link rel="canonical" href>`.
///
/// **Exclude:** `<a download>`, fragment-only hrefs, `javascript:`,
/// `mailto:`, `tel:` and `data:` hrefs, anything that does not resolve to
/// http(s).
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `base_url` - The base URL for resolving relative links
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for query in ["a[href]", "link[rel='canonical'][href]"] {
        let Ok(selector) = Selector::parse(query) else {
            continue;
        };

        for element in document.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            let resolved = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url));

            if let Some(link) = resolved {
                if seen.insert(link.clone()) {
                    links.push(link);
                }
            }
        }
    }

    links
}

/// Resolves an href against the page URL, keeping only http(s) targets
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute.to_string())
}
