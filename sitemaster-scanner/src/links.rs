use crate::document::DocumentModel;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};
use url::Url;

const LINK_SELECTOR: &str = "a[href], area[href]";

/// A candidate link found on a page.
///
/// Two links are the same link when they resolve to the same absolute URL,
/// whatever the href text that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    /// The href exactly as written in the markup.
    pub href: String,
    /// Absolute URL with the fragment removed.
    pub url: String,
    pub scheme: String,
}

impl Link {
    pub fn new(href: impl Into<String>, url: &Url) -> Self {
        Self {
            href: href.into(),
            url: url.to_string(),
            scheme: url.scheme().to_string(),
        }
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// Drop everything from the first `#`, leaving any query string alone.
pub fn strip_fragment(url: &str) -> &str {
    match url.find('#') {
        Some(idx) => &url[..idx],
        None => url,
    }
}

pub fn is_checkable_scheme(scheme: &str) -> bool {
    scheme == "http" || scheme == "https"
}

/// Collect the http(s) links of a page, resolved against `base_url`.
///
/// Order is the order of first occurrence in the document.
pub fn extract_links(base_url: &Url, document: &DocumentModel) -> Vec<Link> {
    let nodes = match document.query(LINK_SELECTOR) {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!("Link query failed: {}", e);
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for node in nodes {
        let Some(href) = node.attr("href") else {
            continue;
        };

        if let Some(url) = resolve_href(base_url, href) {
            if !is_checkable_scheme(url.scheme()) {
                debug!("Skipping {} ({} scheme)", href, url.scheme());
                continue;
            }

            let link = Link::new(href, &url);
            if seen.insert(link.url.clone()) {
                links.push(link);
            }
        }
    }

    debug!("Extracted {} links from {}", links.len(), base_url);
    links
}

fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();

    // Same-page anchors never leave the page.
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    Some(resolved)
}
