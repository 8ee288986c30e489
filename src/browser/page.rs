//! Owned view of a rendered page for selector lookups.

use std::collections::HashMap;

use scraper::{Html, Selector};
use tracing::debug;

/// Page source plus the URL it was rendered from.
///
/// The parsed DOM is rebuilt on each lookup so the document stays `Send`
/// and can be held across await points.
#[derive(Debug, Clone)]
pub struct PageDocument {
    source: String,
    url: Option<String>,
}

/// Snapshot of one matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageElement {
    pub outer_html: String,
    pub text: String,
    pub attrs: HashMap<String, String>,
}

impl PageElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }
}

impl PageDocument {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// All elements matching a CSS selector, in document order.
    pub fn find(&self, selector: &str) -> Vec<PageElement> {
        let Ok(parsed) = Selector::parse(selector) else {
            debug!("Invalid selector: {}", selector);
            return Vec::new();
        };
        let html = Html::parse_document(&self.source);
        html.select(&parsed)
            .map(|el| PageElement {
                outer_html: el.html(),
                text: el.text().collect::<String>().trim().to_string(),
                attrs: el
                    .value()
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .collect()
    }

    pub fn find_first(&self, selector: &str) -> Option<PageElement> {
        self.find(selector).into_iter().next()
    }

    pub fn contains(&self, selector: &str) -> bool {
        !self.find(selector).is_empty()
    }

    /// Resolve a possibly relative link against the page URL.
    pub fn absolute_url(&self, href: &str) -> String {
        match self.url.as_deref().and_then(|u| url::Url::parse(u).ok()) {
            Some(base) => base
                .join(href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        }
    }
}
