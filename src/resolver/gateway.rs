//! Gateway traversal: from a quality link to the file-host page.

use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, PageDocument};
use crate::config::Settings;
use crate::error::{PaheError, Result};
use crate::random;

/// Anchor selectors tried in order on the gateway page.
pub const GATEWAY_SELECTORS: &[&str] = &["a[href*='kwik']", "a.button.is-primary", "a.button"];

const SELECTOR_WAIT: Duration = Duration::from_secs(5);

/// Navigate `link` in the browser and return the file-host URL it leads to.
///
/// The gateway either redirects on its own after a short delay or exposes
/// an anchor to the file host. Structured lookups run first, then a scan
/// of the raw page source.
pub async fn resolve_gateway(
    session: &dyn BrowserSession,
    link: &str,
    settings: &Settings,
) -> Result<String> {
    info!("Navigating gateway: {}", link);
    session.navigate(link).await?;

    let settle = random::uniform(
        settings.gateway_settle_min_secs,
        settings.gateway_settle_max_secs,
    );
    tokio::time::sleep(Duration::from_secs_f64(settle.max(0.0))).await;

    let current = session.current_url().await?;
    if settings.is_file_host(&current) {
        info!("Redirected to file host: {}", current);
        return Ok(current);
    }

    let wait = SELECTOR_WAIT.min(settings.element_wait());
    for selector in GATEWAY_SELECTORS {
        if !session.wait_for(selector, wait).await? {
            continue;
        }
        let doc = PageDocument::new(session.content().await?).with_url(current.clone());
        let found = doc
            .find(selector)
            .into_iter()
            .filter_map(|el| el.attr("href").map(|h| doc.absolute_url(h)))
            .find(|href| settings.is_file_host(href));
        if let Some(href) = found {
            info!("Found file-host link with selector '{}': {}", selector, href);
            return Ok(href);
        }
        debug!("Selector {} matched but no file-host href", selector);
    }

    let source = session.content().await?;
    if let Some(href) = scan_for_file_host(&source, &settings.file_host_domains) {
        info!("Found file-host link in page source: {}", href);
        return Ok(href);
    }

    warn!("No file-host link found on {}", current);
    Err(PaheError::LinkResolutionFailed(format!(
        "gateway {link} exposed no file-host link"
    )))
}

/// Find the first URL on one of `domains` anywhere in raw HTML or script.
pub fn scan_for_file_host(source: &str, domains: &[String]) -> Option<String> {
    if domains.is_empty() {
        return None;
    }
    let alternatives = domains
        .iter()
        .map(|d| regex::escape(d))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(r#"https?://(?:[\w-]+\.)*(?:{alternatives})(?::\d+)?/[^\s"'<>\\]+"#);
    let re = Regex::new(&pattern).ok()?;
    re.find(source).map(|m| m.as_str().to_string())
}
