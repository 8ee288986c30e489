//! Browser automation for anti-bot pages and file-host downloads.
//!
//! The pipeline talks to browsers only through [`BrowserSession`] and
//! [`SessionLauncher`]. The Chrome implementation lives in [`chrome`]; tests
//! substitute scripted sessions.

mod chrome;
mod config;
mod cookies;
#[cfg(test)]
pub(crate) mod fake;
mod page;
mod pool;
mod stealth;

pub use chrome::ChromeLauncher;
pub use config::BrowserEngineConfig;
pub use cookies::{sync_browser_to_client, sync_client_to_browser};
pub use page::{PageDocument, PageElement};
pub use pool::{BrowserLease, BrowserPool, BrowserPoolConfig};
pub use stealth::{NO_IMAGES_ARG, STEALTH_ARGS, STEALTH_SCRIPTS};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Cookie extracted from a browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

/// One automated browser tab.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and wait for the document to be ready.
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Rendered page source.
    async fn content(&self) -> Result<String>;

    /// Poll until `selector` matches. `Ok(false)` on timeout.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Click the first element matching `selector`.
    async fn click(&self, selector: &str) -> Result<()>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Cookies visible to the current page.
    async fn cookies(&self) -> Result<Vec<BrowserCookie>>;

    async fn set_cookies(&self, cookies: &[BrowserCookie]) -> Result<()>;

    fn user_agent(&self) -> &str;

    async fn close(&self) -> Result<()>;
}

/// Creates browser sessions whose downloads land in a given directory.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, download_dir: &Path) -> Result<Arc<dyn BrowserSession>>;
}

/// Fetch a page through the browser and return its rendered source.
///
/// Waits up to `timeout` for `ready_selector` when one is given.
pub async fn render_page(
    session: &dyn BrowserSession,
    url: &str,
    ready_selector: Option<&str>,
    timeout: Duration,
) -> Result<PageDocument> {
    session.navigate(url).await?;
    if let Some(selector) = ready_selector {
        if !session.wait_for(selector, timeout).await? {
            tracing::warn!("Timed out waiting for {} on {}", selector, url);
        }
    }
    let final_url = session.current_url().await.unwrap_or_else(|_| url.to_string());
    let source = session.content().await?;
    Ok(PageDocument::new(source).with_url(final_url))
}
