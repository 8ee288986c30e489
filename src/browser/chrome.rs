//! Chrome sessions driven over CDP.
//!
//! Uses chromiumoxide with stealth evasion to get past the catalog's
//! anti-bot wall and to drive the file host's download form.

#[cfg(feature = "browser")]
use std::path::PathBuf;
use std::path::Path;
use std::sync::Arc;
#[cfg(feature = "browser")]
use std::time::Duration;

use async_trait::async_trait;
#[cfg(feature = "browser")]
use tokio::sync::Mutex;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::browser::{
    BrowserContextId, SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetUserAgentOverrideParams};
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;

use super::config::BrowserEngineConfig;
#[cfg(feature = "browser")]
use super::stealth::{NO_IMAGES_ARG, STEALTH_ARGS, STEALTH_SCRIPTS};
#[cfg(feature = "browser")]
use super::BrowserCookie;
use super::{BrowserSession, SessionLauncher};
use crate::error::{PaheError, Result};
#[cfg(feature = "browser")]
use crate::http_client::random_user_agent;

/// JavaScript to wait for page ready state.
#[cfg(feature = "browser")]
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// Launches one Chrome process per session, each with its own profile,
/// identity and download directory.
///
/// With a remote DevTools URL every session shares one browser, so each
/// gets its own browser context instead. Download behaviour is scoped to
/// that context and closing the session only disposes of it.
pub struct ChromeLauncher {
    config: BrowserEngineConfig,
    user_agents: Vec<String>,
}

impl ChromeLauncher {
    pub fn new(config: BrowserEngineConfig, user_agents: Vec<String>) -> Self {
        Self {
            config,
            user_agents,
        }
    }
}

#[cfg(feature = "browser")]
impl ChromeLauncher {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    fn find_chrome(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.config.chrome_path {
            if path.exists() {
                return Ok(path.clone());
            }
            warn!("Configured chrome_path {} does not exist", path.display());
        }

        for path in Self::CHROME_PATHS {
            let p = Path::new(path);
            if p.exists() {
                debug!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(path) = which::which(cmd) {
                debug!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(PaheError::browser(
            "Chrome/Chromium not found. Install it or set CHROME_PATH:\n\
             - Arch/Manjaro: sudo pacman -S chromium\n\
             - Ubuntu/Debian: sudo apt install chromium-browser\n\
             - Fedora: sudo dnf install chromium",
        ))
    }

    async fn launch_local(&self, download_dir: &Path, user_agent: &str) -> Result<Browser> {
        let chrome_path = self.find_chrome()?;
        // Separate profiles let several instances run side by side.
        let profile_dir = download_dir.join(".profile");

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(profile_dir)
            .request_timeout(Duration::from_secs(self.config.timeout));

        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        for arg in STEALTH_ARGS {
            builder = builder.arg(*arg);
        }
        builder = builder
            .arg(NO_IMAGES_ARG)
            .arg(format!("--user-agent={}", user_agent));
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| PaheError::browser(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| PaheError::browser(format!("failed to launch browser: {e}")))?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(browser)
    }

    async fn connect_remote(&self, url: &str) -> Result<Browser> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await?
            .json()
            .await?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaheError::browser("no webSocketDebuggerUrl in /json/version"))?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(self.config.timeout),
            ..Default::default()
        };
        let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| PaheError::browser(format!("failed to connect to {ws_url}: {e}")))?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(browser)
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self, download_dir: &Path) -> Result<Arc<dyn BrowserSession>> {
        let user_agent = random_user_agent(&self.user_agents);
        let download_dir = std::path::absolute(download_dir)?;

        let (browser, context) = match self.config.remote_url {
            Some(ref url) => {
                let browser = self.connect_remote(url).await?;
                let created = browser
                    .execute(CreateBrowserContextParams::default())
                    .await
                    .map_err(|e| PaheError::browser(format!("failed to create browser context: {e}")))?;
                (browser, Some(created.result.browser_context_id.clone()))
            }
            None => (self.launch_local(&download_dir, &user_agent).await?, None),
        };

        browser
            .execute(download_behavior(&download_dir, context.as_ref())?)
            .await
            .map_err(|e| PaheError::browser(format!("failed to set download behavior: {e}")))?;

        let mut target = CreateTargetParams::builder().url("about:blank");
        if let Some(ref id) = context {
            target = target.browser_context_id(id.clone());
        }
        let page = browser
            .new_page(target.build().map_err(PaheError::browser)?)
            .await
            .map_err(PaheError::browser)?;
        page.execute(SetUserAgentOverrideParams::new(user_agent.clone()))
            .await
            .map_err(PaheError::browser)?;

        info!(
            "Browser ready (downloads: {}, headless={})",
            download_dir.display(),
            self.config.headless
        );

        Ok(Arc::new(ChromeSession {
            browser: Mutex::new(browser),
            page,
            context,
            user_agent,
            config: self.config.clone(),
        }))
    }
}

/// Send downloads to `dir`, for one browser context or the whole browser.
#[cfg(feature = "browser")]
fn download_behavior(dir: &Path, context: Option<&BrowserContextId>) -> Result<SetDownloadBehaviorParams> {
    let mut builder = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Allow)
        .download_path(dir.to_string_lossy().to_string());
    if let Some(id) = context {
        builder = builder.browser_context_id(id.clone());
    }
    builder.build().map_err(PaheError::browser)
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self, _download_dir: &Path) -> Result<Arc<dyn BrowserSession>> {
        let _ = (&self.config, &self.user_agents);
        Err(PaheError::browser(
            "Browser support not compiled. Rebuild with: cargo build --features browser",
        ))
    }
}

/// A single-tab Chrome instance.
#[cfg(feature = "browser")]
pub struct ChromeSession {
    browser: Mutex<Browser>,
    page: Page,
    /// Set when attached to a shared remote browser.
    context: Option<BrowserContextId>,
    user_agent: String,
    config: BrowserEngineConfig,
}

#[cfg(feature = "browser")]
impl ChromeSession {
    async fn wait_for_page_ready(&self) {
        let timeout = Duration::from_secs(self.config.timeout);
        match tokio::time::timeout(timeout, self.page.evaluate(WAIT_FOR_READY_SCRIPT.to_string())).await {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
    }

    async fn apply_stealth(&self) {
        for script in STEALTH_SCRIPTS {
            if let Err(e) = self.page.evaluate(script.to_string()).await {
                debug!("Stealth script injection skipped: {}", e);
            }
        }
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!("Navigating to {}", url);
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| PaheError::browser(format!("invalid URL {url}: {e}")))?;

        let timeout = Duration::from_secs(self.config.timeout);
        tokio::time::timeout(timeout, self.page.execute(params))
            .await
            .map_err(|_| {
                PaheError::browser(format!(
                    "navigation timed out after {}s for {}",
                    self.config.timeout, url
                ))
            })?
            .map_err(|e| PaheError::browser(format!("navigation failed for {url}: {e}")))?;

        self.wait_for_page_ready().await;
        if self.config.stealth {
            self.apply_stealth().await;
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        self.page
            .url()
            .await
            .map_err(PaheError::browser)?
            .ok_or_else(|| PaheError::browser("page has no URL"))
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.map_err(PaheError::browser)
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| PaheError::browser(format!("{selector} not found: {e}")))?;
        element
            .click()
            .await
            .map_err(|e| PaheError::browser(format!("click on {selector} failed: {e}")))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script.to_string())
            .await
            .map_err(PaheError::browser)?;
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        let cookies = self.page.get_cookies().await.map_err(PaheError::browser)?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[BrowserCookie]) -> Result<()> {
        for cookie in cookies {
            let param = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone())
                .path(cookie.path.clone())
                .secure(cookie.secure)
                .build();
            match param {
                Ok(param) => {
                    if let Err(e) = self.page.set_cookie(param).await {
                        warn!("Failed to set cookie {}: {}", cookie.name, e);
                    }
                }
                Err(e) => warn!("Failed to build cookie {}: {}", cookie.name, e),
            }
        }
        Ok(())
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        if let Some(ref id) = self.context {
            browser
                .execute(DisposeBrowserContextParams::new(id.clone()))
                .await
                .map_err(|e| PaheError::browser(format!("failed to dispose browser context: {e}")))?;
            return Ok(());
        }
        browser.close().await.map_err(PaheError::browser)?;
        if let Err(e) = browser.wait().await {
            debug!("Browser process did not exit cleanly: {}", e);
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "browser"))]
mod tests {
    use super::*;

    #[test]
    fn test_download_behavior_scoped_to_context() {
        let dir = Path::new("/tmp/downloads/worker_1234");
        let id = BrowserContextId::new("ctx-1".to_string());

        let scoped = download_behavior(dir, Some(&id)).unwrap();
        assert_eq!(scoped.browser_context_id, Some(id));
        assert_eq!(scoped.download_path.as_deref(), Some("/tmp/downloads/worker_1234"));

        let global = download_behavior(dir, None).unwrap();
        assert!(global.browser_context_id.is_none());
    }
}
