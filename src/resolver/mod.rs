//! Link resolution: search, episode listing, quality selection and gateway
//! traversal down to a file-host URL.
//!
//! Each stage's failure is final for the episode; callers retry whole
//! episodes if they want to.

mod catalog;
mod gateway;
mod quality;

pub use catalog::{Catalog, EpisodeRef, SearchResult, SearchResults};
pub use gateway::{resolve_gateway, scan_for_file_host, GATEWAY_SELECTORS};
pub use quality::{parse_quality_options, select_quality, QualityOption, DOWNLOAD_MENU_LINKS};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{render_page, sync_browser_to_client, BrowserPool, BrowserSession, PageDocument};
use crate::config::Settings;
use crate::error::Result;
use crate::http_client::HttpClient;

/// Outcome of resolving one episode.
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    pub option: QualityOption,
    pub file_host_url: String,
}

/// Navigate a pooled browser to `url` so it solves the challenge there,
/// then copy the resulting cookies into `client`.
pub async fn clear_challenge(
    pool: &BrowserPool,
    client: &HttpClient,
    url: &str,
    wait: Duration,
) -> Result<()> {
    let lease = pool.acquire().await?;
    let result = async {
        let session = lease.session();
        session.navigate(url).await?;
        session.wait_for("body", wait).await?;
        sync_browser_to_client(session, client).await
    }
    .await;
    pool.release(lease).await;

    let bridged = result?;
    debug!("Challenge cleared for {} ({} cookies)", url, bridged);
    Ok(())
}

/// Episode page to file-host URL, for one worker's client and browser.
pub struct LinkResolver {
    client: HttpClient,
    settings: Arc<Settings>,
}

impl LinkResolver {
    pub fn new(client: HttpClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    /// Fetch the episode page, over HTTP when possible.
    ///
    /// A failed request, a challenge, or a page without the download menu
    /// sends the fetch through the browser, waiting for the menu to render.
    pub async fn episode_page(
        &self,
        session: &dyn BrowserSession,
        page_url: &str,
    ) -> Result<PageDocument> {
        match self.client.get_text(page_url).await {
            Ok(body) => {
                let doc = PageDocument::new(body).with_url(page_url);
                if doc.contains("#pickDownload") {
                    return Ok(doc);
                }
                debug!("Download menu missing from HTTP response for {}", page_url);
            }
            Err(e) => warn!("Episode page over HTTP failed ({}), using browser", e),
        }

        let doc = render_page(
            session,
            page_url,
            Some("#pickDownload"),
            self.settings.element_wait(),
        )
        .await?;
        sync_browser_to_client(session, &self.client).await?;
        Ok(doc)
    }

    /// Run the episode-page, quality and gateway stages.
    pub async fn resolve(
        &self,
        session: &dyn BrowserSession,
        page_url: &str,
        quality: u32,
        prefer_dub: bool,
    ) -> Result<ResolvedLink> {
        let doc = self.episode_page(session, page_url).await?;

        let options = parse_quality_options(&doc);
        let option = select_quality(&options, quality, prefer_dub, page_url)?;
        info!("Selected download option: {}", option.text);

        let file_host_url = resolve_gateway(session, &option.url, &self.settings).await?;
        Ok(ResolvedLink {
            option,
            file_host_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeLauncher, FakeSession};
    use crate::browser::BrowserPoolConfig;
    use crate::error::PaheError;
    use crate::rate_limit::Throttler;

    const EPISODE_PAGE: &str = r#"
        <div id="pickDownload">
          <a class="dropdown-item" href="https://pahe.win/low">SubsPlease · 720p</a>
          <a class="dropdown-item" href="https://pahe.win/high">SubsPlease · 1080p</a>
        </div>"#;

    fn settings() -> Arc<Settings> {
        Arc::new(Settings {
            // Nothing listens here, so the HTTP attempt fails fast.
            base_url: "http://127.0.0.1:9".to_string(),
            gateway_settle_min_secs: 0.0,
            gateway_settle_max_secs: 0.0,
            max_retries: 0,
            ..Settings::default()
        })
    }

    fn resolver(settings: &Arc<Settings>) -> LinkResolver {
        let client = HttpClient::from_settings(settings, Throttler::default()).unwrap();
        LinkResolver::new(client, settings.clone())
    }

    #[tokio::test]
    async fn test_resolves_through_browser_when_http_fails() {
        let page = "http://127.0.0.1:9/play/abc/ep1";
        let session = FakeSession::new()
            .with_page(page, EPISODE_PAGE)
            .with_redirect("https://pahe.win/high", "https://kwik.si/f/final");

        let settings = settings();
        let resolved = resolver(&settings)
            .resolve(&session, page, 1080, false)
            .await
            .unwrap();

        assert_eq!(resolved.option.resolution, 1080);
        assert_eq!(resolved.file_host_url, "https://kwik.si/f/final");
    }

    #[tokio::test]
    async fn test_page_without_menu_reports_no_options() {
        let page = "http://127.0.0.1:9/play/abc/ep2";
        let session = FakeSession::new().with_page(page, "<p>removed</p>");

        let settings = settings();
        let err = resolver(&settings)
            .resolve(&session, page, 1080, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PaheError::NoDownloadOptions(_)));
    }

    #[tokio::test]
    async fn test_clear_challenge_bridges_cookies() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::scripted(|_| {
            FakeSession::new().with_cookie("__ddg2_", "solved", "animepahe.ru")
        }));
        let pool = BrowserPool::new(
            launcher.clone(),
            BrowserPoolConfig {
                max_size: 1,
                root_dir: tmp.path().to_path_buf(),
            },
        );
        let client = HttpClient::builder(Throttler::default()).build().unwrap();

        clear_challenge(
            &pool,
            &client,
            "https://animepahe.ru/api?m=search&q=x",
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let header = client.cookie_header("https://animepahe.ru/").unwrap();
        assert!(header.contains("__ddg2_=solved"));
        assert_eq!(pool.idle().await, 1);
    }
}
