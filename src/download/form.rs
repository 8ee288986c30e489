//! File-host download through a browser: form submission and its fallbacks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::completion::{CompletionWatcher, DirSnapshot};
use super::stream::{save_response, stream_to_file, ProgressFn};
use crate::browser::{sync_browser_to_client, sync_client_to_browser, BrowserSession, PageDocument};
use crate::config::Settings;
use crate::error::{PaheError, Result};
use crate::http_client::HttpClient;
use crate::random;

/// Submission controls, tried in order.
pub const SUBMIT_SELECTORS: &[&str] = &[
    "form button.button.is-success",
    "button.button.is-success",
    "form input[type='submit']",
    "a.button.is-success",
];

/// Anchors that point straight at the media once the form is submitted.
pub const DIRECT_LINK_SELECTOR: &str = "a[download], a.button.is-success";

const DOWNLOAD_FORM: &str = "form[action*='/d/']";
const TOKEN_INPUT: &str = "input[name='_token']";
const SCROLL_SCRIPT: &str = "window.scrollBy(0, window.innerHeight * 0.4);";
const SUBMIT_SCRIPT: &str = r#"(() => {
    const form = document.querySelector("form[action*='/d/']") || document.querySelector('form');
    if (!form) { return false; }
    form.submit();
    return true;
})()"#;

const CONTROL_WAIT: Duration = Duration::from_secs(5);
const LINK_WAIT: Duration = Duration::from_secs(10);

/// Form action and anti-forgery token scraped before submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHostForm {
    pub action: String,
    pub token: Option<String>,
    pub page_url: String,
}

impl FileHostForm {
    pub fn from_page(doc: &PageDocument) -> Option<Self> {
        let form = doc
            .find_first(DOWNLOAD_FORM)
            .or_else(|| doc.find_first("form"))?;
        let action = form.attr("action").filter(|a| !a.is_empty())?;
        let token = PageDocument::new(form.outer_html.clone())
            .find_first(TOKEN_INPUT)
            .and_then(|input| input.attr("value").map(|v| v.to_string()));
        Some(Self {
            action: doc.absolute_url(action),
            token,
            page_url: doc.url().unwrap_or_default().to_string(),
        })
    }

    /// Headers a real browser would send when posting this form.
    pub fn replay_headers(&self, user_agent: &str) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("User-Agent", user_agent.to_string()),
            ("Referer", self.page_url.clone()),
        ];
        if let Some(origin) = registrable_origin(&self.page_url) {
            headers.push(("Origin", origin));
        }
        headers
    }
}

/// `scheme://` plus the last two labels of the host.
pub fn registrable_origin(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let labels: Vec<&str> = host.split('.').collect();
    let tail = labels[labels.len().saturating_sub(2)..].join(".");
    Some(format!("{}://{}", parsed.scheme(), tail))
}

/// Drives one file-host page in a worker's browser.
pub struct FileHostDownload<'a> {
    pub client: &'a HttpClient,
    pub settings: &'a Settings,
    pub session: &'a dyn BrowserSession,
    pub download_dir: &'a Path,
}

impl FileHostDownload<'_> {
    async fn pause(&self, min_secs: f64, max_secs: f64) {
        if self.settings.human_delays {
            tokio::time::sleep(random::jitter(min_secs, max_secs)).await;
        }
    }

    /// Submit the file-host form and land the media at `output`.
    ///
    /// After submission the first route that works wins: a download the
    /// browser already started, a direct link on the page, a replay of the
    /// form as an HTTP POST, and finally waiting on the download directory.
    pub async fn run(&self, url: &str, output: &Path, progress: ProgressFn<'_>) -> Result<PathBuf> {
        info!("Processing file-host page: {}", url);
        sync_client_to_browser(self.client, self.session, url).await?;
        self.session.navigate(url).await?;
        self.pause(2.0, 3.0).await;

        let page_url = self
            .session
            .current_url()
            .await
            .unwrap_or_else(|_| url.to_string());
        let before = PageDocument::new(self.session.content().await?).with_url(page_url);
        let form = FileHostForm::from_page(&before);

        if let Err(e) = self.session.evaluate(SCROLL_SCRIPT).await {
            debug!("Scroll failed: {}", e);
        }
        self.pause(0.8, 1.5).await;

        // Whatever is already in the worker directory belongs to earlier episodes.
        let baseline = DirSnapshot::take(self.download_dir).await?;
        let submitted = self.submit().await?;
        self.pause(3.5, 5.5).await;

        let watcher = CompletionWatcher::new(self.download_dir, output)
            .with_baseline(baseline)
            .with_timeout(self.settings.download_wait())
            .with_poll_interval(self.settings.poll_interval());

        if submitted && watcher.has_activity().await? {
            info!("Browser download started, waiting for it to finish");
            return watcher.wait().await;
        }

        if let Some(link) = self.direct_link().await? {
            info!("Found direct download link: {}", link);
            match stream_to_file(self.client, &link, output, Some(url), progress).await {
                Ok(_) => return Ok(output.to_path_buf()),
                Err(e) => warn!("Direct link failed: {}", e),
            }
        }

        if let Some(form) = form.as_ref().filter(|f| f.token.is_some()) {
            match self.replay(form, output, progress).await {
                Ok(true) => return Ok(output.to_path_buf()),
                Ok(false) => {}
                Err(e) => warn!("Form replay failed: {}", e),
            }
        }

        if !submitted {
            return Err(PaheError::LinkResolutionFailed(format!(
                "no way to submit the download form on {url}"
            )));
        }
        info!("Waiting for browser download to complete...");
        watcher.wait().await
    }

    /// Click the first available control, else submit the form by script.
    async fn submit(&self) -> Result<bool> {
        for selector in SUBMIT_SELECTORS {
            if !self.session.wait_for(selector, CONTROL_WAIT).await? {
                continue;
            }
            self.pause(0.5, 1.0).await;
            match self.session.click(selector).await {
                Ok(()) => {
                    info!("Clicked download button with selector: {}", selector);
                    return Ok(true);
                }
                Err(e) => debug!("Click on {} failed: {}", selector, e),
            }
        }

        match self.session.evaluate(SUBMIT_SCRIPT).await {
            Ok(serde_json::Value::Bool(true)) => {
                info!("Form submitted via script");
                Ok(true)
            }
            Ok(_) => {
                warn!("No download form found to submit");
                Ok(false)
            }
            Err(e) => {
                warn!("Failed to submit form by script: {}", e);
                Ok(false)
            }
        }
    }

    async fn direct_link(&self) -> Result<Option<String>> {
        let wait = LINK_WAIT.min(self.settings.element_wait());
        if !self.session.wait_for(DIRECT_LINK_SELECTOR, wait).await? {
            return Ok(None);
        }
        let current = self.session.current_url().await?;
        let doc = PageDocument::new(self.session.content().await?).with_url(current.clone());
        Ok(doc
            .find(DIRECT_LINK_SELECTOR)
            .into_iter()
            .filter_map(|a| a.attr("href").map(|h| doc.absolute_url(h)))
            .find(|href| href.starts_with("http") && *href != current))
    }

    /// POST the form's token from the HTTP client with the browser's
    /// identity. `Ok(false)` when the response is not a file.
    async fn replay(&self, form: &FileHostForm, output: &Path, progress: ProgressFn<'_>) -> Result<bool> {
        let Some(token) = form.token.as_deref() else {
            return Ok(false);
        };
        sync_browser_to_client(self.session, self.client).await?;
        info!("Submitting form over HTTP to: {}", form.action);

        let headers = form.replay_headers(self.session.user_agent());
        let response = self
            .client
            .post_form(&form.action, &[("_token", token)], &headers)
            .await?;
        if !response.is_success() || !response.is_file() {
            debug!(
                "Form replay returned HTTP {} ({})",
                response.status,
                response.content_type().unwrap_or("no content type")
            );
            return Ok(false);
        }

        info!(
            "Received file response with content type: {}",
            response.content_type().unwrap_or("unknown")
        );
        save_response(response, output, progress).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{ClickAction, FakeSession};
    use crate::http_client::RetryPolicy;
    use crate::rate_limit::Throttler;

    const FILE_HOST_PAGE: &str = r#"
        <form action="https://kwik.si/d/abc" method="POST">
          <input type="hidden" name="_token" value="tok123">
          <button class="button is-success" type="submit">Download</button>
        </form>"#;

    fn settings() -> Settings {
        Settings {
            human_delays: false,
            download_wait_secs: 2.0,
            poll_interval_secs: 0.02,
            ..Settings::default()
        }
    }

    fn client() -> HttpClient {
        HttpClient::builder(Throttler::default())
            .user_agent("TestAgent/1.0")
            .build()
            .unwrap()
    }

    fn no_progress(_: u64, _: Option<u64>) {}

    #[test]
    fn test_form_scrape() {
        let doc = PageDocument::new(FILE_HOST_PAGE).with_url("https://kwik.si/f/abc");
        let form = FileHostForm::from_page(&doc).unwrap();
        assert_eq!(form.action, "https://kwik.si/d/abc");
        assert_eq!(form.token.as_deref(), Some("tok123"));

        let headers = form.replay_headers("UA/1");
        assert!(headers.contains(&("Referer", "https://kwik.si/f/abc".to_string())));
        assert!(headers.contains(&("Origin", "https://kwik.si".to_string())));
    }

    #[test]
    fn test_registrable_origin() {
        assert_eq!(
            registrable_origin("https://eu-11.files.kwik.si/f/x").as_deref(),
            Some("https://kwik.si")
        );
        assert_eq!(registrable_origin("http://localhost/").as_deref(), Some("http://localhost"));
    }

    #[tokio::test]
    async fn test_click_starts_browser_download() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = tmp.path().join("worker_1111");
        std::fs::create_dir_all(&dl).unwrap();
        let output = tmp.path().join("Show").join("Show - Episode 2.mp4");
        std::fs::write(dl.join("AnimePahe_Show_-_01_1080p.mp4"), b"episode one").unwrap();

        let session = FakeSession::new()
            .with_page("https://kwik.si/f/abc", FILE_HOST_PAGE)
            .with_download_dir(&dl)
            .with_click(
                "form button.button.is-success",
                ClickAction::WriteFile {
                    name: "AnimePahe_Show_-_02_1080p.mp4".to_string(),
                    bytes: b"episode two".to_vec(),
                },
            );
        let client = client();
        let settings = settings();
        let flow = FileHostDownload {
            client: &client,
            settings: &settings,
            session: &session,
            download_dir: &dl,
        };

        let placed = flow
            .run("https://kwik.si/f/abc", &output, &no_progress)
            .await
            .unwrap();

        assert_eq!(placed, output);
        assert_eq!(std::fs::read(&output).unwrap(), b"episode two");
        assert!(dl.join("AnimePahe_Show_-_01_1080p.mp4").exists());
        assert_eq!(session.clicked(), vec!["form button.button.is-success"]);
        assert!(session.evaluated().iter().any(|s| s.contains("scrollBy")));
    }

    #[tokio::test]
    async fn test_falls_back_to_script_submit() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("out.mp4");
        std::fs::write(tmp.path().join("earlier_episode.mp4"), b"earlier").unwrap();
        // Nothing listens on port 9, so the POST replay fails fast.
        let page_url = "http://127.0.0.1:9/f/abc";
        let page = r#"<form action="/d/abc"><input name="_token" value="t"></form>"#;
        let session = FakeSession::new()
            .with_page(page_url, page)
            .with_script_result("form.submit()", serde_json::Value::Bool(true));
        let client = HttpClient::builder(Throttler::default())
            .retry_policy(RetryPolicy::none())
            .build()
            .unwrap();
        let settings = Settings {
            download_wait_secs: 0.1,
            ..settings()
        };
        let flow = FileHostDownload {
            client: &client,
            settings: &settings,
            session: &session,
            download_dir: tmp.path(),
        };

        let err = flow.run(page_url, &output, &no_progress).await.unwrap_err();

        assert!(session.evaluated().iter().any(|s| s.contains("form.submit()")));
        assert!(session.clicked().is_empty());
        assert!(matches!(err, PaheError::DownloadTimeout { .. }));
        assert!(!output.exists());
        assert!(tmp.path().join("earlier_episode.mp4").exists());
    }

    #[tokio::test]
    async fn test_page_without_form_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let session = FakeSession::new().with_page("https://kwik.si/f/gone", "<p>File not found</p>");
        let client = client();
        let settings = settings();
        let flow = FileHostDownload {
            client: &client,
            settings: &settings,
            session: &session,
            download_dir: tmp.path(),
        };

        let err = flow
            .run("https://kwik.si/f/gone", &tmp.path().join("x.mp4"), &no_progress)
            .await
            .unwrap_err();
        assert!(matches!(err, PaheError::LinkResolutionFailed(_)));
    }
}
