//! Scripted browser sessions for unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{BrowserCookie, BrowserSession, SessionLauncher};
use crate::error::{PaheError, Result};

/// Side effect of clicking a selector.
#[derive(Debug, Clone)]
pub enum ClickAction {
    /// Write a file into the session's download directory.
    WriteFile { name: String, bytes: Vec<u8> },
    /// Change the current URL, serving whatever page is registered there.
    Navigate(String),
}

#[derive(Default)]
struct Script {
    pages: HashMap<String, String>,
    redirects: HashMap<String, String>,
    clicks: HashMap<String, ClickAction>,
    script_results: Vec<(String, Value)>,
}

pub struct FakeSession {
    script: Mutex<Script>,
    current: Mutex<String>,
    cookies: Mutex<Vec<BrowserCookie>>,
    clicked: Mutex<Vec<String>>,
    evaluated: Mutex<Vec<String>>,
    download_dir: Mutex<Option<PathBuf>>,
    user_agent: String,
    closed: AtomicBool,
    fail_close: bool,
    open_counter: Option<Arc<AtomicUsize>>,
}

impl Default for FakeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            current: Mutex::new("about:blank".to_string()),
            cookies: Mutex::new(Vec::new()),
            clicked: Mutex::new(Vec::new()),
            evaluated: Mutex::new(Vec::new()),
            download_dir: Mutex::new(None),
            user_agent: "FakeBrowser/1.0".to_string(),
            closed: AtomicBool::new(false),
            fail_close: false,
            open_counter: None,
        }
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .pages
            .insert(url.to_string(), html.to_string());
        self
    }

    /// Landing on `from` ends up at `to`.
    pub fn with_redirect(self, from: &str, to: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .redirects
            .insert(from.to_string(), to.to_string());
        self
    }

    pub fn with_click(self, selector: &str, action: ClickAction) -> Self {
        self.script
            .lock()
            .unwrap()
            .clicks
            .insert(selector.to_string(), action);
        self
    }

    /// Scripts containing `needle` evaluate to `value`.
    pub fn with_script_result(self, needle: &str, value: Value) -> Self {
        self.script
            .lock()
            .unwrap()
            .script_results
            .push((needle.to_string(), value));
        self
    }

    pub fn with_cookie(self, name: &str, value: &str, domain: &str) -> Self {
        self.cookies.lock().unwrap().push(BrowserCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
        });
        self
    }

    pub fn with_download_dir(self, dir: &Path) -> Self {
        *self.download_dir.lock().unwrap() = Some(dir.to_path_buf());
        self
    }

    pub fn clicked(&self) -> Vec<String> {
        self.clicked.lock().unwrap().clone()
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().unwrap().clone()
    }

    pub fn stored_cookies(&self) -> Vec<BrowserCookie> {
        self.cookies.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn page_source(&self) -> String {
        let current = self.current.lock().unwrap().clone();
        self.script
            .lock()
            .unwrap()
            .pages
            .get(&current)
            .cloned()
            .unwrap_or_else(|| "<html><body></body></html>".to_string())
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        let target = self
            .script
            .lock()
            .unwrap()
            .redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());
        *self.current.lock().unwrap() = target;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.page_source())
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<bool> {
        Ok(super::PageDocument::new(self.page_source()).contains(selector))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        if !super::PageDocument::new(self.page_source()).contains(selector) {
            return Err(PaheError::browser(format!("no element matches {selector}")));
        }
        self.clicked.lock().unwrap().push(selector.to_string());

        let action = self.script.lock().unwrap().clicks.get(selector).cloned();
        match action {
            Some(ClickAction::WriteFile { name, bytes }) => {
                let dir = self.download_dir.lock().unwrap().clone();
                if let Some(dir) = dir {
                    std::fs::write(dir.join(name), bytes)?;
                }
            }
            Some(ClickAction::Navigate(url)) => {
                *self.current.lock().unwrap() = url;
            }
            None => {}
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.evaluated.lock().unwrap().push(script.to_string());
        let result = self
            .script
            .lock()
            .unwrap()
            .script_results
            .iter()
            .find(|(needle, _)| script.contains(needle.as_str()))
            .map(|(_, v)| v.clone());
        Ok(result.unwrap_or(Value::Null))
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        Ok(self.cookies.lock().unwrap().clone())
    }

    async fn set_cookies(&self, cookies: &[BrowserCookie]) -> Result<()> {
        let mut stored = self.cookies.lock().unwrap();
        for cookie in cookies {
            stored.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
            stored.push(cookie.clone());
        }
        Ok(())
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(counter) = &self.open_counter {
                counter.fetch_sub(1, Ordering::SeqCst);
            }
        }
        if self.fail_close {
            return Err(PaheError::browser("connection already gone"));
        }
        Ok(())
    }
}

type SessionFactory = Box<dyn Fn(&Path) -> FakeSession + Send + Sync>;

/// Launcher that counts instances and hands out [`FakeSession`]s.
pub struct FakeLauncher {
    launched: AtomicUsize,
    open: Arc<AtomicUsize>,
    max_open: AtomicUsize,
    launch_delay: Duration,
    fail_launch: bool,
    fail_close: bool,
    factory: Option<SessionFactory>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self {
            launched: AtomicUsize::new(0),
            open: Arc::new(AtomicUsize::new(0)),
            max_open: AtomicUsize::new(0),
            launch_delay: Duration::ZERO,
            fail_launch: false,
            fail_close: false,
            factory: None,
            sessions: Mutex::new(Vec::new()),
        }
    }
}

impl FakeLauncher {
    pub fn with_launch_delay(delay: Duration) -> Self {
        Self {
            launch_delay: delay,
            ..Self::default()
        }
    }

    pub fn failing_launch() -> Self {
        Self {
            fail_launch: true,
            ..Self::default()
        }
    }

    pub fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::default()
        }
    }

    /// Build each session with `factory`, given its download directory.
    pub fn scripted(factory: impl Fn(&Path) -> FakeSession + Send + Sync + 'static) -> Self {
        Self {
            factory: Some(Box::new(factory)),
            ..Self::default()
        }
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self, download_dir: &Path) -> Result<Arc<dyn BrowserSession>> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        if self.fail_launch {
            return Err(PaheError::browser("chrome not found"));
        }

        let base = match &self.factory {
            Some(factory) => factory(download_dir),
            None => FakeSession::new(),
        };
        let mut session = base.with_download_dir(download_dir);
        session.fail_close = self.fail_close;
        session.open_counter = Some(self.open.clone());

        self.launched.fetch_add(1, Ordering::SeqCst);
        let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now_open, Ordering::SeqCst);

        let session = Arc::new(session);
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}
