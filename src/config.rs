//! Runtime settings.
//!
//! Settings are built once at startup (defaults, then an optional TOML file,
//! then environment overrides, then CLI flags) and handed to each component
//! by value or reference. Nothing reads configuration from globals.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browser::BrowserEngineConfig;
use crate::error::{PaheError, Result};
use crate::http_client::{RetryPolicy, DEFAULT_USER_AGENTS};
use crate::rate_limit::ThrottleConfig;

/// Config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "pahe-dl.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Catalog site root, without trailing slash.
    pub base_url: String,
    /// Host substrings identifying the final file host.
    pub file_host_domains: Vec<String>,

    pub requests_per_minute: u32,
    pub burst_capacity: u32,

    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Read timeout for media streams, which can stall longer than pages.
    pub download_read_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub retry_statuses: Vec<u16>,
    /// Case-insensitive substrings that mark an anti-bot challenge page.
    pub challenge_markers: Vec<String>,
    pub user_agents: Vec<String>,

    pub output_dir: PathBuf,
    pub quality: u32,
    pub prefer_dub: bool,
    /// Parallel workers; 1 means serial processing with jitter.
    pub workers: usize,
    /// Extra whole-episode attempts after a network failure.
    pub episode_retries: u32,

    pub jitter_min_secs: f64,
    pub jitter_max_secs: f64,
    pub pagination_delay_min_secs: f64,
    pub pagination_delay_max_secs: f64,
    pub gateway_settle_min_secs: f64,
    pub gateway_settle_max_secs: f64,
    pub element_wait_secs: u64,
    pub download_wait_secs: f64,
    pub poll_interval_secs: f64,
    /// Randomized pauses around file-host interactions.
    pub human_delays: bool,

    pub browser: BrowserEngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://animepahe.ru".to_string(),
            file_host_domains: vec!["kwik.cx".to_string(), "kwik.si".to_string()],
            requests_per_minute: 20,
            burst_capacity: 3,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            download_read_timeout_secs: 300,
            max_retries: 3,
            backoff_factor: 1.5,
            retry_statuses: vec![429, 500, 502, 503, 504],
            challenge_markers: vec![
                "DDoS-Guard".to_string(),
                "Are you a human".to_string(),
                "captcha".to_string(),
            ],
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            output_dir: PathBuf::from("downloads"),
            quality: 1080,
            prefer_dub: false,
            workers: 3,
            episode_retries: 1,
            jitter_min_secs: 1.0,
            jitter_max_secs: 3.5,
            pagination_delay_min_secs: 1.5,
            pagination_delay_max_secs: 3.0,
            gateway_settle_min_secs: 4.0,
            gateway_settle_max_secs: 6.0,
            element_wait_secs: 20,
            download_wait_secs: 180.0,
            poll_interval_secs: 2.0,
            human_delays: true,
            browser: BrowserEngineConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, or auto-discover one.
    ///
    /// Discovery order: `./pahe-dl.toml`, then `<config dir>/pahe-dl/config.toml`.
    /// Missing files fall back to defaults; unreadable or malformed files are errors.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => discover_config_file(),
        };

        let settings = match path {
            Some(path) => {
                tracing::debug!("Loading settings from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        Ok(settings.with_env_overrides())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PaheError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PaheError::Config(e.to_string()))
    }

    /// Apply `PAHE_*`, `CHROME_PATH` and `BROWSER_URL` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = env_value("PAHE_BASE_URL") {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = env_value("PAHE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(workers) = env_value("PAHE_WORKERS").and_then(|v| v.parse().ok()) {
            self.workers = workers;
        }
        if let Some(rate) = env_value("PAHE_RATE").and_then(|v| v.parse().ok()) {
            self.requests_per_minute = rate;
        }
        self.browser = self.browser.with_env_overrides();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PaheError::Config("workers must be at least 1".into()));
        }
        if self.requests_per_minute == 0 {
            return Err(PaheError::Config("requests_per_minute must be positive".into()));
        }
        if self.burst_capacity == 0 {
            return Err(PaheError::Config("burst_capacity must be positive".into()));
        }
        if self.backoff_factor.is_nan() || self.backoff_factor <= 0.0 {
            return Err(PaheError::Config("backoff_factor must be positive".into()));
        }
        for (name, min, max) in [
            ("jitter", self.jitter_min_secs, self.jitter_max_secs),
            (
                "pagination_delay",
                self.pagination_delay_min_secs,
                self.pagination_delay_max_secs,
            ),
            (
                "gateway_settle",
                self.gateway_settle_min_secs,
                self.gateway_settle_max_secs,
            ),
        ] {
            if min < 0.0 || min > max {
                return Err(PaheError::Config(format!(
                    "{name} range is invalid ({min}..{max})"
                )));
            }
        }
        if self.poll_interval_secs.is_nan()
            || self.poll_interval_secs <= 0.0
            || self.download_wait_secs.is_nan()
            || self.download_wait_secs < 0.0
        {
            return Err(PaheError::Config(
                "poll_interval_secs must be positive and download_wait_secs non-negative".into(),
            ));
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(PaheError::Config(format!("invalid base_url {}", self.base_url)));
        }
        if self.user_agents.is_empty() {
            return Err(PaheError::Config("user_agents must not be empty".into()));
        }
        Ok(())
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            requests_per_minute: self.requests_per_minute,
            burst_capacity: self.burst_capacity,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_factor: self.backoff_factor,
            retry_statuses: self.retry_statuses.clone(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn download_read_timeout(&self) -> Duration {
        Duration::from_secs(self.download_read_timeout_secs)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_secs)
    }

    pub fn download_wait(&self) -> Duration {
        Duration::from_secs_f64(self.download_wait_secs.max(0.0))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs.max(0.0))
    }

    /// Whether a URL's host is one of the configured file hosts or a
    /// subdomain of one.
    pub fn is_file_host(&self, url: &str) -> bool {
        let Some(host) = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        else {
            return false;
        };
        self.file_host_domains.iter().any(|domain| {
            let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
            !domain.is_empty()
                && (host == domain
                    || host
                        .strip_suffix(domain.as_str())
                        .is_some_and(|rest| rest.ends_with('.')))
        })
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn discover_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|d| d.join("pahe-dl").join("config.toml"))
        .filter(|p| p.exists())
}
