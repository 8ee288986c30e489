//! Browser engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How browser instances are launched or reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Explicit Chrome/Chromium binary. Auto-detected when unset.
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,

    /// Navigation timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Inject stealth scripts after each navigation.
    #[serde(default = "default_stealth")]
    pub stealth: bool,
}

fn default_headless() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_stealth() -> bool {
    true
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            chrome_path: None,
            timeout: default_timeout(),
            proxy: None,
            chrome_args: Vec::new(),
            remote_url: None,
            stealth: default_stealth(),
        }
    }
}

impl BrowserEngineConfig {
    /// Apply `CHROME_PATH`, `BROWSER_URL` and `SOCKS_PROXY` from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(path) = std::env::var("CHROME_PATH").ok().filter(|s| !s.is_empty()) {
            self.chrome_path = Some(PathBuf::from(path));
        }
        if let Some(url) = std::env::var("BROWSER_URL").ok().filter(|s| !s.is_empty()) {
            self.remote_url = Some(url);
        }
        if let Some(proxy) = std::env::var("SOCKS_PROXY").ok().filter(|s| !s.is_empty()) {
            self.proxy = Some(proxy);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_uses_defaults() {
        let config: BrowserEngineConfig = toml::from_str("").unwrap();
        assert!(config.headless);
        assert!(config.stealth);
        assert_eq!(config.timeout, 30);
        assert!(config.remote_url.is_none());
    }
}
