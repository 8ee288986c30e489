//! Error types for the download pipeline.
//!
//! Every per-episode failure is expressed as a [`PaheError`] variant so the
//! orchestrator can decide between browser escalation, skipping, and retry
//! with a plain `match` instead of inspecting strings.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaheError {
    /// Transport failure or retryable status after the retry budget ran out.
    #[error("network failure for {url}: {reason}")]
    NetworkFailure { url: String, reason: String },

    /// Response body carried an anti-bot challenge marker.
    #[error("anti-bot challenge at {url} (marker: {marker})")]
    ProtectionChallenge { url: String, marker: String },

    /// The episode page lists no quality options at all.
    #[error("no download options on {0}")]
    NoDownloadOptions(String),

    #[error("link resolution failed: {0}")]
    LinkResolutionFailed(String),

    #[error("download did not complete within {secs}s in {}", dir.display())]
    DownloadTimeout { dir: PathBuf, secs: u64 },

    #[error("cannot move {} into place: {reason}", path.display())]
    FilesystemConflict { path: PathBuf, reason: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PaheError {
    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::NetworkFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn browser(reason: impl ToString) -> Self {
        Self::Browser(reason.to_string())
    }

    /// Whether a fresh attempt at the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure { .. })
    }

    /// Whether the error should send the caller to the browser instead of
    /// retrying the plain HTTP request.
    pub fn needs_browser(&self) -> bool {
        matches!(self, Self::ProtectionChallenge { .. })
    }

    /// Whether the error ends processing of the current episode.
    pub fn is_terminal_for_episode(&self) -> bool {
        !self.needs_browser()
    }

    /// Whether the worker's browser should be replaced before its next
    /// episode. A timed-out download may still be running in it.
    pub fn spoils_browser(&self) -> bool {
        matches!(self, Self::Browser(_) | Self::DownloadTimeout { .. })
    }
}

impl From<reqwest::Error> for PaheError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        Self::NetworkFailure {
            url,
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PaheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PaheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_escalates_instead_of_terminating() {
        let err = PaheError::ProtectionChallenge {
            url: "https://animepahe.ru/api".to_string(),
            marker: "DDoS-Guard".to_string(),
        };
        assert!(err.needs_browser());
        assert!(!err.is_terminal_for_episode());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_network_failure_is_retryable() {
        let err = PaheError::network("https://example.com", "connection reset");
        assert!(err.is_retryable());
        assert!(err.is_terminal_for_episode());
        assert_eq!(
            err.to_string(),
            "network failure for https://example.com: connection reset"
        );
    }

    #[test]
    fn test_browser_replaced_after_timeout() {
        let timeout = PaheError::DownloadTimeout {
            dir: PathBuf::from("/tmp/worker_1234"),
            secs: 180,
        };
        assert!(timeout.spoils_browser());
        assert!(PaheError::browser("tab crashed").spoils_browser());
        assert!(!PaheError::NoDownloadOptions("x".to_string()).spoils_browser());
    }

    #[test]
    fn test_display_timeout() {
        let err = PaheError::DownloadTimeout {
            dir: PathBuf::from("/tmp/worker_1234"),
            secs: 180,
        };
        assert_eq!(
            err.to_string(),
            "download did not complete within 180s in /tmp/worker_1234"
        );
    }

    #[test]
    fn test_display_no_options() {
        let err = PaheError::NoDownloadOptions("https://animepahe.ru/play/a/b".to_string());
        assert_eq!(
            err.to_string(),
            "no download options on https://animepahe.ru/play/a/b"
        );
    }
}
