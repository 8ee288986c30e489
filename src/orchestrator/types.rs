//! Batch data types and progress events.

use std::path::PathBuf;

/// One episode to fetch in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub episode: u32,
    /// Episode page carrying the download menu.
    pub page_url: String,
    pub output: PathBuf,
    pub quality: u32,
    pub prefer_dub: bool,
}

/// What to download in one batch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub title: String,
    pub anime_session: String,
    pub start: u32,
    pub end: Option<u32>,
    pub quality: u32,
    pub prefer_dub: bool,
}

/// Events emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Episode list fetched; `total` targets will be processed or skipped.
    Planned { total: usize, to_download: usize },
    Started {
        worker_id: usize,
        episode: u32,
        output: PathBuf,
    },
    Progress {
        worker_id: usize,
        episode: u32,
        bytes: u64,
        total: Option<u64>,
    },
    Completed {
        worker_id: usize,
        episode: u32,
        path: PathBuf,
    },
    /// Output already present and non-empty.
    Skipped { episode: u32, path: PathBuf },
    Failed {
        worker_id: usize,
        episode: u32,
        error: String,
    },
}

/// Outcome counts for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Episodes never started because the run was interrupted.
    pub not_started: usize,
}

impl BatchSummary {
    /// Episodes present on disk after the run.
    pub fn available(&self) -> usize {
        self.succeeded + self.skipped
    }
}
