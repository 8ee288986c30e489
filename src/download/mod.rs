//! Download completion engine.
//!
//! Strategies run in a fixed order and the first success wins: a direct
//! HTTP stream of the resolved URL, then the browser-driven file-host flow.

mod cleanup;
mod completion;
mod form;
mod stream;

pub use cleanup::remove_stale_downloads;
pub use completion::{
    is_media_file, CompletionState, CompletionWatcher, DirSnapshot, IN_PROGRESS_SUFFIX, MEDIA_EXTENSIONS,
};
pub use form::{
    registrable_origin, FileHostDownload, FileHostForm, DIRECT_LINK_SELECTOR, SUBMIT_SELECTORS,
};
pub use stream::{origin_of, part_path, save_response, stream_to_file, ProgressFn};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::browser::BrowserLease;
use crate::config::Settings;
use crate::error::Result;
use crate::http_client::HttpClient;

/// Fetches resolved file-host URLs for one worker.
pub struct DownloadEngine {
    client: HttpClient,
    settings: Arc<Settings>,
}

impl DownloadEngine {
    pub fn new(client: HttpClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    /// Land the media behind `url` at `output`.
    pub async fn fetch(
        &self,
        lease: &BrowserLease,
        url: &str,
        output: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf> {
        match stream_to_file(&self.client, url, output, None, progress).await {
            Ok(bytes) => {
                info!("Streamed {} bytes directly", bytes);
                return Ok(output.to_path_buf());
            }
            Err(e) => debug!("Direct stream not possible ({}), using browser", e),
        }

        FileHostDownload {
            client: &self.client,
            settings: &self.settings,
            session: lease.session(),
            download_dir: lease.download_dir(),
        }
        .run(url, output, progress)
        .await
    }
}
