//! Removal of abandoned in-progress browser downloads.

use std::path::PathBuf;
use std::time::Duration;

use tokio::fs;
use tracing::{debug, info, warn};

use super::completion::IN_PROGRESS_SUFFIX;
use crate::error::Result;

async fn in_progress_files(dirs: &[PathBuf]) -> Result<Vec<(PathBuf, u64)>> {
    let mut found = Vec::new();
    for dir in dirs {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_name().to_string_lossy().ends_with(IN_PROGRESS_SUFFIX) {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                found.push((entry.path(), meta.len()));
            }
        }
    }
    Ok(found)
}

/// Delete `.crdownload` files in `dirs` whose size does not change across
/// `interval`. Files still growing belong to a live download and are kept.
pub async fn remove_stale_downloads(dirs: &[PathBuf], interval: Duration) -> Result<usize> {
    let before = in_progress_files(dirs).await?;
    if before.is_empty() {
        return Ok(0);
    }

    tokio::time::sleep(interval).await;

    let mut removed = 0;
    for (path, size) in before {
        let current = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };
        if current != size {
            debug!("Leaving active download {}", path.display());
            continue;
        }
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Removed stale partial download {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}
