//! Detection of browser-driven downloads finishing in a worker directory.
//!
//! Browsers give no completion callback, so the directory is sampled:
//! `Pending` until a media file shows up, `Writing` while its size moves,
//! `Stable` once two samples agree, `Moved` after it is renamed into place.
//!
//! Worker directories are reused across episodes, so a watcher can carry a
//! [`DirSnapshot`] taken before submission. Entries that are still exactly
//! as they were in the snapshot belong to an earlier episode and are ignored.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PaheError, Result};

/// Extensions accepted as finished media files.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "ts"];

/// Suffix Chrome gives in-progress downloads.
pub const IN_PROGRESS_SUFFIX: &str = ".crdownload";

/// Names, sizes and modification times of a directory's entries.
#[derive(Debug, Clone, Default)]
pub struct DirSnapshot {
    entries: HashMap<OsString, (u64, Option<SystemTime>)>,
}

impl DirSnapshot {
    /// Record `dir` as it is now. A missing directory gives an empty snapshot.
    pub async fn take(dir: &Path) -> Result<Self> {
        let mut entries = HashMap::new();
        match fs::read_dir(dir).await {
            Ok(mut listing) => {
                while let Some(entry) = listing.next_entry().await? {
                    let Ok(meta) = entry.metadata().await else {
                        continue;
                    };
                    entries.insert(entry.file_name(), (meta.len(), meta.modified().ok()));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self { entries })
    }

    /// Whether `name` was recorded with this exact size and mtime.
    pub fn is_unchanged(&self, name: &OsStr, meta: &std::fs::Metadata) -> bool {
        self.entries
            .get(name)
            .is_some_and(|(len, modified)| *len == meta.len() && *modified == meta.modified().ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What one pass over the download directory found.
#[derive(Debug, Default)]
struct Scan {
    in_progress: bool,
    newest: Option<(PathBuf, u64, SystemTime)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionState {
    Pending,
    Writing { path: PathBuf, size: u64 },
    Stable { path: PathBuf },
    Moved { path: PathBuf },
}

/// Watches one download directory for the file that should become `target`.
#[derive(Debug, Clone)]
pub struct CompletionWatcher {
    dir: PathBuf,
    target: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    baseline: DirSnapshot,
}

impl CompletionWatcher {
    pub fn new(dir: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            target: target.into(),
            timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(2),
            baseline: DirSnapshot::default(),
        }
    }

    /// Ignore entries unchanged since `baseline` was taken.
    pub fn with_baseline(mut self, baseline: DirSnapshot) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Sample until the download is in place or the timeout passes.
    pub async fn wait(&self) -> Result<PathBuf> {
        let started = Instant::now();
        let mut state = CompletionState::Pending;

        loop {
            state = self.step(state).await?;
            match &state {
                CompletionState::Moved { path } => return Ok(path.clone()),
                CompletionState::Stable { .. } => continue,
                CompletionState::Pending | CompletionState::Writing { .. } => {}
            }

            if started.elapsed() >= self.timeout {
                warn!(
                    "Download timed out after {}s in {}",
                    self.timeout.as_secs(),
                    self.dir.display()
                );
                return Err(PaheError::DownloadTimeout {
                    dir: self.dir.clone(),
                    secs: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Advance the state machine by one observation.
    pub async fn step(&self, state: CompletionState) -> Result<CompletionState> {
        match state {
            CompletionState::Moved { path } => Ok(CompletionState::Moved { path }),
            CompletionState::Stable { path } => {
                let path = self.move_into_place(&path).await?;
                Ok(CompletionState::Moved { path })
            }
            previous => {
                let Some((path, size)) = self.observe().await? else {
                    return Ok(CompletionState::Pending);
                };
                match previous {
                    CompletionState::Writing {
                        path: seen,
                        size: seen_size,
                    } if seen == path && seen_size == size => {
                        debug!("{} stable at {} bytes", path.display(), size);
                        Ok(CompletionState::Stable { path })
                    }
                    _ => Ok(CompletionState::Writing { path, size }),
                }
            }
        }
    }

    /// Whether a download has appeared since the baseline: a new or
    /// changed in-progress file, or a new finished media file.
    pub async fn has_activity(&self) -> Result<bool> {
        let scan = self.scan().await?;
        Ok(scan.in_progress || scan.newest.is_some())
    }

    /// Current best candidate and its size.
    ///
    /// Nothing is reported while a fresh in-progress file exists. The
    /// target itself only counts when no fresher candidate is present,
    /// which makes re-running detection on a finished download succeed
    /// without a new file.
    async fn observe(&self) -> Result<Option<(PathBuf, u64)>> {
        let scan = self.scan().await?;
        if scan.in_progress {
            return Ok(None);
        }
        if let Some((path, size, _)) = scan.newest {
            return Ok(Some((path, size)));
        }

        match fs::metadata(&self.target).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(Some((self.target.clone(), meta.len()))),
            _ => Ok(None),
        }
    }

    async fn scan(&self) -> Result<Scan> {
        let mut scan = Scan::default();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(scan),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_name = entry.file_name();
            // Entries can vanish between listing and stat while Chrome renames.
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() || self.baseline.is_unchanged(&file_name, &meta) {
                continue;
            }
            if file_name.to_string_lossy().ends_with(IN_PROGRESS_SUFFIX) {
                scan.in_progress = true;
                continue;
            }
            if path == self.target || Some(file_name.as_os_str()) == self.target.file_name() {
                continue;
            }
            if !is_media_file(&path) || meta.len() == 0 {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if scan.newest.as_ref().map_or(true, |(_, _, m)| modified > *m) {
                scan.newest = Some((path, meta.len(), modified));
            }
        }
        Ok(scan)
    }

    /// Rename `source` to the target, replacing a stale target first.
    async fn move_into_place(&self, source: &Path) -> Result<PathBuf> {
        if source == self.target {
            info!("Download already in place: {}", self.target.display());
            return Ok(self.target.clone());
        }
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent).await?;
        }

        if fs::try_exists(&self.target).await.unwrap_or(false) {
            warn!("Replacing stale file {}", self.target.display());
            fs::remove_file(&self.target)
                .await
                .map_err(|e| self.conflict(format!("cannot remove stale target: {e}")))?;
        }

        if let Err(e) = fs::rename(source, &self.target).await {
            // Worker directories may sit on another filesystem.
            debug!("Rename failed ({}), copying instead", e);
            fs::copy(source, &self.target)
                .await
                .map_err(|e| self.conflict(format!("cannot move download into place: {e}")))?;
            let _ = fs::remove_file(source).await;
        }

        info!("Download completed and moved to: {}", self.target.display());
        Ok(self.target.clone())
    }

    fn conflict(&self, reason: String) -> PaheError {
        PaheError::FilesystemConflict {
            path: self.target.clone(),
            reason,
        }
    }
}

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(dir: &Path, target: &Path) -> CompletionWatcher {
        CompletionWatcher::new(dir, target)
            .with_timeout(Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_state_progression() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = tmp.path().join("worker_1234");
        std::fs::create_dir_all(&dl).unwrap();
        let target = tmp.path().join("Show").join("Show - Episode 1.mp4");
        let w = watcher(&dl, &target);

        let state = w.step(CompletionState::Pending).await.unwrap();
        assert_eq!(state, CompletionState::Pending);

        std::fs::write(dl.join("video.mp4.crdownload"), b"partial").unwrap();
        let state = w.step(state).await.unwrap();
        assert_eq!(state, CompletionState::Pending);

        std::fs::rename(dl.join("video.mp4.crdownload"), dl.join("video.mp4")).unwrap();
        let state = w.step(state).await.unwrap();
        assert!(matches!(state, CompletionState::Writing { size: 7, .. }));

        let state = w.step(state).await.unwrap();
        assert_eq!(
            state,
            CompletionState::Stable {
                path: dl.join("video.mp4")
            }
        );

        let state = w.step(state).await.unwrap();
        assert_eq!(state, CompletionState::Moved { path: target.clone() });
        assert_eq!(std::fs::read(&target).unwrap(), b"partial");
        assert!(!dl.join("video.mp4").exists());
    }

    #[tokio::test]
    async fn test_growing_file_is_not_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out.mp4");
        let file = tmp.path().join("dl.mkv");
        let w = watcher(tmp.path(), &target);

        std::fs::write(&file, b"1").unwrap();
        let state = w.step(CompletionState::Pending).await.unwrap();
        std::fs::write(&file, b"12").unwrap();
        let state = w.step(state).await.unwrap();
        assert!(matches!(state, CompletionState::Writing { size: 2, .. }));
    }

    #[tokio::test]
    async fn test_wait_replaces_stale_target() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = tmp.path().join("dl");
        std::fs::create_dir_all(&dl).unwrap();
        let target = tmp.path().join("Episode 2.mp4");
        std::fs::write(&target, b"old").unwrap();
        std::fs::write(dl.join("fresh.mp4"), b"new contents").unwrap();

        let placed = watcher(&dl, &target).wait().await.unwrap();
        assert_eq!(placed, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"new contents");
    }

    #[tokio::test]
    async fn test_rerun_on_completed_target_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("Episode 3.mp4");
        std::fs::write(&target, b"done").unwrap();
        let w = watcher(tmp.path(), &target);

        assert_eq!(w.wait().await.unwrap(), target);
        assert_eq!(w.wait().await.unwrap(), target);
        assert_eq!(std::fs::read(&target).unwrap(), b"done");
    }

    #[tokio::test]
    async fn test_prefers_newest_candidate_and_ignores_target_name() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = tmp.path().join("dl");
        std::fs::create_dir_all(&dl).unwrap();
        let target = tmp.path().join("Episode 4.mp4");

        std::fs::write(dl.join("Episode 4.mp4"), b"leftover").unwrap();
        std::fs::write(dl.join("older.mp4"), b"older").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(dl.join("newer.mp4"), b"newer").unwrap();

        watcher(&dl, &target).wait().await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"newer");
    }

    #[tokio::test]
    async fn test_times_out_without_media() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        let w = CompletionWatcher::new(tmp.path(), tmp.path().join("x.mp4"))
            .with_timeout(Duration::from_millis(100))
            .with_poll_interval(Duration::from_millis(20));

        let err = w.wait().await.unwrap_err();
        assert!(matches!(err, PaheError::DownloadTimeout { .. }));
    }

    #[tokio::test]
    async fn test_leftover_from_earlier_episode_is_not_taken() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = tmp.path().join("worker_4321");
        std::fs::create_dir_all(&dl).unwrap();
        std::fs::write(dl.join("AnimePahe_Show_-_04_1080p.mp4"), b"episode four").unwrap();
        let target = tmp.path().join("Show - Episode 5.mp4");

        let baseline = DirSnapshot::take(&dl).await.unwrap();
        assert_eq!(baseline.len(), 1);
        let w = CompletionWatcher::new(&dl, &target)
            .with_baseline(baseline)
            .with_timeout(Duration::from_millis(150))
            .with_poll_interval(Duration::from_millis(20));

        assert!(!w.has_activity().await.unwrap());
        let err = w.wait().await.unwrap_err();
        assert!(matches!(err, PaheError::DownloadTimeout { .. }));
        assert!(!target.exists());
        assert!(dl.join("AnimePahe_Show_-_04_1080p.mp4").exists());
    }

    #[tokio::test]
    async fn test_abandoned_partial_does_not_block_new_download() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = tmp.path().join("worker_5678");
        std::fs::create_dir_all(&dl).unwrap();
        std::fs::write(dl.join("abandoned.mp4.crdownload"), b"half").unwrap();
        std::fs::write(dl.join("older_episode.mp4"), b"old").unwrap();
        let target = tmp.path().join("Show - Episode 6.mp4");

        let w = watcher(&dl, &target).with_baseline(DirSnapshot::take(&dl).await.unwrap());
        std::fs::write(dl.join("fresh_episode.mp4"), b"episode six").unwrap();

        assert!(w.has_activity().await.unwrap());
        assert_eq!(w.wait().await.unwrap(), target);
        assert_eq!(std::fs::read(&target).unwrap(), b"episode six");
        assert!(dl.join("older_episode.mp4").exists());
    }

    #[tokio::test]
    async fn test_fresh_partial_still_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out.mp4");
        let w = watcher(tmp.path(), &target).with_baseline(DirSnapshot::take(tmp.path()).await.unwrap());

        std::fs::write(tmp.path().join("done.mp4"), b"done").unwrap();
        std::fs::write(tmp.path().join("next.mp4.crdownload"), b"x").unwrap();

        assert!(w.has_activity().await.unwrap());
        assert_eq!(w.step(CompletionState::Pending).await.unwrap(), CompletionState::Pending);
    }

    #[test]
    fn test_media_extensions() {
        assert!(is_media_file(Path::new("a.MP4")));
        assert!(is_media_file(Path::new("a.ts")));
        assert!(!is_media_file(Path::new("a.mp4.crdownload")));
        assert!(!is_media_file(Path::new("a.part")));
    }
}
