//! Episode orchestration: plan a batch, drive each episode through
//! resolution and download, and count the outcomes.
//!
//! A failing episode is logged and counted; it never stops the batch.

mod paths;
mod types;

pub use paths::{anime_dir, episode_path, is_present, sanitize_title};
pub use types::{BatchRequest, BatchSummary, DownloadEvent, DownloadTarget};

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserLease, BrowserPool};
use crate::config::Settings;
use crate::download::{remove_stale_downloads, DownloadEngine};
use crate::error::Result;
use crate::http_client::HttpClient;
use crate::random;
use crate::resolver::{Catalog, EpisodeRef, LinkResolver};

#[derive(Default)]
struct Tally {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

type Queue = Arc<Mutex<VecDeque<DownloadTarget>>>;

/// Runs download batches for one catalog.
pub struct EpisodeOrchestrator {
    catalog: Catalog,
    client: HttpClient,
    pool: Arc<BrowserPool>,
    settings: Arc<Settings>,
    stop: Arc<AtomicBool>,
}

impl EpisodeOrchestrator {
    pub fn new(
        catalog: Catalog,
        client: HttpClient,
        pool: Arc<BrowserPool>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            catalog,
            client,
            pool,
            settings,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops workers from taking new episodes once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Split listed episodes into targets to fetch and outputs already on disk.
    pub fn plan(
        &self,
        request: &BatchRequest,
        episodes: &BTreeMap<u32, EpisodeRef>,
    ) -> (Vec<DownloadTarget>, Vec<DownloadTarget>) {
        episodes
            .values()
            .filter(|ep| {
                ep.number >= request.start && request.end.map_or(true, |end| ep.number <= end)
            })
            .map(|ep| DownloadTarget {
                episode: ep.number,
                page_url: ep.url.clone(),
                output: episode_path(&self.settings.output_dir, &request.title, ep.number),
                quality: request.quality,
                prefer_dub: request.prefer_dub,
            })
            .partition(|target| !is_present(&target.output))
    }

    pub async fn run(
        &self,
        request: &BatchRequest,
        events: mpsc::Sender<DownloadEvent>,
    ) -> Result<BatchSummary> {
        info!("Starting download for: {}", request.title);
        let episodes = self
            .catalog
            .fetch_episodes(&request.anime_session, request.start, request.end)
            .await?;
        if episodes.is_empty() {
            warn!("No episodes found");
            return Ok(BatchSummary::default());
        }

        let dir = anime_dir(&self.settings.output_dir, &request.title);
        tokio::fs::create_dir_all(&dir).await?;
        info!("Output directory: {}", dir.display());

        let (targets, present) = self.plan(request, &episodes);
        let mut summary = BatchSummary {
            total: targets.len() + present.len(),
            skipped: present.len(),
            ..BatchSummary::default()
        };
        let _ = events
            .send(DownloadEvent::Planned {
                total: summary.total,
                to_download: targets.len(),
            })
            .await;
        for target in present {
            info!("Skipping existing episode {}", target.episode);
            let _ = events
                .send(DownloadEvent::Skipped {
                    episode: target.episode,
                    path: target.output,
                })
                .await;
        }
        if targets.is_empty() {
            info!("All episodes already downloaded");
            return Ok(summary);
        }

        let workers = self.settings.workers.clamp(1, targets.len());
        info!(
            "Downloading {} episode(s) with {} worker(s)",
            targets.len(),
            workers
        );

        let first_lease = self.pool.acquire().await?;
        let queue: Queue = Arc::new(Mutex::new(targets.into_iter().collect()));
        let tally = Arc::new(Tally::default());

        if workers == 1 {
            let worker = self.worker(0, self.client.clone(), events.clone());
            worker
                .drain(&self.pool, first_lease, &queue, &tally, &self.stop, true)
                .await;
        } else {
            let seeds = self.cookie_seeds();
            let seed_refs: Vec<&str> = seeds.iter().map(String::as_str).collect();
            let mut first_lease = Some(first_lease);
            let mut set = JoinSet::new();

            for id in 0..workers {
                let worker = self.worker(id, self.client.fork(&seed_refs)?, events.clone());
                let lease = first_lease.take();
                let pool = self.pool.clone();
                let queue = queue.clone();
                let tally = tally.clone();
                let stop = self.stop.clone();

                set.spawn(async move {
                    let lease = match lease {
                        Some(lease) => lease,
                        None => match pool.acquire().await {
                            Ok(lease) => lease,
                            Err(e) => {
                                warn!("Worker {} could not get a browser: {}", id, e);
                                return;
                            }
                        },
                    };
                    worker.drain(&pool, lease, &queue, &tally, &stop, false).await;
                });
            }

            while let Some(joined) = set.join_next().await {
                if let Err(e) = joined {
                    error!("Worker task ended abnormally: {}", e);
                }
            }
        }

        let leftover: Vec<DownloadTarget> = queue.lock().await.drain(..).collect();
        let stopped = self.stop.load(Ordering::SeqCst);
        for target in leftover {
            if stopped {
                summary.not_started += 1;
                continue;
            }
            tally.failed.fetch_add(1, Ordering::SeqCst);
            let _ = events
                .send(DownloadEvent::Failed {
                    worker_id: 0,
                    episode: target.episode,
                    error: "no browser available".to_string(),
                })
                .await;
        }

        summary.succeeded = tally.succeeded.load(Ordering::SeqCst);
        summary.failed = tally.failed.load(Ordering::SeqCst);

        self.cleanup(dir).await;
        info!(
            "Completed: {}/{} episodes downloaded",
            summary.available(),
            summary.total
        );
        Ok(summary)
    }

    fn worker(&self, id: usize, client: HttpClient, events: mpsc::Sender<DownloadEvent>) -> Worker {
        Worker {
            id,
            resolver: LinkResolver::new(client.clone(), self.settings.clone()),
            engine: DownloadEngine::new(client, self.settings.clone()),
            settings: self.settings.clone(),
            events,
        }
    }

    /// URLs whose cookies each parallel worker starts with.
    fn cookie_seeds(&self) -> Vec<String> {
        let mut seeds = vec![format!("{}/", self.settings.base_url.trim_end_matches('/'))];
        seeds.extend(
            self.settings
                .file_host_domains
                .iter()
                .map(|d| format!("https://{d}/")),
        );
        seeds
    }

    async fn cleanup(&self, anime_dir: PathBuf) {
        let mut dirs = vec![anime_dir];
        dirs.extend(self.pool.worker_dirs().await);
        match remove_stale_downloads(&dirs, self.settings.poll_interval()).await {
            Ok(0) => {}
            Ok(n) => info!("Cleaned up {} stale partial download(s)", n),
            Err(e) => warn!("Cleanup failed: {}", e),
        }
    }
}

struct Worker {
    id: usize,
    resolver: LinkResolver,
    engine: DownloadEngine,
    settings: Arc<Settings>,
    events: mpsc::Sender<DownloadEvent>,
}

impl Worker {
    /// Take targets off the queue until it is empty or a stop is requested.
    async fn drain(
        &self,
        pool: &BrowserPool,
        mut lease: BrowserLease,
        queue: &Mutex<VecDeque<DownloadTarget>>,
        tally: &Tally,
        stop: &AtomicBool,
        serial: bool,
    ) {
        loop {
            if stop.load(Ordering::SeqCst) {
                info!("Worker {} stopping on request", self.id);
                break;
            }
            let Some(target) = queue.lock().await.pop_front() else {
                break;
            };

            let _ = self
                .events
                .send(DownloadEvent::Started {
                    worker_id: self.id,
                    episode: target.episode,
                    output: target.output.clone(),
                })
                .await;
            info!("Processing episode {}", target.episode);

            match self.attempt(&lease, &target).await {
                Ok(path) => {
                    tally.succeeded.fetch_add(1, Ordering::SeqCst);
                    info!("Successfully downloaded episode {}", target.episode);
                    let _ = self
                        .events
                        .send(DownloadEvent::Completed {
                            worker_id: self.id,
                            episode: target.episode,
                            path,
                        })
                        .await;
                }
                Err(e) => {
                    tally.failed.fetch_add(1, Ordering::SeqCst);
                    error!("Failed to download episode {}: {}", target.episode, e);
                    let _ = self
                        .events
                        .send(DownloadEvent::Failed {
                            worker_id: self.id,
                            episode: target.episode,
                            error: e.to_string(),
                        })
                        .await;

                    if e.spoils_browser() {
                        warn!("Replacing browser for worker {}", self.id);
                        pool.discard(lease).await;
                        lease = match pool.acquire().await {
                            Ok(lease) => lease,
                            Err(e) => {
                                error!("Worker {} has no browser: {}", self.id, e);
                                return;
                            }
                        };
                    }
                }
            }

            if serial && !queue.lock().await.is_empty() && !stop.load(Ordering::SeqCst) {
                tokio::time::sleep(random::jitter(
                    self.settings.jitter_min_secs,
                    self.settings.jitter_max_secs,
                ))
                .await;
            }
        }
        pool.release(lease).await;
    }

    /// Process one target, repeating the whole episode after network failures.
    async fn attempt(&self, lease: &BrowserLease, target: &DownloadTarget) -> Result<PathBuf> {
        let mut retries = 0;
        loop {
            match self.process(lease, target).await {
                Err(e) if e.is_retryable() && retries < self.settings.episode_retries => {
                    retries += 1;
                    warn!(
                        "Episode {} hit a network failure ({}), attempt {}/{}",
                        target.episode,
                        e,
                        retries + 1,
                        self.settings.episode_retries + 1
                    );
                    tokio::time::sleep(random::jitter(
                        self.settings.jitter_min_secs,
                        self.settings.jitter_max_secs,
                    ))
                    .await;
                }
                other => return other,
            }
        }
    }

    async fn process(&self, lease: &BrowserLease, target: &DownloadTarget) -> Result<PathBuf> {
        let resolved = self
            .resolver
            .resolve(
                lease.session(),
                &target.page_url,
                target.quality,
                target.prefer_dub,
            )
            .await?;
        debug!(
            "Episode {} resolved to {}",
            target.episode, resolved.file_host_url
        );

        let events = self.events.clone();
        let worker_id = self.id;
        let episode = target.episode;
        let progress = move |bytes: u64, total: Option<u64>| {
            let _ = events.try_send(DownloadEvent::Progress {
                worker_id,
                episode,
                bytes,
                total,
            });
        };

        self.engine
            .fetch(lease, &resolved.file_host_url, &target.output, &progress)
            .await
    }
}
