//! Pool of browser sessions, each with a private download directory.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use super::{BrowserSession, SessionLauncher};
use crate::error::{PaheError, Result};

/// Configuration for a browser pool.
#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Upper bound on live browser instances (idle plus leased).
    pub max_size: usize,
    /// Parent of the per-instance `worker_NNNN` download directories.
    pub root_dir: PathBuf,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 3,
            root_dir: PathBuf::from("downloads"),
        }
    }
}

/// Exclusive checkout of a browser and its download directory.
///
/// Hand it back with [`BrowserPool::release`] or [`BrowserPool::discard`].
pub struct BrowserLease {
    id: u64,
    session: Arc<dyn BrowserSession>,
    download_dir: PathBuf,
}

impl BrowserLease {
    pub fn session(&self) -> &dyn BrowserSession {
        self.session.as_ref()
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for BrowserLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserLease")
            .field("id", &self.id)
            .field("download_dir", &self.download_dir)
            .finish()
    }
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<BrowserLease>,
    in_use: HashMap<u64, (Arc<dyn BrowserSession>, PathBuf)>,
    closed: bool,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.in_use.len()
    }

    fn checkout_idle(&mut self) -> Option<BrowserLease> {
        let lease = self.idle.pop_front()?;
        self.in_use.insert(
            lease.id,
            (lease.session.clone(), lease.download_dir.clone()),
        );
        Some(lease)
    }
}

/// Bounded pool of browser sessions.
///
/// Membership changes happen under `state`. Creation is additionally
/// serialized by `create_lock`, and the idle set is checked again after
/// taking it, so racing callers never push the pool past `max_size`.
pub struct BrowserPool {
    launcher: Arc<dyn SessionLauncher>,
    config: BrowserPoolConfig,
    state: Mutex<PoolState>,
    create_lock: Mutex<()>,
    released: Notify,
    next_id: AtomicU64,
    worker_dirs: Mutex<Vec<PathBuf>>,
}

impl BrowserPool {
    pub fn new(launcher: Arc<dyn SessionLauncher>, config: BrowserPoolConfig) -> Self {
        info!(
            "Created browser pool (max {} instance(s), root {})",
            config.max_size,
            config.root_dir.display()
        );
        Self {
            launcher,
            config: BrowserPoolConfig {
                max_size: config.max_size.max(1),
                ..config
            },
            state: Mutex::new(PoolState::default()),
            create_lock: Mutex::new(()),
            released: Notify::new(),
            next_id: AtomicU64::new(1),
            worker_dirs: Mutex::new(Vec::new()),
        }
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    /// Number of live instances (idle plus leased).
    pub async fn live(&self) -> usize {
        self.state.lock().await.live()
    }

    pub async fn idle(&self) -> usize {
        self.state.lock().await.idle.len()
    }

    /// Download directories created so far.
    pub async fn worker_dirs(&self) -> Vec<PathBuf> {
        self.worker_dirs.lock().await.clone()
    }

    /// Check out an idle session, or launch a new one while under capacity.
    /// At capacity, waits for another lease to come back.
    pub async fn acquire(&self) -> Result<BrowserLease> {
        loop {
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(PaheError::browser("browser pool is shut down"));
                }
                if let Some(lease) = state.checkout_idle() {
                    debug!("Reusing browser {}", lease.id);
                    return Ok(lease);
                }
            }

            let creating = self.create_lock.lock().await;
            let has_capacity = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(PaheError::browser("browser pool is shut down"));
                }
                if let Some(lease) = state.checkout_idle() {
                    debug!("Reusing browser {} released during wait", lease.id);
                    return Ok(lease);
                }
                state.live() < self.config.max_size
            };

            if has_capacity {
                let lease = self.create().await?;
                let mut state = self.state.lock().await;
                state.in_use.insert(
                    lease.id,
                    (lease.session.clone(), lease.download_dir.clone()),
                );
                drop(creating);
                return Ok(lease);
            }

            drop(creating);
            debug!("Browser pool at capacity, waiting for a release");
            self.released.notified().await;
        }
    }

    async fn create(&self) -> Result<BrowserLease> {
        let download_dir = self.fresh_worker_dir().await?;
        tokio::fs::create_dir_all(&download_dir).await?;

        match self.launcher.launch(&download_dir).await {
            Ok(session) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.worker_dirs.lock().await.push(download_dir.clone());
                info!("Launched browser {} ({})", id, download_dir.display());
                Ok(BrowserLease {
                    id,
                    session,
                    download_dir,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&download_dir).await;
                Err(e)
            }
        }
    }

    async fn fresh_worker_dir(&self) -> Result<PathBuf> {
        let taken = self.worker_dirs.lock().await.clone();
        for _ in 0..32 {
            let candidate = self.config.root_dir.join(format!(
                "worker_{}",
                crate::random::range_inclusive(1000, 9999)
            ));
            if !taken.contains(&candidate) && !tokio::fs::try_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        let id = self.next_id.load(Ordering::Relaxed);
        Ok(self.config.root_dir.join(format!("worker_x{id}")))
    }

    /// Return a lease. It goes back to the idle set while under capacity,
    /// otherwise the instance is closed in the background.
    pub async fn release(&self, lease: BrowserLease) {
        let overflow = {
            let mut state = self.state.lock().await;
            state.in_use.remove(&lease.id);
            if !state.closed && state.idle.len() < self.config.max_size {
                state.idle.push_back(lease);
                None
            } else {
                Some(lease)
            }
        };

        if let Some(lease) = overflow {
            debug!("Closing surplus browser {}", lease.id);
            tokio::spawn(async move {
                close_session(lease.id, lease.session.as_ref()).await;
            });
        }
        self.released.notify_one();
    }

    /// Close a lease whose browser is no longer trustworthy and free its slot.
    pub async fn discard(&self, lease: BrowserLease) {
        self.state.lock().await.in_use.remove(&lease.id);
        close_session(lease.id, lease.session.as_ref()).await;
        self.released.notify_one();
    }

    /// Close every idle and leased instance. Close failures are logged.
    pub async fn shutdown(&self) {
        let (idle, in_use) = {
            let mut state = self.state.lock().await;
            state.closed = true;
            let idle: Vec<BrowserLease> = state.idle.drain(..).collect();
            let in_use: Vec<(u64, Arc<dyn BrowserSession>)> = state
                .in_use
                .drain()
                .map(|(id, (session, _))| (id, session))
                .collect();
            (idle, in_use)
        };
        self.released.notify_waiters();
        self.released.notify_one();

        let total = idle.len() + in_use.len();
        for lease in idle {
            close_session(lease.id, lease.session.as_ref()).await;
        }
        for (id, session) in in_use {
            close_session(id, session.as_ref()).await;
        }

        for dir in self.worker_dirs.lock().await.iter() {
            let _ = tokio::fs::remove_dir_all(dir.join(".profile")).await;
            // Only succeeds when nothing but the profile was left behind.
            if tokio::fs::remove_dir(dir).await.is_ok() {
                debug!("Removed empty worker directory {}", dir.display());
            }
        }

        if total > 0 {
            info!("Closed {} browser instance(s)", total);
        }
    }
}

async fn close_session(id: u64, session: &dyn BrowserSession) {
    if let Err(e) = session.close().await {
        warn!("Error closing browser {}: {}", id, e);
    }
}
