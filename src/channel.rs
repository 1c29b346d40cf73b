//! Channel: the single entry point the HTTP server and the CLI drive.
//!
//! Owns the scheduler (behind one mutex), the state store, the media probe and
//! the catalog source, plus the lifecycle of the background tasks. Every
//! scheduler mutation goes through here, so requests, the persistence flush and
//! rescans are serialized on the same lock.

use crate::catalog::{CatalogSource, DirectoryCatalog};
use crate::config::ChannelConfig;
use crate::duration_cache::DurationCache;
use crate::episode::Show;
use crate::error::{CatalogError, ServeError, StateError};
use crate::position::NowAiring;
use crate::probe::{AudioCompat, Ffprobe, MediaProbe};
use crate::rescan::{RescanMonitor, scan_blocking};
use crate::schedule::{PlaylistItem, Scheduler, now_millis};
use crate::state::{SavedState, StateStore};
use crate::tasks::PeriodicTask;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The scheduler slot. `None` until `Channel::initialize` has run.
pub type SharedScheduler = Arc<Mutex<Option<Scheduler>>>;

/// Lock the scheduler, recovering the guard if a previous holder panicked.
pub fn lock_scheduler(shared: &SharedScheduler) -> MutexGuard<'_, Option<Scheduler>> {
    shared.lock().unwrap_or_else(|poisoned| {
        warn!("Scheduler lock was poisoned; continuing with the last state");
        poisoned.into_inner()
    })
}

pub struct Channel {
    config: ChannelConfig,
    scheduler: SharedScheduler,
    store: StateStore,
    probe: Arc<dyn MediaProbe>,
    catalog: Arc<dyn CatalogSource>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl Channel {
    pub fn new(
        config: ChannelConfig,
        probe: Arc<dyn MediaProbe>,
        catalog: Arc<dyn CatalogSource>,
    ) -> Self {
        let store = StateStore::new(config.state_file.clone());
        Channel {
            config,
            scheduler: Arc::new(Mutex::new(None)),
            store,
            probe,
            catalog,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Production wiring: ffprobe, the on-disk duration cache and a directory catalog.
    pub fn from_config(config: ChannelConfig) -> Self {
        let probe: Arc<dyn MediaProbe> = Arc::new(Ffprobe::new(config.ffprobe.clone()));
        let cache = Arc::new(DurationCache::load(config.duration_cache_file.clone()));
        let catalog = Arc::new(DirectoryCatalog::new(
            config.media_root.clone(),
            probe.clone(),
            cache,
        ));
        Channel::new(config, probe, catalog)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        lock_scheduler(&self.scheduler).is_some()
    }

    /// Cancelled once the channel starts shutting down. Long-lived responses
    /// watch it so they end instead of holding the server open.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Read the saved state, scan the catalog and start the rotation at `now`.
    /// A failed scan starts the channel off air rather than failing.
    pub async fn initialize(&self, now: i64) {
        let saved = self.store.load();
        let shows = match scan_blocking(self.catalog.clone()).await {
            Ok(shows) => shows,
            Err(e) => {
                error!("Initial catalog scan failed: {}", e);
                Vec::new()
            }
        };

        let mut scheduler = Scheduler::new(shows, self.config.window_settings());
        scheduler.start(now, saved.as_ref());
        *lock_scheduler(&self.scheduler) = Some(scheduler);
    }

    /// Initialize in the background, then start the tasks. Requests that
    /// arrive before the scheduler is in place get `NotReady`.
    pub fn launch(self: &Arc<Self>) -> JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move {
            channel.initialize(now_millis()).await;
            if channel.shutdown.is_cancelled() {
                debug!("Shutdown began during startup, not starting tasks");
                return;
            }
            info!("Channel initialized");
            channel.start_tasks();
        })
    }

    /// Start the persistence flush and the rescan monitor.
    pub fn start_tasks(self: &Arc<Self>) {
        let channel = self.clone();
        let persist = PeriodicTask::spawn(
            "persist",
            self.config.persist_interval(),
            &self.shutdown,
            move || {
                let channel = channel.clone();
                async move {
                    if let Err(e) = channel.persist().await {
                        error!("Could not persist channel state: {}", e);
                    }
                }
            },
        );

        let monitor = Arc::new(RescanMonitor::new(
            self.catalog.clone(),
            self.scheduler.clone(),
        ));
        let rescan = monitor.spawn(self.config.rescan_interval(), &self.shutdown);

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.push(persist);
        tasks.push(rescan);
    }

    /// Stop every background task and write the state one last time.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<PeriodicTask> = self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.stop().await;
        }
        match self.persist().await {
            Ok(()) => info!("Channel state saved to {}", self.store.path().display()),
            Err(e) => error!("Final state write failed: {}", e),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Snapshot of what is airing at `now`, after routine window maintenance.
    pub fn now_airing(&self, now: i64) -> Result<NowAiring, ServeError> {
        let mut guard = lock_scheduler(&self.scheduler);
        let scheduler = guard.as_mut().ok_or(ServeError::NotReady)?;
        scheduler.extend_if_needed(now);
        Ok(NowAiring::resolve(scheduler, now))
    }

    /// The item on air at `now` and the whole seconds elapsed in it.
    pub fn on_air(&self, now: i64) -> Result<(PlaylistItem, u64), ServeError> {
        let airing = self.now_airing(now)?;
        let item = airing.current_item.ok_or(ServeError::OffAir)?;
        Ok((item, airing.position))
    }

    /// Items not yet finished at `now`, in airing order.
    pub fn upcoming(&self, now: i64) -> Result<Vec<PlaylistItem>, ServeError> {
        let mut guard = lock_scheduler(&self.scheduler);
        let scheduler = guard.as_mut().ok_or(ServeError::NotReady)?;
        scheduler.extend_if_needed(now);
        Ok(scheduler.upcoming(now).into_iter().cloned().collect())
    }

    /// Probe the first audio stream of `path` off the async runtime.
    pub async fn audio_compat(&self, path: PathBuf) -> AudioCompat {
        let probe = self.probe.clone();
        match tokio::task::spawn_blocking(move || probe.audio_codec(&path)).await {
            Ok(result) => AudioCompat::classify(result),
            Err(e) => {
                warn!("Audio probe task failed, assuming compatible: {}", e);
                AudioCompat::Compatible
            }
        }
    }

    /// Run one catalog scan without touching the scheduler.
    pub async fn scan_catalog(&self) -> Result<Vec<Show>, CatalogError> {
        scan_blocking(self.catalog.clone()).await
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    /// The state that would be written right now. `None` before initialization
    /// and while off air: the last saved episode stays on disk until something
    /// airs again.
    pub fn snapshot_state(&self, now: i64) -> Option<SavedState> {
        let mut guard = lock_scheduler(&self.scheduler);
        let item = guard.as_mut()?.current_item(now)?;
        Some(SavedState::from_item(Some(item)))
    }

    /// Write the current state. The snapshot is taken under the lock; the
    /// file write happens outside it on the blocking pool.
    pub async fn persist(&self) -> Result<(), StateError> {
        let Some(state) = self.snapshot_state(now_millis()) else {
            debug!("Nothing on air, keeping the saved state");
            return Ok(());
        };
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&state))
            .await
            .map_err(|e| StateError::Io(std::io::Error::other(e)))?
    }
}
