//! Rescan monitor: periodically refresh the catalog and reconcile the rotation.

use crate::catalog::CatalogSource;
use crate::channel::{SharedScheduler, lock_scheduler};
use crate::episode::Show;
use crate::error::CatalogError;
use crate::tasks::PeriodicTask;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub struct RescanMonitor {
    catalog: Arc<dyn CatalogSource>,
    scheduler: SharedScheduler,
}

impl RescanMonitor {
    pub fn new(catalog: Arc<dyn CatalogSource>, scheduler: SharedScheduler) -> Self {
        RescanMonitor { catalog, scheduler }
    }

    /// Scan once and swap the result into the scheduler.
    ///
    /// The scan runs on the blocking pool; the lock is only held for the swap.
    /// On failure nothing changes. Returns the number of playable shows applied.
    pub async fn rescan_once(&self) -> Result<usize, CatalogError> {
        let shows = scan_blocking(self.catalog.clone()).await?;
        let shows: Vec<Show> = shows.into_iter().filter(|s| !s.is_empty()).collect();
        let valid: HashSet<PathBuf> = shows
            .iter()
            .flat_map(|s| s.episodes.iter().map(|e| e.path.clone()))
            .collect();
        let count = shows.len();

        {
            let mut guard = lock_scheduler(&self.scheduler);
            match guard.as_mut() {
                Some(scheduler) => scheduler.reload_catalog(shows),
                None => debug!("Scheduler not initialized yet, rescan result not applied"),
            }
        }

        let catalog = self.catalog.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || catalog.evict_stale(&valid)).await {
            error!("Duration cache cleanup panicked: {}", e);
        }
        Ok(count)
    }

    /// Run `rescan_once` every `period` until `parent` is cancelled.
    pub fn spawn(self: Arc<Self>, period: Duration, parent: &CancellationToken) -> PeriodicTask {
        PeriodicTask::spawn("rescan", period, parent, move || {
            let monitor = self.clone();
            async move {
                if let Err(e) = monitor.rescan_once().await {
                    error!("Rescan failed, keeping previous catalog: {}", e);
                }
            }
        })
    }
}

/// Run `catalog.scan()` off the async runtime.
pub async fn scan_blocking(catalog: Arc<dyn CatalogSource>) -> Result<Vec<Show>, CatalogError> {
    tokio::task::spawn_blocking(move || catalog.scan())
        .await
        .map_err(|e| CatalogError::Aborted(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::episode::make_episode;
    use crate::schedule::tests::{T0, two_shows};
    use crate::schedule::{Scheduler, WindowSettings};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingCatalog;

    impl CatalogSource for FailingCatalog {
        fn scan(&self) -> Result<Vec<Show>, CatalogError> {
            Err(CatalogError::Aborted("disk on fire".into()))
        }
    }

    struct CountingEvictions {
        inner: StaticCatalog,
        evicted_with: Mutex<Option<HashSet<PathBuf>>>,
        evictions: AtomicUsize,
    }

    impl CatalogSource for CountingEvictions {
        fn scan(&self) -> Result<Vec<Show>, CatalogError> {
            self.inner.scan()
        }

        fn evict_stale(&self, valid: &HashSet<PathBuf>) {
            self.evictions.fetch_add(1, Ordering::SeqCst);
            *self.evicted_with.lock().unwrap() = Some(valid.clone());
        }
    }

    fn started() -> SharedScheduler {
        let mut s = Scheduler::new(two_shows(), WindowSettings::default());
        s.start(T0, None);
        Arc::new(Mutex::new(Some(s)))
    }

    #[tokio::test]
    async fn rescan_swaps_catalog_and_reports_paths() {
        let scheduler = started();
        let catalog = Arc::new(CountingEvictions {
            inner: StaticCatalog::new(vec![
                Show::new("B", vec![make_episode("B", 1, 1, "", 60)]),
                Show::new("C", vec![make_episode("C", 1, 1, "", 20)]),
                Show::new("Empty", vec![]),
            ]),
            evicted_with: Mutex::new(None),
            evictions: AtomicUsize::new(0),
        });
        let monitor = RescanMonitor::new(catalog.clone(), scheduler.clone());

        assert_eq!(monitor.rescan_once().await.unwrap(), 2);

        let guard = scheduler.lock().unwrap();
        let names: Vec<&str> = guard.as_ref().unwrap().shows().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
        assert_eq!(catalog.evictions.load(Ordering::SeqCst), 1);
        let valid = catalog.evicted_with.lock().unwrap().clone().unwrap();
        assert_eq!(valid.len(), 2);
        assert!(valid.contains(&PathBuf::from("/media/C/C S01E01.mp4")));
    }

    #[tokio::test]
    async fn failed_scan_keeps_previous_catalog() {
        let scheduler = started();
        let monitor = RescanMonitor::new(Arc::new(FailingCatalog), scheduler.clone());
        assert!(monitor.rescan_once().await.is_err());
        assert_eq!(scheduler.lock().unwrap().as_ref().unwrap().shows().len(), 2);
    }

    #[tokio::test]
    async fn rescan_before_initialization_is_harmless() {
        let scheduler: SharedScheduler = Arc::new(Mutex::new(None));
        let monitor = RescanMonitor::new(Arc::new(StaticCatalog::new(two_shows())), scheduler.clone());
        assert_eq!(monitor.rescan_once().await.unwrap(), 2);
        assert!(scheduler.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn periodic_rescan_picks_up_new_shows() {
        let scheduler = started();
        let catalog = Arc::new(StaticCatalog::new(two_shows()));
        let monitor = Arc::new(RescanMonitor::new(catalog.clone(), scheduler.clone()));
        let parent = CancellationToken::new();
        let task = monitor.spawn(Duration::from_millis(10), &parent);

        catalog.replace(vec![Show::new("Z", vec![make_episode("Z", 1, 1, "", 5)])]);
        tokio::time::sleep(Duration::from_millis(60)).await;
        task.stop().await;

        let guard = scheduler.lock().unwrap();
        assert_eq!(guard.as_ref().unwrap().shows()[0].name, "Z");
    }
}
