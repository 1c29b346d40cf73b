//! Periodic background tasks with explicit start/stop.
//!
//! Each task owns a child `CancellationToken`, so it can be stopped on its
//! own or together with every other task via the parent token.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct PeriodicTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Run `tick` every `period`, first after one full period has elapsed.
    /// A tick in progress is awaited to completion before cancellation is seen.
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        parent: &CancellationToken,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            info!("{} task started (every {:?})", name, period);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => tick().await,
                }
            }

            info!("{} task stopped", name);
        });

        PeriodicTask {
            name,
            token,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel and wait for the task to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            error!("{} task ended abnormally: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(parent: &CancellationToken, counter: Arc<AtomicUsize>) -> PeriodicTask {
        PeriodicTask::spawn("counter", Duration::from_millis(10), parent, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn ticks_until_stopped() {
        let parent = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(&parent, counter.clone());
        assert_eq!(task.name(), "counter");

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(task.is_running());
        task.stop().await;

        let after_stop = counter.load(Ordering::SeqCst);
        assert!(after_stop >= 1);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn parent_cancellation_stops_children() {
        let parent = CancellationToken::new();
        let a = counting_task(&parent, Arc::new(AtomicUsize::new(0)));
        let b = counting_task(&parent, Arc::new(AtomicUsize::new(0)));
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!a.is_running());
        assert!(!b.is_running());
    }

    #[tokio::test]
    async fn first_tick_waits_a_full_period() {
        let parent = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_in = counter.clone();
        let task = PeriodicTask::spawn("slow", Duration::from_secs(3600), &parent, move || {
            let counter = counter_in.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        task.stop().await;
    }
}
