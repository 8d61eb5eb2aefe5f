//! Periodic driver for the [`Dispatcher`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::store::EnrichmentStore;

use super::dispatcher::Dispatcher;

/// Runs [`Dispatcher::run_tick`] every `interval`, plus on demand.
///
/// The first tick fires immediately after `start`. Missed ticks are skipped,
/// not replayed, so a slow batch never causes a burst of catch-up ticks.
pub struct Scheduler<S> {
    dispatcher: Arc<Dispatcher<S>>,
    interval: Duration,
}

/// Shortest tick period; tokio rejects a zero period.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Handle for the running scheduler (trigger hook + shutdown).
#[derive(Debug)]
pub struct SchedulerHandle {
    trigger: Arc<Notify>,
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request an out-of-cycle tick. Triggers coalesce while a tick is running.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop the loop and wait for the in-flight tick, if any, to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            error!(error = %e, "job scheduler task ended abnormally");
        }
    }
}

impl<S: EnrichmentStore + 'static> Scheduler<S> {
    /// Intervals below [`MIN_INTERVAL`] are raised to it.
    pub fn new(dispatcher: Arc<Dispatcher<S>>, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "scheduler interval too short; using the minimum"
            );
        }
        Self {
            dispatcher,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn start(self) -> SchedulerHandle {
        let trigger = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());

        let join = tokio::spawn(run_loop(
            self.dispatcher,
            self.interval,
            trigger.clone(),
            shutdown.clone(),
        ));

        SchedulerHandle {
            trigger,
            shutdown,
            join,
        }
    }
}

async fn run_loop<S: EnrichmentStore + 'static>(
    dispatcher: Arc<Dispatcher<S>>,
    interval: Duration,
    trigger: Arc<Notify>,
    shutdown: Arc<Notify>,
) {
    info!(interval_secs = interval.as_secs(), "job scheduler started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        // Shutdown has priority.
        tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            _ = trigger.notified() => {}
            _ = ticker.tick() => {}
        }

        if let Err(e) = dispatcher.run_tick().await {
            error!(error = %e, "dispatch tick failed");
        }
    }

    info!("job scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::enrichment::BatchTranslationHandler;
    use crate::jobs::{DispatchConfig, Job, JobId, JobStatus, JobStore, JobType, RetryPolicy};
    use crate::store::InMemoryStore;

    fn dispatcher(store: Arc<InMemoryStore>) -> Arc<Dispatcher<InMemoryStore>> {
        let mut d = Dispatcher::new(store, RetryPolicy::default(), DispatchConfig::default());
        d.register(BatchTranslationHandler);
        Arc::new(d)
    }

    async fn wait_for_completion(store: &InMemoryStore, id: JobId) -> bool {
        for _ in 0..200 {
            if let Ok(Some(job)) = store.get(id).await {
                if job.status == JobStatus::Completed {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn first_tick_runs_immediately() {
        let store = InMemoryStore::arc();
        let id = store
            .enqueue(Job::new(JobType::BatchTranslation, serde_json::json!({}), Utc::now()))
            .await
            .unwrap();

        let handle = Scheduler::new(dispatcher(store.clone()), Duration::from_secs(3600)).start();
        assert!(wait_for_completion(&store, id).await);
        handle.stop().await;
    }

    #[tokio::test]
    async fn trigger_runs_an_out_of_cycle_tick() {
        let store = InMemoryStore::arc();
        let handle = Scheduler::new(dispatcher(store.clone()), Duration::from_secs(3600)).start();

        // Let the immediate first tick pass with nothing to do.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let id = store
            .enqueue(Job::new(JobType::BatchTranslation, serde_json::json!({}), Utc::now()))
            .await
            .unwrap();
        handle.trigger();

        assert!(wait_for_completion(&store, id).await);
        handle.stop().await;
    }

    #[tokio::test]
    async fn zero_interval_is_raised_and_the_loop_keeps_running() {
        let store = InMemoryStore::arc();
        let scheduler = Scheduler::new(dispatcher(store.clone()), Duration::ZERO);
        assert_eq!(scheduler.interval, MIN_INTERVAL);

        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let id = store
            .enqueue(Job::new(JobType::BatchTranslation, serde_json::json!({}), Utc::now()))
            .await
            .unwrap();
        handle.trigger();

        assert!(wait_for_completion(&store, id).await);
        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_returns_promptly_when_idle() {
        let store = InMemoryStore::arc();
        let handle = Scheduler::new(dispatcher(store), Duration::from_secs(3600)).start();
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("scheduler did not stop");
    }
}
