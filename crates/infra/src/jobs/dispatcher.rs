//! Job dispatcher: claim a batch, run each job through its handler, record
//! the outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use kotoba_content::WordStatus;

use crate::store::{ContentMutation, EnrichmentStore, StoreError, UnitOfWork};

use super::handler::{HandlerError, JobHandler};
use super::payload::{self, WordJobPayload};
use super::store::ClaimRequest;
use super::types::{FailureOutcome, Job, JobId, JobStatus, JobType, RetryPolicy};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Jobs claimed per tick
    pub batch_size: usize,
    /// Reclaim `Processing` jobs older than this (`None` = never)
    pub lease: Option<Duration>,
    /// Send `Permanent` handler errors straight to `Error`
    pub fail_fast_permanent: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            lease: None,
            fail_fast_permanent: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {id} is {status}, not pending")]
    NotPending { id: JobId, status: JobStatus },
}

/// What happened to one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Retrying { next_retry_at: DateTime<Utc> },
    Failed,
}

/// Counters for one tick (or a whole drain).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub rejected: usize,
}

impl TickReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Retrying { .. } => self.retried += 1,
            JobOutcome::Failed => self.failed += 1,
        }
    }

    fn absorb(&mut self, other: TickReport) {
        self.claimed += other.claimed;
        self.completed += other.completed;
        self.retried += other.retried;
        self.failed += other.failed;
        self.rejected += other.rejected;
    }
}

/// Routes claimed jobs to their handlers.
///
/// Jobs within a batch run one after another. Every entry point takes the
/// drain lock, so a scheduled tick and a manual drain never overlap inside
/// one process. Across processes, claims are atomic in the store; with no
/// lease configured a job orphaned in `Processing` by a crash stays there,
/// so run a single dispatcher per store unless the lease is enabled.
pub struct Dispatcher<S> {
    store: Arc<S>,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    policy: RetryPolicy,
    config: DispatchConfig,
    drain: Mutex<()>,
}

impl<S: EnrichmentStore + 'static> Dispatcher<S> {
    pub fn new(store: Arc<S>, policy: RetryPolicy, config: DispatchConfig) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            policy,
            config,
            drain: Mutex::new(()),
        }
    }

    /// Register a handler for its job type, replacing any previous one.
    pub fn register<H: JobHandler + 'static>(&mut self, handler: H) -> &mut Self {
        self.handlers.insert(handler.job_type(), Arc::new(handler));
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Types with a registered handler, in canonical order.
    pub fn accepted_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.handlers.keys().cloned().collect();
        types.sort_by_key(|t| {
            JobType::KNOWN
                .iter()
                .position(|k| k == t)
                .unwrap_or(usize::MAX)
        });
        types
    }

    /// One dispatch pass: claim up to `batch_size` eligible jobs and run them.
    pub async fn run_tick(&self) -> Result<TickReport, DispatchError> {
        let _guard = self.drain.lock().await;
        self.tick().await
    }

    /// Out-of-cycle drain: tick until nothing is claimable.
    ///
    /// Failed jobs are rescheduled into the future, so each job runs at most
    /// once per drain.
    pub async fn run_all_pending_now(&self) -> Result<TickReport, DispatchError> {
        let _guard = self.drain.lock().await;
        let mut total = TickReport::default();
        loop {
            let tick = self.tick().await?;
            total.absorb(tick);
            if tick.claimed == 0 && tick.rejected == 0 {
                break;
            }
        }
        info!(
            completed = total.completed,
            retried = total.retried,
            failed = total.failed,
            rejected = total.rejected,
            "manual drain finished"
        );
        Ok(total)
    }

    /// Run one specific `Pending` job now, ignoring its backoff.
    pub async fn process_job(&self, job_id: JobId) -> Result<JobOutcome, DispatchError> {
        let _guard = self.drain.lock().await;
        let now = Utc::now();

        let Some(job) = self.store.claim_job(job_id, now).await? else {
            return Err(match self.store.get(job_id).await? {
                Some(job) => DispatchError::NotPending {
                    id: job_id,
                    status: job.status,
                },
                None => DispatchError::JobNotFound(job_id),
            });
        };
        Ok(self.execute(job).await)
    }

    async fn tick(&self) -> Result<TickReport, DispatchError> {
        let request = ClaimRequest {
            now: Utc::now(),
            limit: self.config.batch_size,
            max_retries: self.policy.max_retries,
            lease: self.config.lease,
            accepted: self.accepted_types(),
        };
        let batch = self.store.claim_batch(&request).await?;

        let mut report = TickReport {
            claimed: batch.claimed.len(),
            rejected: batch.rejected.len(),
            ..Default::default()
        };

        for job in &batch.rejected {
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                "rejected job with no registered handler"
            );
        }

        if batch.claimed.is_empty() {
            debug!("no eligible jobs");
            return Ok(report);
        }

        for job in batch.claimed {
            report.record(self.execute(job).await);
        }

        info!(
            claimed = report.claimed,
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            "dispatch tick finished"
        );
        Ok(report)
    }

    /// Run one claimed job and persist its outcome. Never fails: errors end
    /// up on the job row.
    async fn execute(&self, job: Job) -> JobOutcome {
        let Some(handler) = self.handlers.get(&job.job_type).cloned() else {
            return self.reject(job).await;
        };

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            retry_count = job.retry_count,
            "processing job"
        );

        match handler.handle(&job).await {
            Ok(mut work) => {
                let mut done = job.clone();
                done.complete(Utc::now());
                work.update_job(done);

                match self.store.commit(work).await {
                    Ok(()) => {
                        info!(job_id = %job.id, job_type = %job.job_type, "job completed");
                        JobOutcome::Completed
                    }
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "failed to commit job result");
                        self.record_failure(job, HandlerError::from(e)).await
                    }
                }
            }
            Err(err) => self.record_failure(job, err).await,
        }
    }

    async fn record_failure(&self, mut job: Job, err: HandlerError) -> JobOutcome {
        let outcome = job.fail(
            err.message.clone(),
            err.class,
            &self.policy,
            self.config.fail_fast_permanent,
            Utc::now(),
        );

        let mut work = UnitOfWork::new();
        if outcome == FailureOutcome::Exhausted && job.job_type == JobType::WordProcessing {
            if let Ok(p) = payload::decode::<WordJobPayload>(&job) {
                work.push(ContentMutation::SetWordStatus {
                    word_id: p.word_id,
                    status: WordStatus::Error,
                });
            }
        }

        let (job_id, job_type, retry_count) = (job.id, job.job_type.clone(), job.retry_count);
        work.update_job(job);
        if let Err(e) = self.store.commit(work).await {
            error!(job_id = %job_id, error = %e, "failed to record job failure");
        }

        match outcome {
            FailureOutcome::Retrying { next_retry_at } => {
                warn!(
                    job_id = %job_id,
                    job_type = %job_type,
                    retry_count,
                    next_retry_at = %next_retry_at,
                    error = %err,
                    "job failed, will retry"
                );
                JobOutcome::Retrying { next_retry_at }
            }
            FailureOutcome::Exhausted => {
                error!(
                    job_id = %job_id,
                    job_type = %job_type,
                    retry_count,
                    error = %err,
                    "job failed permanently"
                );
                JobOutcome::Failed
            }
        }
    }

    /// Terminal failure for a claimed job with no handler.
    async fn reject(&self, mut job: Job) -> JobOutcome {
        warn!(job_id = %job.id, job_type = %job.job_type, "no handler for job type");
        let reason = format!("unknown job type: {}", job.job_type);
        job.reject(reason, self.policy.max_retries, Utc::now());
        let job_id = job.id;
        if let Err(e) = self.store.update(&job).await {
            error!(job_id = %job_id, error = %e, "failed to record job rejection");
        }
        JobOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use kotoba_content::Word;

    use crate::jobs::{ErrorClass, JobStore};
    use crate::store::{ContentStore, InMemoryStore};

    /// Fails `failures` times, then succeeds.
    struct Flaky {
        job_type: JobType,
        failures: usize,
        class: ErrorClass,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(job_type: JobType, failures: usize, class: ErrorClass) -> Self {
            Self {
                job_type,
                failures,
                class,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl JobHandler for Flaky {
        fn job_type(&self) -> JobType {
            self.job_type.clone()
        }

        async fn handle(&self, _job: &Job) -> Result<UnitOfWork, HandlerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(HandlerError {
                    class: self.class,
                    message: format!("attempt {} failed", n + 1),
                })
            } else {
                Ok(UnitOfWork::new())
            }
        }
    }

    fn dispatcher(store: Arc<InMemoryStore>) -> Dispatcher<InMemoryStore> {
        Dispatcher::new(store, RetryPolicy::default(), DispatchConfig::default())
    }

    fn job(job_type: JobType) -> Job {
        Job::new(job_type, serde_json::json!({}), Utc::now())
    }

    /// Pull a rescheduled job's retry time into the past.
    async fn make_due(store: &InMemoryStore, id: JobId) {
        let mut job = store.get(id).await.unwrap().unwrap();
        job.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.update(&job).await.unwrap();
    }

    #[tokio::test]
    async fn successful_job_completes() {
        let store = InMemoryStore::arc();
        let mut d = dispatcher(store.clone());
        d.register(Flaky::new(JobType::BatchTranslation, 0, ErrorClass::Retryable));
        let id = store.enqueue(job(JobType::BatchTranslation)).await.unwrap();

        let report = d.run_tick().await.unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.completed, 1);
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn failures_back_off_then_exhaust() {
        let store = InMemoryStore::arc();
        let mut d = dispatcher(store.clone());
        d.register(Flaky::new(JobType::BatchTranslation, 10, ErrorClass::Retryable));
        let id = store.enqueue(job(JobType::BatchTranslation)).await.unwrap();

        let mut previous = None;
        for attempt in 1..=2u32 {
            let report = d.run_tick().await.unwrap();
            assert_eq!(report.retried, 1);

            let job = store.get(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.retry_count, attempt);
            assert_eq!(job.error_message.as_deref(), Some(format!("attempt {attempt} failed").as_str()));
            let next = job.next_retry_at.unwrap();
            assert!(previous.is_none_or(|p| next > p));
            previous = Some(next);

            // Not due yet.
            assert_eq!(d.run_tick().await.unwrap().claimed, 0);
            make_due(&store, id).await;
        }

        let report = d.run_tick().await.unwrap();
        assert_eq!(report.failed, 1);
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.retry_count, 3);
        assert!(job.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn exhausted_word_job_marks_word_as_error() {
        let store = InMemoryStore::arc();
        let word = Word::register("ubiquitous", None, Utc::now()).unwrap();
        let word_id = word.id;
        let payload = payload::encode(&WordJobPayload {
            word_id,
            word: word.text.clone(),
            created_by: None,
        });
        let mut work = UnitOfWork::new().mutate(ContentMutation::InsertWord(word));
        let mut word_job = Job::new(JobType::WordProcessing, payload, Utc::now());
        word_job.retry_count = 2;
        let id = word_job.id;
        work.enqueue_job(word_job);
        store.commit(work).await.unwrap();

        let mut d = dispatcher(store.clone());
        d.register(Flaky::new(JobType::WordProcessing, 1, ErrorClass::Retryable));
        d.run_tick().await.unwrap();

        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Error);
        let word = store.word(word_id).await.unwrap().unwrap();
        assert_eq!(word.status, WordStatus::Error);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast_only_when_enabled() {
        for (fail_fast, expected) in [(false, JobStatus::Pending), (true, JobStatus::Error)] {
            let store = InMemoryStore::arc();
            let config = DispatchConfig {
                fail_fast_permanent: fail_fast,
                ..Default::default()
            };
            let mut d = Dispatcher::new(store.clone(), RetryPolicy::default(), config);
            d.register(Flaky::new(JobType::LearningReminder, 1, ErrorClass::Permanent));
            let id = store.enqueue(job(JobType::LearningReminder)).await.unwrap();

            d.run_tick().await.unwrap();

            assert_eq!(store.get(id).await.unwrap().unwrap().status, expected);
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let store = InMemoryStore::arc();
        let mut d = dispatcher(store.clone());
        d.register(Flaky::new(JobType::BatchTranslation, 1, ErrorClass::Retryable));
        d.register(Flaky::new(JobType::LearningReminder, 0, ErrorClass::Retryable));

        let first = store.enqueue(job(JobType::BatchTranslation)).await.unwrap();
        let second = store.enqueue(job(JobType::LearningReminder)).await.unwrap();

        let report = d.run_tick().await.unwrap();

        assert_eq!(report.claimed, 2);
        assert_eq!(report.retried, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(store.get(first).await.unwrap().unwrap().status, JobStatus::Pending);
        assert_eq!(store.get(second).await.unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn batch_size_bounds_a_tick_and_drain_takes_everything() {
        let store = InMemoryStore::arc();
        let config = DispatchConfig {
            batch_size: 2,
            ..Default::default()
        };
        let mut d = Dispatcher::new(store.clone(), RetryPolicy::default(), config);
        d.register(Flaky::new(JobType::BatchTranslation, 0, ErrorClass::Retryable));
        for _ in 0..5 {
            store.enqueue(job(JobType::BatchTranslation)).await.unwrap();
        }

        assert_eq!(d.run_tick().await.unwrap().completed, 2);
        let drained = d.run_all_pending_now().await.unwrap();
        assert_eq!(drained.completed, 3);
        assert_eq!(store.stats().await.unwrap().completed, 5);
    }

    #[tokio::test]
    async fn process_job_ignores_backoff_but_not_status() {
        let store = InMemoryStore::arc();
        let mut d = dispatcher(store.clone());
        d.register(Flaky::new(JobType::SentenceAnalysis, 1, ErrorClass::Retryable));
        let id = store.enqueue(job(JobType::SentenceAnalysis)).await.unwrap();

        assert!(matches!(d.process_job(id).await.unwrap(), JobOutcome::Retrying { .. }));
        assert_eq!(d.process_job(id).await.unwrap(), JobOutcome::Completed);

        let err = d.process_job(id).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotPending { status: JobStatus::Completed, .. }));
        let missing = d.process_job(JobId::new()).await.unwrap_err();
        assert!(matches!(missing, DispatchError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn unregistered_types_are_rejected_not_retried() {
        let store = InMemoryStore::arc();
        let mut d = dispatcher(store.clone());
        d.register(Flaky::new(JobType::WordProcessing, 0, ErrorClass::Retryable));
        let id = store.enqueue(job(JobType::ConversationGeneration)).await.unwrap();

        let report = d.run_tick().await.unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(report.claimed, 0);
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.retry_count, 3);
    }
}
