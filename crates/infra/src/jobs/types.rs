//! Core job types and the retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use kotoba_core::JobId;

/// Job type, used to route a job to its handler.
///
/// Types read back from storage that this build does not know about become
/// [`JobType::Other`]; the dispatcher rejects them at claim time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    WordProcessing,
    SentenceAnalysis,
    ConversationGeneration,
    BatchTranslation,
    LearningReminder,
    Other(String),
}

impl JobType {
    pub const KNOWN: &'static [JobType] = &[
        JobType::WordProcessing,
        JobType::SentenceAnalysis,
        JobType::ConversationGeneration,
        JobType::BatchTranslation,
        JobType::LearningReminder,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            JobType::WordProcessing => "word_processing",
            JobType::SentenceAnalysis => "sentence_analysis",
            JobType::ConversationGeneration => "conversation_generation",
            JobType::BatchTranslation => "batch_translation",
            JobType::LearningReminder => "learning_reminder",
            JobType::Other(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        JobType::KNOWN
            .iter()
            .find(|t| t.as_str() == name)
            .cloned()
            .unwrap_or_else(|| JobType::Other(name.to_string()))
    }
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        JobType::parse(&value)
    }
}

impl From<JobType> for String {
    fn from(value: JobType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed (first attempt or scheduled retry)
    Pending,
    /// Claimed by the dispatcher
    Processing,
    /// Handler succeeded
    Completed,
    /// Retries exhausted, or rejected
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether retrying a failure can ever help.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transport errors, timeouts, unreadable responses
    Retryable,
    /// The job refers to something that does not exist, or its payload is unusable
    Permanent,
}

/// Retry policy: exponential backoff in whole units of `base_delay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// A job whose `retry_count` reaches this value goes to `Error`.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before the attempt following failure number `retry_count`:
    /// `base_delay * 2^retry_count` (2, 4, 8 minutes with the defaults).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

/// What a failed attempt did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying { next_retry_at: DateTime<Utc> },
    Exhausted,
}

/// A durable record of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Most recent failure only.
    pub error_message: Option<String>,
    pub retry_count: u32,
    /// Set only while `Pending` after at least one failure.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When the current (or last) claim happened; drives lease expiry.
    pub processing_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: JobType, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            payload,
            status: JobStatus::Pending,
            error_message: None,
            retry_count: 0,
            next_retry_at: None,
            processing_started_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Selection predicate used by every store.
    ///
    /// With a lease, a `Processing` job whose claim is older than the lease is
    /// eligible again (its worker is presumed dead).
    pub fn is_eligible(&self, now: DateTime<Utc>, max_retries: u32, lease: Option<Duration>) -> bool {
        match self.status {
            JobStatus::Pending => {
                self.retry_count < max_retries && self.next_retry_at.is_none_or(|at| at <= now)
            }
            JobStatus::Processing => match (lease, self.processing_started_at) {
                (Some(lease), Some(started)) => chrono::Duration::from_std(lease)
                    .map(|lease| started + lease <= now)
                    .unwrap_or(false),
                _ => false,
            },
            JobStatus::Completed | JobStatus::Error => false,
        }
    }

    pub fn claim(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.processing_started_at = Some(now);
        self.next_retry_at = None;
        self.updated_at = now;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.next_retry_at = None;
        self.updated_at = now;
    }

    /// Record a failed attempt.
    ///
    /// `fail_fast_permanent` sends [`ErrorClass::Permanent`] failures straight
    /// to `Error`; otherwise every failure consumes one retry.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        class: ErrorClass,
        policy: &RetryPolicy,
        fail_fast_permanent: bool,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        self.retry_count += 1;
        self.error_message = Some(error.into());
        self.updated_at = now;

        let give_up = policy.is_exhausted(self.retry_count)
            || (fail_fast_permanent && class == ErrorClass::Permanent);
        if give_up {
            self.retry_count = self.retry_count.max(policy.max_retries);
            self.status = JobStatus::Error;
            self.next_retry_at = None;
            return FailureOutcome::Exhausted;
        }

        let delay = chrono::Duration::from_std(policy.delay_for(self.retry_count))
            .unwrap_or(chrono::Duration::MAX);
        let next_retry_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.status = JobStatus::Pending;
        self.next_retry_at = Some(next_retry_at);
        FailureOutcome::Retrying { next_retry_at }
    }

    /// Terminal rejection without running a handler (e.g. unknown type).
    pub fn reject(&mut self, reason: impl Into<String>, max_retries: u32, now: DateTime<Utc>) {
        self.status = JobStatus::Error;
        self.error_message = Some(reason.into());
        self.retry_count = self.retry_count.max(max_retries);
        self.next_retry_at = None;
        self.updated_at = now;
    }
}
