//! Job storage contract.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::store::StoreError;

use super::types::{Job, JobId, JobStatus, JobType};

/// Parameters of one claim step.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub now: DateTime<Utc>,
    pub limit: usize,
    pub max_retries: u32,
    /// Reclaim `Processing` jobs whose claim is older than this.
    pub lease: Option<Duration>,
    /// Types with a registered handler; other eligible jobs are rejected.
    pub accepted: Vec<JobType>,
}

impl ClaimRequest {
    pub fn accepts(&self, job_type: &JobType) -> bool {
        self.accepted.contains(job_type)
    }
}

/// Result of a claim step.
#[derive(Debug, Clone, Default)]
pub struct ClaimBatch {
    /// Now `Processing`, oldest first.
    pub claimed: Vec<Job>,
    /// Moved to `Error` because no handler exists for their type.
    pub rejected: Vec<Job>,
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

impl JobStats {
    pub fn count(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Error => self.error += 1,
        }
    }
}

/// Job store abstraction.
///
/// Jobs are never deleted; the table doubles as an audit of processing
/// attempts.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    async fn enqueue(&self, job: Job) -> Result<JobId, StoreError>;

    /// Get a job by ID.
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// Overwrite a job.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Atomically select up to `limit` eligible jobs (see [`Job::is_eligible`]),
    /// oldest first, and mark them `Processing`.
    ///
    /// Eligible jobs of a type outside `accepted` are moved to `Error` in the
    /// same step instead of being claimed.
    async fn claim_batch(&self, request: &ClaimRequest) -> Result<ClaimBatch, StoreError>;

    /// Claim one specific job if it is still `Pending`, ignoring its backoff.
    async fn claim_job(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Option<Job>, StoreError>;

    /// Most recently created jobs, optionally filtered by status.
    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError>;

    async fn stats(&self) -> Result<JobStats, StoreError>;
}
