//! Dispatch targets with no behavior yet. They exist so jobs of these types
//! complete instead of being rejected as unknown.

use tracing::debug;

use crate::jobs::{HandlerError, Job, JobHandler, JobType};
use crate::store::UnitOfWork;

/// Handler for [`JobType::BatchTranslation`]. Always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchTranslationHandler;

/// Handler for [`JobType::LearningReminder`]. Always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LearningReminderHandler;

#[async_trait::async_trait]
impl JobHandler for BatchTranslationHandler {
    fn job_type(&self) -> JobType {
        JobType::BatchTranslation
    }

    async fn handle(&self, job: &Job) -> Result<UnitOfWork, HandlerError> {
        debug!(job_id = %job.id, "batch translation has no work to do");
        Ok(UnitOfWork::new())
    }
}

#[async_trait::async_trait]
impl JobHandler for LearningReminderHandler {
    fn job_type(&self) -> JobType {
        JobType::LearningReminder
    }

    async fn handle(&self, job: &Job) -> Result<UnitOfWork, HandlerError> {
        debug!(job_id = %job.id, "learning reminder has no work to do");
        Ok(UnitOfWork::new())
    }
}
