//! Handler contract: one implementation per job type.

use thiserror::Error;

use kotoba_ai::GenerationError;

use crate::store::{StoreError, UnitOfWork};

use super::types::{ErrorClass, Job, JobType};

/// Failure of one handler run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub class: ErrorClass,
    pub message: String,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Retryable,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::permanent(format!("{what} not found: {id}"))
    }
}

impl From<GenerationError> for HandlerError {
    fn from(err: GenerationError) -> Self {
        Self::retryable(err.to_string())
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        Self::retryable(err.to_string())
    }
}

/// Executes one job's work.
///
/// Handlers read through the store and call the generator, but return their
/// writes as a [`UnitOfWork`]; the dispatcher commits those writes together
/// with the job's own state transition.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn handle(&self, job: &Job) -> Result<UnitOfWork, HandlerError>;
}
