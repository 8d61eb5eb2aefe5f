//! Durable job queue with retry, backoff and handler dispatch.
//!
//! ## Design
//!
//! - Jobs are typed ([`JobType`]) and carry an opaque JSON payload
//! - `Pending -> Processing -> {Completed | Pending (retry) | Error}`
//! - Exponential backoff: 2, 4, 8 minutes with the default [`RetryPolicy`]
//! - Claiming is atomic per store; unknown types are rejected at claim time
//!
//! ## Components
//!
//! - `Job`: the durable record and its transitions
//! - `JobStore`: persistence (see [`crate::store`] for implementations)
//! - `JobHandler`: type-specific work, returning a unit of work
//! - `Dispatcher`: claims a batch and runs it through the handlers
//! - `Scheduler`: drives the dispatcher on an interval

pub mod dispatcher;
pub mod handler;
pub mod payload;
pub mod scheduler;
pub mod store;
pub mod types;

pub use dispatcher::{DispatchConfig, DispatchError, Dispatcher, JobOutcome, TickReport};
pub use handler::{HandlerError, JobHandler};
pub use payload::{ConversationJobPayload, SentenceJobPayload, WordJobPayload};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::{ClaimBatch, ClaimRequest, JobStats, JobStore};
pub use types::{ErrorClass, FailureOutcome, Job, JobId, JobStatus, JobType, RetryPolicy};
