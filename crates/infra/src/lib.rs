//! Infrastructure layer: configuration, storage, the job queue, enrichment
//! handlers and the external generation client.

pub mod config;
pub mod enrichment;
pub mod external;
pub mod jobs;
pub mod services;
pub mod store;
