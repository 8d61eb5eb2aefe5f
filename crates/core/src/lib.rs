//! `kotoba-core`: shared identifiers and error primitives.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    ConversationId, GrammarId, IdiomId, JobId, LineId, LogId, RelationId, SentenceId, SpeakerId,
    UserId, WordId,
};
