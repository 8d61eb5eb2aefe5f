//! Enrichment handlers and the reconciler that turns parsed generator output
//! into content mutations.
//!
//! Handlers never write the job row and, apart from the word handler's
//! `Processing` marker, never commit content themselves: they return a
//! [`UnitOfWork`](crate::store::UnitOfWork) that the dispatcher commits
//! together with the job's completion.

pub mod conversation;
pub mod placeholder;
pub mod reconciler;
pub mod sentence;
pub mod word;

pub use conversation::ConversationHandler;
pub use placeholder::{BatchTranslationHandler, LearningReminderHandler};
pub use reconciler::{analysis_changes, assemble_conversation, word_changes, ConversationSeed};
pub use sentence::SentenceAnalysisHandler;
pub use word::WordEnrichmentHandler;
