//! `kotoba-ai`
//!
//! **Responsibility:** the text-generation boundary of the enrichment pipeline.
//!
//! This crate is intentionally **not** part of the content model:
//! - It must not depend on content entities or storage.
//! - It must not mutate domain state.
//! - It turns prompts into raw text and raw text into typed, best-effort results.
//!
//! The external generator has no contract on output format, so every result
//! type goes through the layered parser in [`parse`].

pub mod analysis;
pub mod conversation;
pub mod generator;
pub mod log;
pub mod parse;
pub mod prompt;
pub mod task;
pub mod word;

pub use analysis::{parse_sentence_analysis, ExtractedGrammar, ExtractedIdiom, SentenceAnalysis};
pub use conversation::{
    parse_conversation, GeneratedConversation, GeneratedLine, GeneratedSpeaker,
};
pub use generator::{GenerationError, GenerationRequest, TextGenerator};
pub use log::{
    estimate_tokens, GenerationLog, GenerationLogSink, InMemoryGenerationLogSink, LogSinkError,
    LoggedGenerator,
};
pub use parse::{ParseError, Parsed, Stage};
pub use prompt::ConversationBrief;
pub use task::TaskProfile;
pub use word::{parse_word_enrichment, WordEnrichment, WordExample};
