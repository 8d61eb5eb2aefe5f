//! Content domain module: the learner-facing knowledge graph.
//!
//! Words and sentences are content-addressed (their text is the natural key),
//! idioms and grammar points are nodes shared across every sentence that
//! mentions them, and relation edges connect the two. Everything here is
//! deterministic domain logic (no IO, no HTTP, no storage).

#[macro_use]
mod labels;

pub mod conversation;
pub mod key;
pub mod knowledge;
pub mod learner;
pub mod sentence;
pub mod word;

pub use conversation::{
    Conversation, ConversationLine, ConversationProgress, Speaker, UserConversation,
};
pub use key::content_key;
pub use knowledge::{
    Edge, ExampleDraft, GrammarDraft, GrammarLevel, GrammarPoint, Idiom, IdiomDraft,
    SentenceGrammar, SentenceIdiom, WordSentence,
};
pub use learner::{LearnerLink, LearningStatus, UserSentence, UserWord};
pub use sentence::{Difficulty, Sentence};
pub use word::{Word, WordStatus};
