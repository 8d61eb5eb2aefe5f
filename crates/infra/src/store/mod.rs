//! Content storage contract and its implementations.
//!
//! Every write goes through [`ContentStore::commit`], which applies a
//! [`UnitOfWork`] all-or-nothing: content mutations, new jobs and job updates
//! land together or not at all.
//!
//! ## Upsert semantics
//!
//! - Words and sentences: `Insert*` fails with [`StoreError::Conflict`] when
//!   the text already exists.
//! - Idioms, grammar points and example sentences attached by enrichment:
//!   looked up by canonical text and created only when absent; an existing
//!   node is reused as-is (first writer wins for its content fields).
//! - Relation edges: created only when the (source, target) pair is absent.
//! - Updates addressed to a missing row are no-ops.
//!
//! Replaying the same mutations therefore converges to the same state.

pub mod in_memory;
pub mod postgres;

use thiserror::Error;

use kotoba_content::{
    Conversation, ExampleDraft, GrammarDraft, GrammarPoint, Idiom, IdiomDraft, Sentence,
    UserConversation, Word, WordStatus,
};
use kotoba_core::{ConversationId, IdiomId, SentenceId, UserId, WordId};

use crate::jobs::{Job, JobStore};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid data: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// One change to the content graph.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentMutation {
    InsertWord(Word),
    InsertSentence(Sentence),
    SetWordStatus {
        word_id: WordId,
        status: WordStatus,
    },
    /// Writes meaning + part of speech and completes the word.
    ApplyWordEnrichment {
        word_id: WordId,
        meaning: String,
        part_of_speech: String,
    },
    /// Find-or-create the example sentence by text, then link it to the word.
    AttachExample {
        word_id: WordId,
        example: ExampleDraft,
    },
    /// Find-or-create the idiom by phrase, then link it to the sentence.
    AttachIdiom {
        sentence_id: SentenceId,
        idiom: IdiomDraft,
    },
    /// Find-or-create the grammar point by pattern, then link it to the sentence.
    AttachGrammar {
        sentence_id: SentenceId,
        grammar: GrammarDraft,
    },
    MarkSentenceAnalyzed {
        sentence_id: SentenceId,
        translation: Option<String>,
    },
    LinkUserWord {
        user_id: UserId,
        word_id: WordId,
    },
    LinkUserSentence {
        user_id: UserId,
        sentence_id: SentenceId,
    },
    InsertConversation {
        conversation: Conversation,
        progress: Option<UserConversation>,
    },
}

/// A set of writes applied atomically by [`ContentStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    pub mutations: Vec<ContentMutation>,
    pub enqueue: Vec<Job>,
    pub update: Vec<Job>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mutate(mut self, mutation: ContentMutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn push(&mut self, mutation: ContentMutation) {
        self.mutations.push(mutation);
    }

    pub fn enqueue_job(&mut self, job: Job) {
        self.enqueue.push(job);
    }

    pub fn update_job(&mut self, job: Job) {
        self.update.push(job);
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.enqueue.is_empty() && self.update.is_empty()
    }
}

/// Content store abstraction: reads plus one atomic write entry point.
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    async fn word(&self, id: WordId) -> Result<Option<Word>, StoreError>;

    /// Exact match on the canonical text.
    async fn word_by_text(&self, text: &str) -> Result<Option<Word>, StoreError>;

    async fn sentence(&self, id: SentenceId) -> Result<Option<Sentence>, StoreError>;

    async fn sentence_by_text(&self, text: &str) -> Result<Option<Sentence>, StoreError>;

    async fn idiom_by_phrase(&self, phrase: &str) -> Result<Option<Idiom>, StoreError>;

    async fn grammar_by_pattern(&self, pattern: &str) -> Result<Option<GrammarPoint>, StoreError>;

    async fn idioms_by_ids(&self, ids: &[IdiomId]) -> Result<Vec<Idiom>, StoreError>;

    async fn idioms_for_sentence(&self, id: SentenceId) -> Result<Vec<Idiom>, StoreError>;

    async fn grammars_for_sentence(&self, id: SentenceId) -> Result<Vec<GrammarPoint>, StoreError>;

    async fn sentences_for_word(&self, id: WordId) -> Result<Vec<Sentence>, StoreError>;

    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError>;

    /// Words the user is still studying, most recently linked first.
    async fn learning_words(&self, user_id: UserId, limit: usize) -> Result<Vec<Word>, StoreError>;

    /// Sentences the user is still studying, most recently linked first.
    async fn learning_sentences(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Sentence>, StoreError>;

    /// Apply `work` all-or-nothing.
    async fn commit(&self, work: UnitOfWork) -> Result<(), StoreError>;
}

/// A store holding both jobs and content, so one commit can cover both.
pub trait EnrichmentStore: JobStore + ContentStore {}

impl<T: JobStore + ContentStore> EnrichmentStore for T {}
