//! Registration services: the entry points that create content and the jobs
//! that enrich it.
//!
//! Content rows and the job they trigger are committed in one unit of work,
//! so a registered word never exists without its enrichment job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use kotoba_content::{
    content_key, Difficulty, GrammarDraft, IdiomDraft, Sentence, Word,
};
use kotoba_core::{DomainError, IdiomId, SentenceId, UserId, WordId};

use crate::jobs::payload::{self, ConversationJobPayload, SentenceJobPayload, WordJobPayload};
use crate::jobs::{Job, JobId, JobType};
use crate::store::{ContentMutation, EnrichmentStore, StoreError, UnitOfWork};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
}

/// Result of [`ContentService::register_word`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredWord {
    pub word_id: WordId,
    /// `false` when the text was already registered.
    pub created: bool,
    pub job_id: Option<JobId>,
}

/// Result of [`ContentService::register_sentence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredSentence {
    pub sentence_id: SentenceId,
    pub created: bool,
    pub job_id: Option<JobId>,
}

/// A sentence as submitted by a learner or an importer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSentence {
    pub text: String,
    pub translation: String,
    pub source: Option<String>,
    pub difficulty: Difficulty,
    /// Pre-supplied analysis. When any is given no analysis job is created.
    pub idioms: Vec<IdiomDraft>,
    pub grammars: Vec<GrammarDraft>,
}

impl NewSentence {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_translation(mut self, translation: impl Into<String>) -> Self {
        self.translation = translation.into();
        self
    }
}

pub struct ContentService<S> {
    store: Arc<S>,
}

impl<S: EnrichmentStore> ContentService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Register a word by spelling, enqueueing its enrichment job.
    ///
    /// An already-registered spelling returns the existing word and enqueues
    /// nothing; the user is still linked to it.
    pub async fn register_word(
        &self,
        text: &str,
        user: Option<UserId>,
    ) -> Result<RegisteredWord, ServiceError> {
        let key = content_key(text)?;
        if let Some(existing) = self.store.word_by_text(&key).await? {
            return self.existing_word(existing, user).await;
        }

        let now = Utc::now();
        let word = Word::register(&key, user, now)?;
        let word_id = word.id;
        let job = Job::new(
            JobType::WordProcessing,
            payload::encode(&WordJobPayload {
                word_id,
                word: word.text.clone(),
                created_by: user,
            }),
            now,
        );
        let job_id = job.id;

        let mut work = UnitOfWork::new().mutate(ContentMutation::InsertWord(word));
        if let Some(user_id) = user {
            work.push(ContentMutation::LinkUserWord { user_id, word_id });
        }
        work.enqueue_job(job);

        match self.store.commit(work).await {
            Ok(()) => {
                info!(word_id = %word_id, job_id = %job_id, word = %key, "word registered");
                Ok(RegisteredWord {
                    word_id,
                    created: true,
                    job_id: Some(job_id),
                })
            }
            // Lost a race with a concurrent registration of the same text.
            Err(StoreError::Conflict(msg)) => match self.store.word_by_text(&key).await? {
                Some(existing) => self.existing_word(existing, user).await,
                None => Err(StoreError::Conflict(msg).into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn existing_word(
        &self,
        existing: Word,
        user: Option<UserId>,
    ) -> Result<RegisteredWord, ServiceError> {
        debug!(word_id = %existing.id, "word already registered");
        if let Some(user_id) = user {
            self.store
                .commit(UnitOfWork::new().mutate(ContentMutation::LinkUserWord {
                    user_id,
                    word_id: existing.id,
                }))
                .await?;
        }
        Ok(RegisteredWord {
            word_id: existing.id,
            created: false,
            job_id: None,
        })
    }

    /// Register a sentence by text.
    ///
    /// - New text with pre-supplied idioms or grammar points: stored with
    ///   them, no analysis job (the sentence stays unanalyzed).
    /// - New text otherwise: stored and queued for analysis.
    /// - Existing text: reused; queued for analysis only if not analyzed yet.
    pub async fn register_sentence(
        &self,
        sentence: NewSentence,
        user: Option<UserId>,
    ) -> Result<RegisteredSentence, ServiceError> {
        let key = content_key(&sentence.text)?;
        if let Some(existing) = self.store.sentence_by_text(&key).await? {
            return self.existing_sentence(existing, user).await;
        }

        let now = Utc::now();
        let record = Sentence::new(&key, sentence.translation, now)?
            .with_source(sentence.source)
            .with_difficulty(sentence.difficulty);
        let sentence_id = record.id;
        let supplied = !sentence.idioms.is_empty() || !sentence.grammars.is_empty();
        let job = (!supplied).then(|| analysis_job(&record, now));
        let job_id = job.as_ref().map(|j| j.id);

        let mut work = UnitOfWork::new().mutate(ContentMutation::InsertSentence(record));
        for idiom in sentence.idioms {
            work.push(ContentMutation::AttachIdiom { sentence_id, idiom });
        }
        for grammar in sentence.grammars {
            work.push(ContentMutation::AttachGrammar {
                sentence_id,
                grammar,
            });
        }
        if let Some(user_id) = user {
            work.push(ContentMutation::LinkUserSentence {
                user_id,
                sentence_id,
            });
        }
        if let Some(job) = job {
            work.enqueue_job(job);
        }

        match self.store.commit(work).await {
            Ok(()) => {
                info!(sentence_id = %sentence_id, queued = job_id.is_some(), "sentence registered");
                Ok(RegisteredSentence {
                    sentence_id,
                    created: true,
                    job_id,
                })
            }
            Err(StoreError::Conflict(msg)) => match self.store.sentence_by_text(&key).await? {
                Some(existing) => self.existing_sentence(existing, user).await,
                None => Err(StoreError::Conflict(msg).into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn existing_sentence(
        &self,
        existing: Sentence,
        user: Option<UserId>,
    ) -> Result<RegisteredSentence, ServiceError> {
        let mut work = UnitOfWork::new();
        if let Some(user_id) = user {
            work.push(ContentMutation::LinkUserSentence {
                user_id,
                sentence_id: existing.id,
            });
        }
        let job_id = if existing.is_analyzed {
            None
        } else {
            let job = analysis_job(&existing, Utc::now());
            let id = job.id;
            work.enqueue_job(job);
            Some(id)
        };
        if !work.is_empty() {
            self.store.commit(work).await?;
        }
        debug!(sentence_id = %existing.id, queued = job_id.is_some(), "sentence already registered");
        Ok(RegisteredSentence {
            sentence_id: existing.id,
            created: false,
            job_id,
        })
    }

    /// Queue analysis for an existing sentence. `None` if it is already analyzed.
    pub async fn request_sentence_analysis(
        &self,
        sentence_id: SentenceId,
    ) -> Result<Option<JobId>, ServiceError> {
        let sentence = self
            .store
            .sentence(sentence_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                what: "sentence",
                id: sentence_id.to_string(),
            })?;
        if sentence.is_analyzed {
            return Ok(None);
        }
        let job_id = self.store.enqueue(analysis_job(&sentence, Utc::now())).await?;
        info!(sentence_id = %sentence_id, job_id = %job_id, "sentence analysis requested");
        Ok(Some(job_id))
    }

    /// Queue a conversation for the user, seeded with their in-progress content.
    pub async fn request_conversation(
        &self,
        user_id: UserId,
        situation: Option<String>,
        level: Option<i32>,
        idiom_ids: Vec<IdiomId>,
    ) -> Result<JobId, ServiceError> {
        let payload = payload::encode(&ConversationJobPayload {
            user_id,
            situation,
            level,
            idiom_ids,
        });
        let job_id = self
            .enqueue(JobType::ConversationGeneration, payload)
            .await?;
        info!(user_id = %user_id, job_id = %job_id, "conversation requested");
        Ok(job_id)
    }

    /// Enqueue an arbitrary job. The payload is not validated here; a payload
    /// its handler cannot decode fails at dispatch time.
    pub async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
    ) -> Result<JobId, ServiceError> {
        Ok(self
            .store
            .enqueue(Job::new(job_type, payload, Utc::now()))
            .await?)
    }
}

fn analysis_job(sentence: &Sentence, now: DateTime<Utc>) -> Job {
    Job::new(
        JobType::SentenceAnalysis,
        payload::encode(&SentenceJobPayload {
            sentence_id: sentence.id,
            sentence: sentence.text.clone(),
            translation: sentence.translation.clone(),
        }),
        now,
    )
}
