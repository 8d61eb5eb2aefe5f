//! Word enrichment: meaning, part of speech and example sentences.

use std::sync::Arc;

use tracing::{debug, info};

use kotoba_ai::prompt::word_prompt;
use kotoba_ai::{parse_word_enrichment, TaskProfile, TextGenerator};
use kotoba_content::WordStatus;

use crate::jobs::payload::{self, WordJobPayload};
use crate::jobs::{HandlerError, Job, JobHandler, JobType};
use crate::store::{ContentMutation, ContentStore, UnitOfWork};

use super::reconciler;

/// Handler for [`JobType::WordProcessing`].
///
/// Any failure, including a response with no readable translation, fails the
/// attempt; once retries run out the dispatcher marks the word `Error`.
pub struct WordEnrichmentHandler<S, G> {
    store: Arc<S>,
    generator: G,
}

impl<S, G> WordEnrichmentHandler<S, G> {
    pub fn new(store: Arc<S>, generator: G) -> Self {
        Self { store, generator }
    }
}

#[async_trait::async_trait]
impl<S, G> JobHandler for WordEnrichmentHandler<S, G>
where
    S: ContentStore + 'static,
    G: TextGenerator + 'static,
{
    fn job_type(&self) -> JobType {
        JobType::WordProcessing
    }

    async fn handle(&self, job: &Job) -> Result<UnitOfWork, HandlerError> {
        let payload: WordJobPayload = payload::decode(job)?;
        let word = self
            .store
            .word(payload.word_id)
            .await?
            .ok_or_else(|| HandlerError::not_found("word", payload.word_id))?;

        self.store
            .commit(UnitOfWork::new().mutate(ContentMutation::SetWordStatus {
                word_id: word.id,
                status: WordStatus::Processing,
            }))
            .await?;

        let request = TaskProfile::WORD_ENRICHMENT.request(word_prompt(&word.text));
        let raw = self.generator.generate(&request).await?;

        let enrichment = parse_word_enrichment(&raw).map_err(|e| {
            HandlerError::retryable(format!("unusable enrichment for word '{}': {e}", word.text))
        })?;
        debug!(
            word_id = %word.id,
            examples = enrichment.examples.len(),
            "word enrichment parsed"
        );

        info!(word_id = %word.id, word = %word.text, "word enriched");
        Ok(UnitOfWork {
            mutations: reconciler::word_changes(word.id, &enrichment),
            ..Default::default()
        })
    }
}
