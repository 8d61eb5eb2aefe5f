//! Conversation generation seeded with the learner's in-progress content.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use kotoba_ai::prompt::conversation_prompt;
use kotoba_ai::{parse_conversation, ConversationBrief, TaskProfile, TextGenerator};
use kotoba_content::{Conversation, UserConversation};

use crate::jobs::payload::{self, ConversationJobPayload};
use crate::jobs::{HandlerError, Job, JobHandler, JobType};
use crate::store::{ContentMutation, ContentStore, UnitOfWork};

use super::reconciler::{self, ConversationSeed};

/// How many in-progress words and sentences go into the prompt.
pub const CONTEXT_LIMIT: usize = 10;

/// Handler for [`JobType::ConversationGeneration`].
pub struct ConversationHandler<S, G> {
    store: Arc<S>,
    generator: G,
}

impl<S, G> ConversationHandler<S, G>
where
    S: ContentStore + 'static,
    G: TextGenerator + 'static,
{
    pub fn new(store: Arc<S>, generator: G) -> Self {
        Self { store, generator }
    }

    /// Generate a conversation without persisting it.
    ///
    /// `Ok(None)` means the generator answered but nothing usable came back;
    /// there is nothing to persist.
    pub async fn generate(
        &self,
        payload: &ConversationJobPayload,
    ) -> Result<Option<Conversation>, HandlerError> {
        let words = self
            .store
            .learning_words(payload.user_id, CONTEXT_LIMIT)
            .await?;
        let sentences = self
            .store
            .learning_sentences(payload.user_id, CONTEXT_LIMIT)
            .await?;
        let idioms = self.store.idioms_by_ids(&payload.idiom_ids).await?;

        let brief = ConversationBrief {
            situation: payload.situation.clone(),
            level: payload.level,
            learning_words: words.iter().map(|w| w.text.clone()).collect(),
            learning_sentences: sentences.iter().map(|s| s.text.clone()).collect(),
            idioms: idioms.iter().map(|i| i.phrase.clone()).collect(),
        };
        let request = TaskProfile::CONVERSATION.request(conversation_prompt(&brief));
        let raw = self.generator.generate(&request).await?;

        let Some(generated) = parse_conversation(&raw) else {
            warn!(user_id = %payload.user_id, "no usable conversation in response");
            return Ok(None);
        };

        let seed = ConversationSeed {
            user_id: Some(payload.user_id),
            situation: payload.situation.clone(),
            level: payload.level,
            word_refs: words.iter().map(|w| w.id).collect(),
            sentence_refs: sentences.iter().map(|s| s.id).collect(),
            idiom_refs: idioms.iter().map(|i| i.id).collect(),
        };
        reconciler::assemble_conversation(&generated, seed, Utc::now())
            .map_err(|e| HandlerError::retryable(e.to_string()))
    }
}

#[async_trait::async_trait]
impl<S, G> JobHandler for ConversationHandler<S, G>
where
    S: ContentStore + 'static,
    G: TextGenerator + 'static,
{
    fn job_type(&self) -> JobType {
        JobType::ConversationGeneration
    }

    async fn handle(&self, job: &Job) -> Result<UnitOfWork, HandlerError> {
        let payload: ConversationJobPayload = payload::decode(job)?;

        let Some(conversation) = self.generate(&payload).await? else {
            return Err(HandlerError::retryable(
                "generator returned no usable conversation",
            ));
        };

        info!(
            conversation_id = %conversation.id,
            user_id = %payload.user_id,
            lines = conversation.lines.len(),
            "conversation generated"
        );
        let progress = UserConversation::start(payload.user_id, conversation.id, Utc::now());
        Ok(UnitOfWork::new().mutate(ContentMutation::InsertConversation {
            conversation,
            progress: Some(progress),
        }))
    }
}
