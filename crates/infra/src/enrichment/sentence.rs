//! Sentence analysis: idiom and grammar extraction.

use std::sync::Arc;

use tracing::{info, warn};

use kotoba_ai::prompt::analysis_prompt;
use kotoba_ai::{parse_sentence_analysis, TaskProfile, TextGenerator};

use crate::jobs::payload::{self, SentenceJobPayload};
use crate::jobs::{HandlerError, Job, JobHandler, JobType};
use crate::store::{ContentStore, UnitOfWork};

use super::reconciler;

/// Handler for [`JobType::SentenceAnalysis`].
///
/// An already-analyzed sentence is skipped without calling the generator. An
/// unreadable response degrades to an empty analysis: the sentence is still
/// marked analyzed and the job completes.
pub struct SentenceAnalysisHandler<S, G> {
    store: Arc<S>,
    generator: G,
}

impl<S, G> SentenceAnalysisHandler<S, G> {
    pub fn new(store: Arc<S>, generator: G) -> Self {
        Self { store, generator }
    }
}

#[async_trait::async_trait]
impl<S, G> JobHandler for SentenceAnalysisHandler<S, G>
where
    S: ContentStore + 'static,
    G: TextGenerator + 'static,
{
    fn job_type(&self) -> JobType {
        JobType::SentenceAnalysis
    }

    async fn handle(&self, job: &Job) -> Result<UnitOfWork, HandlerError> {
        let payload: SentenceJobPayload = payload::decode(job)?;
        let sentence = self
            .store
            .sentence(payload.sentence_id)
            .await?
            .ok_or_else(|| HandlerError::not_found("sentence", payload.sentence_id))?;

        if sentence.is_analyzed {
            info!(sentence_id = %sentence.id, "sentence already analyzed, skipping");
            return Ok(UnitOfWork::new());
        }

        let known_translation = [sentence.translation.as_str(), payload.translation.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|t| !t.is_empty());
        let request =
            TaskProfile::SENTENCE_ANALYSIS.request(analysis_prompt(&sentence.text, known_translation));
        let raw = self.generator.generate(&request).await?;

        let analysis = parse_sentence_analysis(&raw);
        if analysis.is_empty() {
            warn!(sentence_id = %sentence.id, "analysis produced no idioms or grammar points");
        }
        info!(
            sentence_id = %sentence.id,
            idioms = analysis.idioms.len(),
            grammars = analysis.grammars.len(),
            "sentence analyzed"
        );

        Ok(UnitOfWork {
            mutations: reconciler::analysis_changes(sentence.id, &analysis),
            ..Default::default()
        })
    }
}
