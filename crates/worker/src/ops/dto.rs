use serde::{Deserialize, Serialize};

use kotoba_content::{Difficulty, GrammarDraft, IdiomDraft};
use kotoba_core::{IdiomId, SentenceId, UserId, WordId};
use kotoba_infra::jobs::{JobId, JobOutcome};
use kotoba_infra::services::NewSentence;

#[derive(Debug, Deserialize)]
pub struct RecentJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct JobCreated {
    pub job_id: JobId,
}

#[derive(Debug, Deserialize)]
pub struct RegisterWordRequest {
    pub word: String,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
pub struct WordRegistered {
    pub word_id: WordId,
    pub created: bool,
    pub job_id: Option<JobId>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterSentenceRequest {
    pub text: String,
    #[serde(default)]
    pub translation: String,
    pub source: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub idioms: Vec<IdiomDraft>,
    #[serde(default)]
    pub grammars: Vec<GrammarDraft>,
    pub user_id: Option<UserId>,
}

impl RegisterSentenceRequest {
    pub fn into_parts(self) -> (NewSentence, Option<UserId>) {
        let sentence = NewSentence {
            text: self.text,
            translation: self.translation,
            source: self.source,
            difficulty: self.difficulty,
            idioms: self.idioms,
            grammars: self.grammars,
        };
        (sentence, self.user_id)
    }
}

#[derive(Debug, Serialize)]
pub struct SentenceRegistered {
    pub sentence_id: SentenceId,
    pub created: bool,
    pub job_id: Option<JobId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeQuery {
    /// Run the queued job right away instead of waiting for the next tick.
    #[serde(default)]
    pub now: bool,
}

#[derive(Debug, Serialize)]
pub struct AnalysisQueued {
    /// `None` when the sentence is already analyzed.
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationRequest {
    pub user_id: UserId,
    pub situation: Option<String>,
    pub level: Option<i32>,
    #[serde(default)]
    pub idiom_ids: Vec<IdiomId>,
}
