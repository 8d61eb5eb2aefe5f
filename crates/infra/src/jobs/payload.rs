//! Typed job payloads.
//!
//! Payloads are stored as opaque JSON; each handler decodes the shape it
//! expects. A payload that does not decode can never succeed, so decoding
//! failures are permanent.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use kotoba_core::{IdiomId, SentenceId, UserId, WordId};

use super::handler::HandlerError;
use super::types::Job;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordJobPayload {
    pub word_id: WordId,
    pub word: String,
    #[serde(default)]
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceJobPayload {
    pub sentence_id: SentenceId,
    pub sentence: String,
    #[serde(default)]
    pub translation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationJobPayload {
    pub user_id: UserId,
    #[serde(default)]
    pub situation: Option<String>,
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default)]
    pub idiom_ids: Vec<IdiomId>,
}

pub fn decode<T: DeserializeOwned>(job: &Job) -> Result<T, HandlerError> {
    serde_json::from_value(job.payload.clone()).map_err(|e| {
        HandlerError::permanent(format!("invalid {} payload: {e}", job.job_type))
    })
}

pub fn encode<T: Serialize>(payload: &T) -> serde_json::Value {
    serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
}
