use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kotoba_core::{DomainResult, Entity, UserId, WordId};

use crate::key::content_key;

/// Enrichment state of a word.
///
/// `Pending` until the enrichment job picks it up, `Error` once the job has
/// exhausted its retries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

labeled_enum!(WordStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Error => "error",
});

/// A vocabulary entry, keyed by its spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub id: WordId,
    pub text: String,
    pub meaning: String,
    pub part_of_speech: String,
    pub status: WordStatus,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Word {
    /// A freshly registered word: blank meaning, awaiting enrichment.
    pub fn register(
        text: &str,
        created_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id: WordId::new(),
            text: content_key(text)?,
            meaning: String::new(),
            part_of_speech: String::new(),
            status: WordStatus::Pending,
            created_by,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn set_status(&mut self, status: WordStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    /// Record the generated definition and mark the word as completed.
    pub fn apply_enrichment(
        &mut self,
        meaning: impl Into<String>,
        part_of_speech: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.meaning = meaning.into();
        self.part_of_speech = part_of_speech.into();
        self.set_status(WordStatus::Completed, now);
    }
}

impl Entity for Word {
    type Id = WordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
