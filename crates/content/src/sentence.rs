use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kotoba_core::{DomainResult, Entity, SentenceId};

use crate::key::content_key;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

labeled_enum!(Difficulty {
    Easy => "easy",
    Medium => "medium",
    Hard => "hard",
});

/// An example or learner-supplied sentence, keyed by its text.
///
/// `is_analyzed` flips to `true` exactly once, when idiom/grammar extraction
/// has run for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub id: SentenceId,
    pub text: String,
    pub translation: String,
    pub source: Option<String>,
    pub difficulty: Difficulty,
    pub is_analyzed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sentence {
    pub fn new(
        text: &str,
        translation: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id: SentenceId::new(),
            text: content_key(text)?,
            translation: translation.into(),
            source: None,
            difficulty: Difficulty::default(),
            is_analyzed: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Mark the analysis as done, replacing the translation only when the
    /// analysis produced a non-blank one.
    pub fn mark_analyzed(&mut self, translation: Option<&str>, now: DateTime<Utc>) {
        if let Some(t) = translation.map(str::trim).filter(|t| !t.is_empty()) {
            self.translation = t.to_string();
        }
        self.is_analyzed = true;
        self.updated_at = now;
    }
}

impl Entity for Sentence {
    type Id = SentenceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
