//! Shared knowledge-graph nodes (idioms, grammar points) and the edges that
//! connect them to sentences and words.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kotoba_core::{
    DomainResult, Entity, GrammarId, IdiomId, RelationId, SentenceId, WordId,
};

use crate::key::content_key;

/// Idiom node, keyed by its phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idiom {
    pub id: IdiomId,
    pub phrase: String,
    pub meaning: String,
    pub example: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Idiom content as extracted, before node identity is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdiomDraft {
    pub phrase: String,
    pub meaning: String,
    pub example: Option<String>,
}

impl Idiom {
    pub fn from_draft(draft: &IdiomDraft, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id: IdiomId::new(),
            phrase: content_key(&draft.phrase)?,
            meaning: draft.meaning.clone(),
            example: draft.example.clone().filter(|e| !e.trim().is_empty()),
            created_at: now,
        })
    }
}

impl Entity for Idiom {
    type Id = IdiomId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrammarLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

labeled_enum!(GrammarLevel {
    Beginner => "beginner",
    Intermediate => "intermediate",
    Advanced => "advanced",
});

impl GrammarLevel {
    /// Generated labels are free-form; anything unrecognized is intermediate.
    pub fn parse_lenient(label: Option<&str>) -> Self {
        label
            .and_then(|l| l.parse().ok())
            .unwrap_or_default()
    }
}

/// Grammar node, keyed by its pattern string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarPoint {
    pub id: GrammarId,
    pub pattern: String,
    pub explanation: String,
    pub level: GrammarLevel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarDraft {
    pub pattern: String,
    pub explanation: String,
    pub level: GrammarLevel,
}

impl GrammarPoint {
    pub fn from_draft(draft: &GrammarDraft, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id: GrammarId::new(),
            pattern: content_key(&draft.pattern)?,
            explanation: draft.explanation.clone(),
            level: draft.level,
            created_at: now,
        })
    }
}

impl Entity for GrammarPoint {
    type Id = GrammarId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Example sentence attached to a word by enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleDraft {
    pub english: String,
    pub japanese: String,
}

/// Associative edge with its own identity; at most one per (source, target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge<S, T> {
    pub id: RelationId,
    pub source: S,
    pub target: T,
    pub created_at: DateTime<Utc>,
}

impl<S: Copy + Eq, T: Copy + Eq> Edge<S, T> {
    pub fn new(source: S, target: T, now: DateTime<Utc>) -> Self {
        Self {
            id: RelationId::new(),
            source,
            target,
            created_at: now,
        }
    }

    pub fn connects(&self, source: S, target: T) -> bool {
        self.source == source && self.target == target
    }
}

pub type SentenceIdiom = Edge<SentenceId, IdiomId>;
pub type SentenceGrammar = Edge<SentenceId, GrammarId>;
pub type WordSentence = Edge<WordId, SentenceId>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_level_accepts_any_case() {
        assert_eq!(GrammarLevel::parse_lenient(Some("ADVANCED")), GrammarLevel::Advanced);
        assert_eq!(GrammarLevel::parse_lenient(Some(" beginner ")), GrammarLevel::Beginner);
    }

    #[test]
    fn lenient_level_defaults_to_intermediate() {
        assert_eq!(GrammarLevel::parse_lenient(None), GrammarLevel::Intermediate);
        assert_eq!(GrammarLevel::parse_lenient(Some("N3")), GrammarLevel::Intermediate);
    }

    #[test]
    fn idiom_from_draft_canonicalizes_phrase_and_drops_blank_example() {
        let draft = IdiomDraft {
            phrase: " break the ice ".to_string(),
            meaning: "緊張をほぐす".to_string(),
            example: Some("  ".to_string()),
        };
        let idiom = Idiom::from_draft(&draft, Utc::now()).unwrap();
        assert_eq!(idiom.phrase, "break the ice");
        assert_eq!(idiom.example, None);
    }

    #[test]
    fn edge_matches_its_pair_only() {
        let s = SentenceId::new();
        let i = IdiomId::new();
        let edge = SentenceIdiom::new(s, i, Utc::now());
        assert!(edge.connects(s, i));
        assert!(!edge.connects(s, IdiomId::new()));
    }
}
