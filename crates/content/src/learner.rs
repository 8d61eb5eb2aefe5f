//! Per-learner progress links to words and sentences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kotoba_core::{RelationId, SentenceId, UserId, WordId};

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStatus {
    #[default]
    New,
    Learning,
    Mastered,
}

labeled_enum!(LearningStatus {
    New => "new",
    Learning => "learning",
    Mastered => "mastered",
});

impl LearningStatus {
    /// Still being studied (used to seed conversation generation).
    pub fn in_progress(&self) -> bool {
        !matches!(self, LearningStatus::Mastered)
    }
}

/// A learner's link to one content record; at most one per (user, target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerLink<T> {
    pub id: RelationId,
    pub user_id: UserId,
    pub target: T,
    pub learning_status: LearningStatus,
    pub created_at: DateTime<Utc>,
}

impl<T> LearnerLink<T> {
    pub fn new(user_id: UserId, target: T, now: DateTime<Utc>) -> Self {
        Self {
            id: RelationId::new(),
            user_id,
            target,
            learning_status: LearningStatus::New,
            created_at: now,
        }
    }
}

pub type UserWord = LearnerLink<WordId>;
pub type UserSentence = LearnerLink<SentenceId>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_mastered_is_out_of_progress() {
        assert!(LearningStatus::New.in_progress());
        assert!(LearningStatus::Learning.in_progress());
        assert!(!LearningStatus::Mastered.in_progress());
    }
}
