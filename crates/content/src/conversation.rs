//! Generated conversation aggregate.
//!
//! A conversation owns its speakers and ordered lines and references the
//! words, sentences and idioms it was seeded with. It is persisted as a whole,
//! together with the requesting learner's progress record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kotoba_core::{
    ConversationId, DomainError, DomainResult, Entity, IdiomId, LineId, RelationId, SentenceId,
    SpeakerId, UserId, WordId,
};

pub const DEFAULT_TITLE: &str = "Generated Conversation";
pub const DEFAULT_LEVEL: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub id: SpeakerId,
    pub name: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub nationality: Option<String>,
    pub setting: Option<String>,
    pub personality: Option<String>,
    pub image: Option<String>,
}

impl Speaker {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: SpeakerId::new(),
            name: name.into(),
            age: None,
            gender: None,
            nationality: None,
            setting: None,
            personality: None,
            image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationLine {
    pub id: LineId,
    /// 1-based position within the conversation.
    pub order: u32,
    pub speaker_id: Option<SpeakerId>,
    pub english: String,
    pub japanese: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub description: Option<String>,
    pub situation: Option<String>,
    pub level: i32,
    pub speakers: Vec<Speaker>,
    pub lines: Vec<ConversationLine>,
    pub word_refs: Vec<WordId>,
    pub sentence_refs: Vec<SentenceId>,
    pub idiom_refs: Vec<IdiomId>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(created_by: Option<UserId>, now: DateTime<Utc>) -> Self {
        Self {
            id: ConversationId::new(),
            title: DEFAULT_TITLE.to_string(),
            description: None,
            situation: None,
            level: DEFAULT_LEVEL,
            speakers: Vec::new(),
            lines: Vec::new(),
            word_refs: Vec::new(),
            sentence_refs: Vec::new(),
            idiom_refs: Vec::new(),
            created_by,
            created_at: now,
        }
    }

    pub fn add_speaker(&mut self, speaker: Speaker) -> SpeakerId {
        let id = speaker.id;
        self.speakers.push(speaker);
        id
    }

    /// Append a line; order numbers are assigned consecutively from 1.
    pub fn push_line(
        &mut self,
        speaker_id: Option<SpeakerId>,
        english: impl Into<String>,
        japanese: impl Into<String>,
    ) -> DomainResult<LineId> {
        if let Some(id) = speaker_id {
            if !self.speakers.iter().any(|s| s.id == id) {
                return Err(DomainError::invariant(format!(
                    "line references unknown speaker {id}"
                )));
            }
        }
        let line = ConversationLine {
            id: LineId::new(),
            order: self.lines.len() as u32 + 1,
            speaker_id,
            english: english.into(),
            japanese: japanese.into(),
        };
        let id = line.id;
        self.lines.push(line);
        Ok(id)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Entity for Conversation {
    type Id = ConversationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationProgress {
    #[default]
    New,
    Learning,
    Completed,
}

labeled_enum!(ConversationProgress {
    New => "new",
    Learning => "learning",
    Completed => "completed",
});

/// Links a learner to a conversation generated for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConversation {
    pub id: RelationId,
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub status: ConversationProgress,
    pub created_at: DateTime<Utc>,
}

impl UserConversation {
    pub fn start(user_id: UserId, conversation_id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            id: RelationId::new(),
            user_id,
            conversation_id,
            status: ConversationProgress::New,
            created_at: now,
        }
    }
}
