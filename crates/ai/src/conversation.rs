//! Generated conversation results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::parse::{parse_layered, tree};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedConversation {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub speakers: Vec<GeneratedSpeaker>,
    #[serde(default)]
    pub lines: Vec<GeneratedLine>,
}

/// A speaker as written by the generator; `id` is a placeholder ("A", "B")
/// that lines refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSpeaker {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age: Option<i32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub setting: Option<String>,
    #[serde(default)]
    pub personality: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedLine {
    #[serde(default)]
    pub speaker: Option<String>,
    pub english: String,
    #[serde(default)]
    pub japanese: String,
}

/// Parse a conversation response.
///
/// Returns `None` when nothing usable came back (no line with English text);
/// callers treat that as "nothing to persist".
pub fn parse_conversation(raw: &str) -> Option<GeneratedConversation> {
    let parsed = match parse_layered(raw, manual_conversation) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "conversation response unreadable");
            return None;
        }
    };
    debug!(stage = ?parsed.stage, "parsed conversation");

    let mut conversation = parsed.value;
    conversation.lines.retain(|l| !l.english.trim().is_empty());
    if conversation.lines.is_empty() {
        warn!("conversation response contained no lines");
        return None;
    }
    Some(conversation)
}

fn manual_conversation(root: &Value) -> Option<GeneratedConversation> {
    let obj = root.as_object()?;

    let speakers = tree::array(obj, &["speakers"])
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .map(|item| GeneratedSpeaker {
            id: tree::text(item, &["id"]).unwrap_or_default(),
            name: tree::text(item, &["name"]).unwrap_or_default(),
            age: tree::int(item, "age"),
            gender: tree::text(item, &["gender"]),
            nationality: tree::text(item, &["nationality"]),
            setting: tree::text(item, &["setting"]),
            personality: tree::text(item, &["personality"]),
            image: tree::text(item, &["image"]),
        })
        .collect();

    let lines = tree::array(obj, &["lines", "dialogue"])
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            Some(GeneratedLine {
                speaker: tree::text(item, &["speaker"]),
                english: tree::text(item, &["english"])?,
                japanese: tree::text(item, &["japanese"]).unwrap_or_default(),
            })
        })
        .collect();

    Some(GeneratedConversation {
        description: tree::text(obj, &["description"]),
        speakers,
        lines,
    })
}
