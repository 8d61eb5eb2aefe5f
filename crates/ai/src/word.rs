//! Word enrichment results.
//!
//! A word's definition is a primary record field, so unlike sentence analysis
//! a response that yields no translation is an error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::parse::{parse_layered, tree, ParseError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordEnrichment {
    #[serde(alias = "meaning", alias = "japanese_translation")]
    pub translation: String,
    #[serde(rename = "partOfSpeech", alias = "part_of_speech", alias = "pos", default)]
    pub part_of_speech: String,
    #[serde(
        alias = "example_sentences",
        alias = "sentences",
        alias = "example",
        default
    )]
    pub examples: Vec<WordExample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordExample {
    #[serde(alias = "sentence", alias = "english_sentence", alias = "text")]
    pub english: String,
    #[serde(
        alias = "japanese_translation",
        alias = "translation",
        alias = "japanese_text",
        default
    )]
    pub japanese: String,
}

const TRANSLATION_KEYS: &[&str] = &["translation", "meaning", "japanese_translation"];
const POS_KEYS: &[&str] = &["partOfSpeech", "part_of_speech", "pos"];
const EXAMPLES_KEYS: &[&str] = &["examples", "example_sentences", "sentences", "example"];
const ENGLISH_KEYS: &[&str] = &["english", "sentence", "english_sentence", "text"];
// `english_translation` shows up in the nested `{ "<word>": {...} }` shape and,
// despite its name, holds the Japanese side.
const JAPANESE_KEYS: &[&str] = &[
    "japanese",
    "japanese_translation",
    "translation",
    "japanese_text",
    "english_translation",
];

/// Parse a word enrichment response.
///
/// Fails when no stage yields a non-blank translation.
pub fn parse_word_enrichment(raw: &str) -> Result<WordEnrichment, ParseError> {
    let parsed = parse_layered(raw, manual_word)?;
    debug!(stage = ?parsed.stage, "parsed word enrichment");

    let mut enrichment = parsed.value;
    enrichment.translation = enrichment.translation.trim().to_string();
    if enrichment.translation.is_empty() {
        return Err(ParseError::MissingField("translation"));
    }
    enrichment.part_of_speech = enrichment.part_of_speech.trim().to_string();
    enrichment.examples.retain(|e| !e.english.trim().is_empty());
    for example in &mut enrichment.examples {
        example.english = example.english.trim().to_string();
        example.japanese = example.japanese.trim().to_string();
    }
    Ok(enrichment)
}

fn manual_word(root: &Value) -> Option<WordEnrichment> {
    let obj = root.as_object()?;
    word_from_object(obj).or_else(|| {
        // Nested shape: the definition sits one level down, keyed by the word.
        obj.values()
            .filter_map(Value::as_object)
            .find_map(word_from_object)
    })
}

fn word_from_object(obj: &Map<String, Value>) -> Option<WordEnrichment> {
    let translation = tree::text(obj, TRANSLATION_KEYS)?;
    let part_of_speech = tree::text(obj, POS_KEYS).unwrap_or_default();
    let examples = tree::array(obj, EXAMPLES_KEYS)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|item| {
                    Some(WordExample {
                        english: tree::text(item, ENGLISH_KEYS)?,
                        japanese: tree::text(item, JAPANESE_KEYS).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(WordEnrichment {
        translation,
        part_of_speech,
        examples,
    })
}
