//! Sentence analysis results (idioms and grammar points).
//!
//! Analysis is an enhancement: when nothing can be read from the response the
//! result is empty rather than an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::parse::{parse_layered, tree};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceAnalysis {
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub idioms: Vec<ExtractedIdiom>,
    #[serde(alias = "grammar", alias = "grammar_points", default)]
    pub grammars: Vec<ExtractedGrammar>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedIdiom {
    #[serde(alias = "phrase")]
    pub idiom: String,
    #[serde(default)]
    pub meaning: String,
    #[serde(default)]
    pub example: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedGrammar {
    pub pattern: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub level: Option<String>,
}

impl SentenceAnalysis {
    pub fn is_empty(&self) -> bool {
        self.idioms.is_empty() && self.grammars.is_empty()
    }

    fn tidy(mut self) -> Self {
        self.translation = self
            .translation
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        self.idioms.retain(|i| !i.idiom.trim().is_empty());
        self.grammars.retain(|g| !g.pattern.trim().is_empty());
        self
    }
}

/// Parse a sentence analysis response. Never fails.
pub fn parse_sentence_analysis(raw: &str) -> SentenceAnalysis {
    match parse_layered(raw, manual_analysis) {
        Ok(parsed) => {
            debug!(stage = ?parsed.stage, "parsed sentence analysis");
            parsed.value.tidy()
        }
        Err(e) => {
            warn!(error = %e, "sentence analysis unreadable; continuing with an empty result");
            SentenceAnalysis::default()
        }
    }
}

fn manual_analysis(root: &Value) -> Option<SentenceAnalysis> {
    let obj = root.as_object()?;

    let idioms = tree::array(obj, &["idioms"])
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            Some(ExtractedIdiom {
                idiom: tree::text(item, &["idiom", "phrase"])?,
                meaning: tree::text(item, &["meaning"]).unwrap_or_default(),
                example: tree::text(item, &["example"]),
            })
        })
        .collect();

    let grammars = tree::array(obj, &["grammars", "grammar", "grammar_points"])
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            Some(ExtractedGrammar {
                pattern: tree::text(item, &["pattern"])?,
                explanation: tree::text(item, &["explanation"]).unwrap_or_default(),
                level: tree::text(item, &["level"]),
            })
        })
        .collect();

    Some(SentenceAnalysis {
        translation: tree::text(obj, &["translation"]),
        idioms,
        grammars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = r#"{
        "translation": "土砂降りだ。",
        "idioms": [{"idiom": "raining cats and dogs", "meaning": "土砂降り", "example": "It's raining cats and dogs."}],
        "grammars": [{"pattern": "be + -ing", "explanation": "現在進行形", "level": "BEGINNER"}]
    }"#;

    #[test]
    fn well_formed_response_parses() {
        let a = parse_sentence_analysis(WELL_FORMED);
        assert_eq!(a.translation.as_deref(), Some("土砂降りだ。"));
        assert_eq!(a.idioms[0].idiom, "raining cats and dogs");
        assert_eq!(a.grammars[0].level.as_deref(), Some("BEGINNER"));
    }

    #[test]
    fn prose_wrapped_response_yields_the_same_result() {
        let wrapped = format!("Here is the analysis you asked for:\n{WELL_FORMED}\nLet me know!");
        assert_eq!(parse_sentence_analysis(&wrapped), parse_sentence_analysis(WELL_FORMED));
    }

    #[test]
    fn incomplete_elements_are_skipped_not_fatal() {
        let raw = r#"{"idioms":[{"meaning":"no phrase"},{"idiom":"break the ice"}],
                      "grammars":[{"explanation":"no pattern"},{"pattern":"used to + V"}]}"#;
        let a = parse_sentence_analysis(raw);
        assert_eq!(a.idioms.len(), 1);
        assert_eq!(a.idioms[0].meaning, "");
        assert_eq!(a.grammars.len(), 1);
        assert_eq!(a.grammars[0].pattern, "used to + V");
        assert_eq!(a.translation, None);
    }

    #[test]
    fn unparseable_response_is_empty() {
        let a = parse_sentence_analysis("The sentence has no idioms.");
        assert_eq!(a, SentenceAnalysis::default());
        assert!(a.is_empty());
    }

    #[test]
    fn blank_phrases_are_dropped() {
        let raw = r#"{"translation":"  ","idioms":[{"idiom":" "}],"grammars":[]}"#;
        let a = parse_sentence_analysis(raw);
        assert!(a.is_empty());
        assert_eq!(a.translation, None);
    }
}
