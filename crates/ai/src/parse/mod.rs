//! Layered parsing of untrusted generator output.
//!
//! Stages, first success wins:
//!
//! 1. [`Stage::Strict`]: the whole (trimmed) text deserializes into `T`.
//! 2. [`Stage::Extracted`]: the span from the first `{` to the last `}` does.
//! 3. [`Stage::Repaired`]: that span does after [`repair::repair`].
//! 4. [`Stage::Manual`]: some candidate parses as a JSON tree and the caller's
//!    extractor pulls the fields out of it, skipping incomplete elements.
//!
//! What happens when every stage fails is a per-task decision and lives with
//! each result type, not here.

pub mod repair;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub use repair::{extract_object, repair};

/// The stage that produced a parsed value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    Strict,
    Extracted,
    Repaired,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub stage: Stage,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("response is empty")]
    Empty,

    #[error("response could not be read as the expected structure: {0}")]
    Unreadable(String),

    #[error("response is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Run the four stages against `raw`.
///
/// `manual` receives a parsed JSON tree and returns `None` when the tree does
/// not contain enough to build a `T`.
pub fn parse_layered<T, F>(raw: &str, manual: F) -> Result<Parsed<T>, ParseError>
where
    T: DeserializeOwned,
    F: Fn(&Value) -> Option<T>,
{
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(Parsed { value, stage: Stage::Strict });
    }

    let extracted = extract_object(trimmed);
    if let Some(span) = extracted.filter(|span| span.len() != trimmed.len()) {
        if let Ok(value) = serde_json::from_str::<T>(span) {
            return Ok(Parsed { value, stage: Stage::Extracted });
        }
    }

    let repaired = repair(extracted.unwrap_or(trimmed));
    let last_error = match serde_json::from_str::<T>(&repaired) {
        Ok(value) => return Ok(Parsed { value, stage: Stage::Repaired }),
        Err(e) => e.to_string(),
    };

    let candidates = [Some(trimmed), extracted, Some(repaired.as_str())];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(tree) = serde_json::from_str::<Value>(candidate) {
            if let Some(value) = manual(&tree) {
                return Ok(Parsed { value, stage: Stage::Manual });
            }
        }
    }

    Err(ParseError::Unreadable(last_error))
}

/// Helpers for manual extraction from a loosely shaped JSON object.
pub(crate) mod tree {
    use serde_json::{Map, Value};

    /// First key among `keys` holding a non-blank scalar, rendered as text.
    pub fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| match obj.get(*k)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    /// First key among `keys` holding an array.
    pub fn array<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Vec<Value>> {
        keys.iter().find_map(|k| obj.get(*k)?.as_array())
    }

    pub fn int(obj: &Map<String, Value>, key: &str) -> Option<i32> {
        match obj.get(key)? {
            Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pair {
        a: String,
        b: i32,
    }

    fn manual_pair(v: &Value) -> Option<Pair> {
        let obj = v.as_object()?;
        Some(Pair {
            a: tree::text(obj, &["a", "alpha"])?,
            b: tree::int(obj, "b").unwrap_or_default(),
        })
    }

    #[test]
    fn well_formed_input_parses_strictly() {
        let p = parse_layered(r#"{"a":"x","b":1}"#, manual_pair).unwrap();
        assert_eq!(p.stage, Stage::Strict);
        assert_eq!(p.value, Pair { a: "x".into(), b: 1 });
    }

    #[test]
    fn prose_around_the_object_is_stripped() {
        let raw = "Sure! Here is the JSON:\n{\"a\":\"x\",\"b\":1}\nHope this helps.";
        let p = parse_layered(raw, manual_pair).unwrap();
        assert_eq!(p.stage, Stage::Extracted);
        assert_eq!(p.value, Pair { a: "x".into(), b: 1 });
    }

    #[test]
    fn trailing_commas_and_single_quotes_are_repaired() {
        let raw = "{'a': 'x', 'b': 2,}";
        let p = parse_layered(raw, manual_pair).unwrap();
        assert_eq!(p.stage, Stage::Repaired);
        assert_eq!(p.value.b, 2);
    }

    #[test]
    fn aliased_fields_fall_through_to_manual_extraction() {
        let raw = r#"{"alpha":"x","b":"7"}"#;
        let p = parse_layered(raw, manual_pair).unwrap();
        assert_eq!(p.stage, Stage::Manual);
        assert_eq!(p.value, Pair { a: "x".into(), b: 7 });
    }

    #[test]
    fn garbage_is_unreadable() {
        let err = parse_layered("I cannot help with that.", manual_pair).unwrap_err();
        assert!(matches!(err, ParseError::Unreadable(_)));
    }

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(parse_layered("  \n", manual_pair).unwrap_err(), ParseError::Empty);
    }
}
