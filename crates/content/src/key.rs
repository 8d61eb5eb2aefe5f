//! Natural keys of content-addressed entities.

use kotoba_core::{DomainError, DomainResult};

/// Canonical form of a word, sentence, idiom phrase or grammar pattern.
///
/// Surrounding whitespace is not part of the content. Case is: "Break the ice"
/// and "break the ice" stay distinct nodes.
pub fn content_key(text: &str) -> DomainResult<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("content text must not be blank"));
    }
    Ok(trimmed.to_string())
}
