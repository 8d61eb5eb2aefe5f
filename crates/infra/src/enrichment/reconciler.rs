//! Pure mapping from parsed results to content mutations.
//!
//! Node and edge deduplication happen in the store (see
//! [`crate::store`]), so replaying the same mutations is harmless.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use kotoba_ai::{GeneratedConversation, SentenceAnalysis, WordEnrichment};
use kotoba_content::conversation::DEFAULT_LEVEL;
use kotoba_content::{
    Conversation, ExampleDraft, GrammarDraft, GrammarLevel, IdiomDraft, Speaker,
};
use kotoba_core::{DomainResult, IdiomId, SentenceId, SpeakerId, UserId, WordId};

use crate::store::ContentMutation;

/// Meaning + part of speech for the word, then one find-or-create per example.
pub fn word_changes(word_id: WordId, enrichment: &WordEnrichment) -> Vec<ContentMutation> {
    let mut changes = Vec::with_capacity(1 + enrichment.examples.len());
    changes.push(ContentMutation::ApplyWordEnrichment {
        word_id,
        meaning: enrichment.translation.clone(),
        part_of_speech: enrichment.part_of_speech.clone(),
    });
    changes.extend(enrichment.examples.iter().map(|ex| ContentMutation::AttachExample {
        word_id,
        example: ExampleDraft {
            english: ex.english.clone(),
            japanese: ex.japanese.clone(),
        },
    }));
    changes
}

/// Idioms and grammar points for the sentence, then the analyzed flag.
///
/// An empty analysis still marks the sentence as analyzed.
pub fn analysis_changes(sentence_id: SentenceId, analysis: &SentenceAnalysis) -> Vec<ContentMutation> {
    let mut changes = Vec::with_capacity(analysis.idioms.len() + analysis.grammars.len() + 1);

    for idiom in &analysis.idioms {
        changes.push(ContentMutation::AttachIdiom {
            sentence_id,
            idiom: IdiomDraft {
                phrase: idiom.idiom.clone(),
                meaning: idiom.meaning.clone(),
                example: idiom.example.clone(),
            },
        });
    }
    for grammar in &analysis.grammars {
        changes.push(ContentMutation::AttachGrammar {
            sentence_id,
            grammar: GrammarDraft {
                pattern: grammar.pattern.clone(),
                explanation: grammar.explanation.clone(),
                level: GrammarLevel::parse_lenient(grammar.level.as_deref()),
            },
        });
    }

    changes.push(ContentMutation::MarkSentenceAnalyzed {
        sentence_id,
        translation: analysis.translation.clone(),
    });
    changes
}

/// What a conversation was generated from.
#[derive(Debug, Clone, Default)]
pub struct ConversationSeed {
    pub user_id: Option<UserId>,
    pub situation: Option<String>,
    pub level: Option<i32>,
    pub word_refs: Vec<WordId>,
    pub sentence_refs: Vec<SentenceId>,
    pub idiom_refs: Vec<IdiomId>,
}

/// Build the conversation aggregate from generator output.
///
/// Placeholder speaker ids ("A", "B") are replaced with fresh ids; a line
/// whose speaker matches neither a placeholder id nor a speaker name gets no
/// speaker. Returns `None` when no line has English text.
pub fn assemble_conversation(
    generated: &GeneratedConversation,
    seed: ConversationSeed,
    now: DateTime<Utc>,
) -> DomainResult<Option<Conversation>> {
    let mut conversation = Conversation::new(seed.user_id, now);
    conversation.description = generated
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    conversation.situation = seed.situation;
    conversation.level = seed.level.unwrap_or(DEFAULT_LEVEL);
    conversation.word_refs = seed.word_refs;
    conversation.sentence_refs = seed.sentence_refs;
    conversation.idiom_refs = seed.idiom_refs;

    let mut by_placeholder: HashMap<String, SpeakerId> = HashMap::new();
    let mut by_name: HashMap<String, SpeakerId> = HashMap::new();

    for (n, generated_speaker) in generated.speakers.iter().enumerate() {
        let placeholder = generated_speaker.id.trim();
        let name = match generated_speaker.name.trim() {
            "" if !placeholder.is_empty() => placeholder.to_string(),
            "" => format!("Speaker {}", n + 1),
            name => name.to_string(),
        };
        let speaker = Speaker {
            age: generated_speaker.age,
            gender: non_blank(&generated_speaker.gender),
            nationality: non_blank(&generated_speaker.nationality),
            setting: non_blank(&generated_speaker.setting),
            personality: non_blank(&generated_speaker.personality),
            image: non_blank(&generated_speaker.image),
            ..Speaker::named(name.clone())
        };
        let id = conversation.add_speaker(speaker);
        if !placeholder.is_empty() {
            by_placeholder.entry(placeholder.to_string()).or_insert(id);
        }
        by_name.entry(name.to_lowercase()).or_insert(id);
    }

    for line in &generated.lines {
        let english = line.english.trim();
        if english.is_empty() {
            continue;
        }
        let speaker_id = line.speaker.as_deref().map(str::trim).and_then(|s| {
            by_placeholder
                .get(s)
                .or_else(|| by_name.get(&s.to_lowercase()))
                .copied()
        });
        conversation.push_line(speaker_id, english, line.japanese.trim())?;
    }

    if conversation.is_empty() {
        return Ok(None);
    }
    Ok(Some(conversation))
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
