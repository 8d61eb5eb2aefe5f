//! Prompt templates. Each one spells out the exact JSON shape the matching
//! parser expects; the generator is still free to ignore it.

/// Context for a generated conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationBrief {
    pub situation: Option<String>,
    pub level: Option<i32>,
    pub learning_words: Vec<String>,
    pub learning_sentences: Vec<String>,
    pub idioms: Vec<String>,
}

const UNSPECIFIED: &str = "not specified";

pub fn word_prompt(word: &str) -> String {
    format!(
        "You are an English learning assistant for Japanese speakers. \
For the English word below, give its Japanese translation, its part of speech, \
and a few example sentences with Japanese translations. \
Reply with JSON only, exactly in this format:\n\
{{\"translation\": \"Japanese translation\", \"partOfSpeech\": \"part of speech\", \
\"examples\": [{{\"english\": \"English example sentence\", \"japanese\": \"Japanese translation\"}}]}}\n\n\
Word: {word}"
    )
}

pub fn analysis_prompt(sentence: &str, translation: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are an English learning assistant for Japanese speakers. \
Analyze the English sentence below and extract the idioms and grammar points it contains.\n\n\
Important: reply with pure JSON only. Do not add explanations or comments.\n\
Use exactly this format:\n\
{\n\
  \"translation\": \"Japanese translation\",\n\
  \"idioms\": [\n\
    {\"idiom\": \"idiomatic expression\", \"meaning\": \"meaning in Japanese\", \"example\": \"usage example (optional)\"}\n\
  ],\n\
  \"grammars\": [\n\
    {\"pattern\": \"grammar pattern\", \"explanation\": \"explanation in Japanese\", \"level\": \"BEGINNER | INTERMEDIATE | ADVANCED\"}\n\
  ]\n\
}\n\n",
    );
    prompt.push_str("Sentence: ");
    prompt.push_str(sentence);
    if let Some(t) = translation.map(str::trim).filter(|t| !t.is_empty()) {
        prompt.push_str("\nKnown translation: ");
        prompt.push_str(t);
    }
    prompt
}

pub fn conversation_prompt(brief: &ConversationBrief) -> String {
    let mut prompt = String::from(
        "You are an English learning assistant for Japanese speakers.\n\
Write an example English conversation under the conditions below. \
Use the words the learner is studying and expressions close to the sentences they are studying.\n",
    );
    prompt.push_str("- Situation: ");
    prompt.push_str(brief.situation.as_deref().unwrap_or(UNSPECIFIED));
    prompt.push_str("\n- Level: ");
    match brief.level {
        Some(level) => prompt.push_str(&level.to_string()),
        None => prompt.push_str(UNSPECIFIED),
    }
    prompt.push_str("\n- Words being studied: ");
    prompt.push_str(&brief.learning_words.join(", "));
    prompt.push_str("\n- Sentences being studied: ");
    prompt.push_str(&brief.learning_sentences.join(", "));
    if !brief.idioms.is_empty() {
        prompt.push_str("\n- Idioms to include: ");
        prompt.push_str(&brief.idioms.join(", "));
    }
    prompt.push_str(
        "\n---\n\
In \"description\", state briefly in English who is talking with whom, when, where, \
in what situation and about what.\n\
Always reply with JSON in exactly this format:\n\
{\n\
  \"description\": \"Alice and Bob are talking about their weekend plans at a cafe on Saturday afternoon.\",\n\
  \"speakers\": [\n\
    {\"id\": \"A\", \"name\": \"Alice\", \"age\": 20, \"gender\": \"female\", \"nationality\": \"Japanese\", \"setting\": \"student\", \"personality\": \"cheerful\", \"image\": \"\"},\n\
    {\"id\": \"B\", \"name\": \"Bob\", \"age\": 35, \"gender\": \"male\", \"nationality\": \"American\", \"setting\": \"teacher\", \"personality\": \"kind and polite\", \"image\": \"\"}\n\
  ],\n\
  \"lines\": [\n\
    {\"speaker\": \"A\", \"english\": \"Hello, how are you?\", \"japanese\": \"こんにちは、お元気ですか？\"},\n\
    {\"speaker\": \"B\", \"english\": \"I'm fine, thank you. And you?\", \"japanese\": \"元気です。あなたは？\"}\n\
  ]\n\
}",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_prompt_embeds_word_and_schema() {
        let p = word_prompt("ubiquitous");
        assert!(p.ends_with("Word: ubiquitous"));
        assert!(p.contains("\"partOfSpeech\""));
    }

    #[test]
    fn analysis_prompt_omits_blank_translation() {
        let p = analysis_prompt("Break a leg!", Some("  "));
        assert!(p.ends_with("Sentence: Break a leg!"));
    }

    #[test]
    fn conversation_prompt_lists_learning_material() {
        let brief = ConversationBrief {
            situation: Some("at the airport".into()),
            level: None,
            learning_words: vec!["ubiquitous".into(), "itinerary".into()],
            learning_sentences: vec!["Where is the gate?".into()],
            idioms: vec![],
        };
        let p = conversation_prompt(&brief);
        assert!(p.contains("- Situation: at the airport"));
        assert!(p.contains("- Level: not specified"));
        assert!(p.contains("ubiquitous, itinerary"));
        assert!(!p.contains("Idioms to include"));
    }
}
