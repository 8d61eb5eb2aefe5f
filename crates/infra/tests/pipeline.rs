//! End-to-end enrichment pipeline against the in-memory store.
//!
//! Registration → job queue → dispatcher → handler → reconciler → store,
//! with a scripted generator standing in for the completion API.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use kotoba_ai::{GenerationError, GenerationRequest, LoggedGenerator, TextGenerator};
use kotoba_content::WordStatus;
use kotoba_core::UserId;
use kotoba_infra::enrichment::{
    BatchTranslationHandler, ConversationHandler, LearningReminderHandler,
    SentenceAnalysisHandler, WordEnrichmentHandler, word_changes,
};
use kotoba_infra::jobs::{
    DispatchConfig, Dispatcher, Job, JobId, JobStatus, JobStore, JobType, RetryPolicy,
    SentenceJobPayload,
};
use kotoba_infra::services::{ContentService, NewSentence};
use kotoba_infra::store::{ContentStore, InMemoryStore, UnitOfWork};

const UBIQUITOUS: &str = r#"{
    "translation": "どこにでもある",
    "partOfSpeech": "adjective",
    "examples": [
        {"english": "Smartphones are ubiquitous.", "japanese": "スマートフォンはどこにでもある。"},
        {"english": "Coffee shops are ubiquitous here.", "japanese": "ここではカフェがどこにでもある。"}
    ]
}"#;

const ANALYSIS: &str = r#"{
    "translation": "氷を割ろう。",
    "idioms": [{"idiom": "break the ice", "meaning": "緊張をほぐす", "example": "A joke can break the ice."}],
    "grammars": [{"pattern": "Let's + V", "explanation": "勧誘", "level": "BEGINNER"}]
}"#;

const CONVERSATION: &str = r#"{
    "description": "Two colleagues before a meeting.",
    "speakers": [{"id": "A", "name": "Aiko", "age": 28}, {"id": "B", "name": "Ben", "age": 34}],
    "lines": [
        {"speaker": "A", "english": "Phones are ubiquitous now.", "japanese": "今は携帯がどこにでもあるね。"},
        {"speaker": "B", "english": "Let's break the ice.", "japanese": "場を和ませよう。"}
    ]
}"#;

/// Replays canned responses in order; runs dry with `EmptyResponse`.
#[derive(Default)]
struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_ok(&self, text: &str) {
        self.responses.lock().unwrap().push_back(Ok(text.to_string()));
    }

    fn push_err(&self, err: GenerationError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(GenerationError::EmptyResponse))
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    generator: Arc<ScriptedGenerator>,
    dispatcher: Dispatcher<InMemoryStore>,
    service: ContentService<InMemoryStore>,
}

fn harness() -> Harness {
    let store = InMemoryStore::arc();
    let generator = ScriptedGenerator::new();
    let logged = Arc::new(LoggedGenerator::new(generator.clone(), store.clone()));

    let mut dispatcher = Dispatcher::new(
        store.clone(),
        RetryPolicy::default(),
        DispatchConfig::default(),
    );
    dispatcher
        .register(WordEnrichmentHandler::new(store.clone(), logged.clone()))
        .register(SentenceAnalysisHandler::new(store.clone(), logged.clone()))
        .register(ConversationHandler::new(store.clone(), logged))
        .register(BatchTranslationHandler)
        .register(LearningReminderHandler);

    Harness {
        service: ContentService::new(store.clone()),
        store,
        generator,
        dispatcher,
    }
}

fn test_user() -> UserId {
    UserId::new()
}

/// Pull a rescheduled job's retry time into the past.
async fn make_due(store: &InMemoryStore, id: JobId) {
    let mut job = store.get(id).await.unwrap().unwrap();
    job.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
    store.update(&job).await.unwrap();
}

#[tokio::test]
async fn registered_word_is_enriched_with_examples() {
    let h = harness();
    h.generator.push_ok(UBIQUITOUS);

    let registered = h.service.register_word("ubiquitous", Some(test_user())).await.unwrap();
    let report = h.dispatcher.run_tick().await.unwrap();

    assert_eq!(report.claimed, 1);
    assert_eq!(report.completed, 1);

    let word = h.store.word(registered.word_id).await.unwrap().unwrap();
    assert_eq!(word.meaning, "どこにでもある");
    assert_eq!(word.part_of_speech, "adjective");
    assert_eq!(word.status, WordStatus::Completed);

    let examples = h.store.sentences_for_word(word.id).await.unwrap();
    assert_eq!(examples.len(), 2);
    assert!(examples.iter().any(|s| s.text == "Smartphones are ubiquitous."
        && s.translation == "スマートフォンはどこにでもある。"));

    let job = h.store.get(registered.job_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let logs = h.store.generation_logs();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].prompt.contains("ubiquitous"));
    assert!(logs[0].approx_tokens.is_some());
}

#[tokio::test]
async fn word_that_keeps_failing_ends_in_error() {
    let h = harness();
    for _ in 0..3 {
        h.generator.push_err(GenerationError::Timeout(std::time::Duration::from_secs(30)));
    }

    let registered = h.service.register_word("ephemeral", None).await.unwrap();
    let job_id = registered.job_id.unwrap();

    for attempt in 1..=3u32 {
        make_due(&h.store, job_id).await;
        h.dispatcher.run_tick().await.unwrap();
        let job = h.store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.retry_count, attempt);
    }

    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error_message.unwrap().contains("timed out"));

    let word = h.store.word(registered.word_id).await.unwrap().unwrap();
    assert_eq!(word.status, WordStatus::Error);

    // Exhausted jobs are never claimed again.
    make_due(&h.store, job_id).await;
    assert_eq!(h.dispatcher.run_tick().await.unwrap().claimed, 0);
    assert_eq!(h.generator.calls(), 3);

    let failed_logs = h.store.generation_logs();
    assert_eq!(failed_logs.len(), 3);
    assert!(failed_logs.iter().all(|l| l.response.starts_with("ERROR: ")));
}

#[tokio::test]
async fn word_with_unparseable_responses_ends_in_error() {
    let h = harness();
    for _ in 0..3 {
        h.generator.push_ok("Sorry, I do not know this word.");
    }

    let registered = h.service.register_word("quixotic", None).await.unwrap();
    let job_id = registered.job_id.unwrap();

    for attempt in 1..=3u32 {
        make_due(&h.store, job_id).await;
        let report = h.dispatcher.run_tick().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.completed, 0);
        let job = h.store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.retry_count, attempt);
    }

    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.retry_count, 3);
    assert!(job.error_message.unwrap().contains("quixotic"));

    let word = h.store.word(registered.word_id).await.unwrap().unwrap();
    assert_eq!(word.status, WordStatus::Error);
    assert!(word.meaning.is_empty());
    assert!(h.store.sentences_for_word(word.id).await.unwrap().is_empty());
    assert_eq!(h.generator.calls(), 3);
}

#[tokio::test]
async fn failed_attempt_backs_off_two_minutes() {
    let h = harness();
    h.generator.push_err(GenerationError::Api {
        status: 503,
        body: "overloaded".into(),
    });

    let registered = h.service.register_word("serendipity", None).await.unwrap();
    let before = Utc::now();
    let report = h.dispatcher.run_tick().await.unwrap();

    assert_eq!(report.retried, 1);
    let job = h.store.get(registered.job_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    let delay = job.next_retry_at.unwrap() - before;
    assert!(delay >= chrono::Duration::seconds(119) && delay <= chrono::Duration::seconds(121));

    // Not eligible again until the backoff elapses.
    assert_eq!(h.dispatcher.run_tick().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn sentence_analysis_attaches_idioms_and_grammar() {
    let h = harness();
    h.generator.push_ok(ANALYSIS);

    let registered = h
        .service
        .register_sentence(NewSentence::new("Let's break the ice."), None)
        .await
        .unwrap();
    h.dispatcher.run_tick().await.unwrap();

    let sentence = h.store.sentence(registered.sentence_id).await.unwrap().unwrap();
    assert!(sentence.is_analyzed);
    assert_eq!(sentence.translation, "氷を割ろう。");

    let idioms = h.store.idioms_for_sentence(sentence.id).await.unwrap();
    assert_eq!(idioms.len(), 1);
    assert_eq!(idioms[0].phrase, "break the ice");
    let grammars = h.store.grammars_for_sentence(sentence.id).await.unwrap();
    assert_eq!(grammars.len(), 1);
    assert_eq!(grammars[0].pattern, "Let's + V");
}

#[tokio::test]
async fn unparseable_analysis_still_completes() {
    let h = harness();
    h.generator.push_ok("Sorry, I can't find any idioms in that sentence.");

    let registered = h
        .service
        .register_sentence(NewSentence::new("It is what it is.").with_translation("仕方ない。"), None)
        .await
        .unwrap();
    let report = h.dispatcher.run_tick().await.unwrap();

    assert_eq!(report.completed, 1);
    let sentence = h.store.sentence(registered.sentence_id).await.unwrap().unwrap();
    assert!(sentence.is_analyzed);
    assert_eq!(sentence.translation, "仕方ない。");
    assert!(h.store.idioms_for_sentence(sentence.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn analyzed_sentence_is_skipped_without_a_generation_call() {
    let h = harness();
    h.generator.push_ok(ANALYSIS);

    let registered = h
        .service
        .register_sentence(NewSentence::new("Let's break the ice."), None)
        .await
        .unwrap();
    h.dispatcher.run_tick().await.unwrap();
    assert_eq!(h.generator.calls(), 1);

    let payload = SentenceJobPayload {
        sentence_id: registered.sentence_id,
        sentence: "Let's break the ice.".into(),
        translation: String::new(),
    };
    let again = h
        .service
        .enqueue(JobType::SentenceAnalysis, serde_json::to_value(&payload).unwrap())
        .await
        .unwrap();
    let report = h.dispatcher.run_tick().await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(h.generator.calls(), 1);
    let job = h.store.get(again).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(h.store.idioms_for_sentence(registered.sentence_id).await.unwrap().len(), 1);
    assert_eq!(h.store.generation_logs().len(), 1);
}

#[tokio::test]
async fn prose_wrapped_and_bare_responses_store_the_same_content() {
    let bare = harness();
    bare.generator.push_ok(UBIQUITOUS);
    let wrapped = harness();
    wrapped
        .generator
        .push_ok(&format!("Sure! Here is the JSON:\n```json\n{UBIQUITOUS}\n```\nHope it helps."));

    let mut words = Vec::new();
    for h in [&bare, &wrapped] {
        let registered = h.service.register_word("ubiquitous", None).await.unwrap();
        h.dispatcher.run_tick().await.unwrap();
        let word = h.store.word(registered.word_id).await.unwrap().unwrap();
        let mut examples: Vec<_> = h
            .store
            .sentences_for_word(word.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.text, s.translation))
            .collect();
        examples.sort();
        words.push((word.meaning, word.part_of_speech, word.status, examples));
    }

    assert_eq!(words[0], words[1]);
}

#[tokio::test]
async fn replaying_reconciled_changes_is_idempotent() {
    let h = harness();
    let registered = h.service.register_word("ubiquitous", None).await.unwrap();
    let enrichment = kotoba_ai::parse_word_enrichment(UBIQUITOUS).unwrap();
    let changes = || UnitOfWork {
        mutations: word_changes(registered.word_id, &enrichment),
        ..Default::default()
    };

    h.store.commit(changes()).await.unwrap();
    let once = h.store.counts().unwrap();
    h.store.commit(changes()).await.unwrap();
    let twice = h.store.counts().unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.sentences, 2);
    assert_eq!(twice.word_sentences, 2);
}

#[tokio::test]
async fn shared_idiom_is_stored_once() {
    let h = harness();
    h.generator.push_ok(ANALYSIS);
    h.generator.push_ok(ANALYSIS);

    let first = h
        .service
        .register_sentence(NewSentence::new("Let's break the ice."), None)
        .await
        .unwrap();
    let second = h
        .service
        .register_sentence(NewSentence::new("He told a joke to break the ice."), None)
        .await
        .unwrap();
    h.dispatcher.run_all_pending_now().await.unwrap();

    let a = h.store.idioms_for_sentence(first.sentence_id).await.unwrap();
    let b = h.store.idioms_for_sentence(second.sentence_id).await.unwrap();
    assert_eq!(a[0].id, b[0].id);
    let counts = h.store.counts().unwrap();
    assert_eq!(counts.idioms, 1);
    assert_eq!(counts.sentence_idioms, 2);
}

#[tokio::test]
async fn registering_a_word_twice_enqueues_once() {
    let h = harness();
    let first = h.service.register_word("ubiquitous", None).await.unwrap();
    let second = h.service.register_word("ubiquitous", None).await.unwrap();

    assert_eq!(first.word_id, second.word_id);
    assert_eq!(second.job_id, None);
    assert_eq!(h.store.stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn unknown_job_type_is_rejected_not_retried() {
    let h = harness();
    let id = h
        .store
        .enqueue(Job::new(
            JobType::Other("dictionary_sync".into()),
            serde_json::json!({}),
            Utc::now(),
        ))
        .await
        .unwrap();

    let report = h.dispatcher.run_tick().await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.claimed, 0);

    let job = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.retry_count, 3);
    assert!(job.error_message.unwrap().contains("dictionary_sync"));
}

#[tokio::test]
async fn one_failing_job_does_not_block_the_batch() {
    let h = harness();
    h.generator.push_err(GenerationError::Transport("connection reset".into()));
    h.generator.push_ok(UBIQUITOUS);

    let a = h.service.register_word("flaky", None).await.unwrap();
    let b = h.service.register_word("ubiquitous", None).await.unwrap();
    let report = h.dispatcher.run_tick().await.unwrap();

    assert_eq!(report.claimed, 2);
    assert_eq!(report.retried, 1);
    assert_eq!(report.completed, 1);

    let mut statuses = Vec::new();
    for registered in [a, b] {
        let job = h.store.get(registered.job_id.unwrap()).await.unwrap().unwrap();
        let word = h.store.word(registered.word_id).await.unwrap().unwrap();
        statuses.push((job.status, word.status));
    }
    statuses.sort_by_key(|(job, _)| job.as_str());
    assert_eq!(
        statuses,
        vec![
            (JobStatus::Completed, WordStatus::Completed),
            (JobStatus::Pending, WordStatus::Processing),
        ]
    );
}

#[tokio::test]
async fn conversation_is_persisted_for_the_user() {
    let h = harness();
    let user = test_user();
    h.generator.push_ok(UBIQUITOUS);
    h.generator.push_ok(CONVERSATION);

    h.service.register_word("ubiquitous", Some(user)).await.unwrap();
    h.dispatcher.run_tick().await.unwrap();

    let job_id = h
        .service
        .request_conversation(user, Some("office".into()), Some(2), Vec::new())
        .await
        .unwrap();
    h.dispatcher.run_tick().await.unwrap();

    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let counts = h.store.counts().unwrap();
    assert_eq!(counts.conversations, 1);
    assert_eq!(counts.user_conversations, 1);

    let prompts = h.generator.prompts.lock().unwrap();
    assert!(prompts[1].contains("ubiquitous"));
}

#[tokio::test]
async fn unusable_conversation_is_retried() {
    let h = harness();
    h.generator.push_ok("I'd rather not write a dialogue today.");

    let job_id = h
        .service
        .request_conversation(test_user(), None, None, Vec::new())
        .await
        .unwrap();
    let report = h.dispatcher.run_tick().await.unwrap();

    assert_eq!(report.retried, 1);
    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(h.store.counts().unwrap().conversations, 0);
}

#[tokio::test]
async fn run_all_pending_now_drains_placeholder_jobs() {
    let h = harness();
    for job_type in [JobType::BatchTranslation, JobType::LearningReminder] {
        h.service
            .enqueue(job_type, serde_json::json!({ "note": "placeholder" }))
            .await
            .unwrap();
    }

    let report = h.dispatcher.run_all_pending_now().await.unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(h.store.stats().await.unwrap().completed, 2);
}
