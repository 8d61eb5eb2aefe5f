//! In-memory store for tests/dev.
//!
//! All content and job tables sit behind a single `RwLock`. A commit applies
//! its unit of work to a copy of the tables and swaps the copy in only when
//! every step succeeded, so a failing commit leaves nothing behind.
//! Generation logs are append-only and live under their own lock, outside the
//! staged copy.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use kotoba_ai::{GenerationLog, GenerationLogSink, LogSinkError};
use kotoba_content::{
    content_key, Conversation, ExampleDraft, GrammarDraft, GrammarPoint, Idiom, IdiomDraft,
    LearnerLink, Sentence, SentenceGrammar, SentenceIdiom, UserConversation, UserSentence,
    UserWord, Word, WordSentence,
};
use kotoba_core::{
    ConversationId, Entity, GrammarId, IdiomId, JobId, SentenceId, UserId, WordId,
};

use crate::jobs::{ClaimBatch, ClaimRequest, Job, JobStats, JobStatus, JobStore};

use super::{ContentMutation, ContentStore, StoreError, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct Tables {
    words: HashMap<WordId, Word>,
    sentences: HashMap<SentenceId, Sentence>,
    idioms: HashMap<IdiomId, Idiom>,
    grammars: HashMap<GrammarId, GrammarPoint>,
    sentence_idioms: Vec<SentenceIdiom>,
    sentence_grammars: Vec<SentenceGrammar>,
    word_sentences: Vec<WordSentence>,
    user_words: Vec<UserWord>,
    user_sentences: Vec<UserSentence>,
    conversations: HashMap<ConversationId, Conversation>,
    user_conversations: Vec<UserConversation>,
    jobs: HashMap<JobId, Job>,
}

/// In-memory implementation of every store trait in this crate.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Tables>,
    logs: RwLock<Vec<GenerationLog>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".to_string()))
    }

    /// Recorded generation logs, oldest first.
    pub fn generation_logs(&self) -> Vec<GenerationLog> {
        self.logs.read().map(|logs| logs.clone()).unwrap_or_default()
    }

    /// Table sizes, for assertions in tests.
    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let t = self.read()?;
        Ok(StoreCounts {
            words: t.words.len(),
            sentences: t.sentences.len(),
            idioms: t.idioms.len(),
            grammars: t.grammars.len(),
            sentence_idioms: t.sentence_idioms.len(),
            sentence_grammars: t.sentence_grammars.len(),
            word_sentences: t.word_sentences.len(),
            user_words: t.user_words.len(),
            user_sentences: t.user_sentences.len(),
            conversations: t.conversations.len(),
            user_conversations: t.user_conversations.len(),
            jobs: t.jobs.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub words: usize,
    pub sentences: usize,
    pub idioms: usize,
    pub grammars: usize,
    pub sentence_idioms: usize,
    pub sentence_grammars: usize,
    pub word_sentences: usize,
    pub user_words: usize,
    pub user_sentences: usize,
    pub conversations: usize,
    pub user_conversations: usize,
    pub jobs: usize,
}

fn invalid(err: kotoba_core::DomainError) -> StoreError {
    StoreError::Invalid(err.to_string())
}

fn insert_entity<E: Entity>(table: &mut HashMap<E::Id, E>, entity: E) {
    table.insert(*entity.id(), entity);
}

/// Id of the first node matching `is_same`, inserting the one built by
/// `create` when there is none.
fn find_or_insert<E, F, C>(
    table: &mut HashMap<E::Id, E>,
    is_same: F,
    create: C,
) -> Result<E::Id, StoreError>
where
    E: Entity,
    F: Fn(&E) -> bool,
    C: FnOnce() -> Result<E, StoreError>,
{
    if let Some(existing) = table.values().find(|e| is_same(e)) {
        return Ok(*existing.id());
    }
    let entity = create()?;
    let id = *entity.id();
    table.insert(id, entity);
    Ok(id)
}

impl Tables {
    fn apply(&mut self, mutation: ContentMutation, now: DateTime<Utc>) -> Result<(), StoreError> {
        match mutation {
            ContentMutation::InsertWord(word) => {
                if self.words.values().any(|w| w.text == word.text) {
                    return Err(StoreError::Conflict(format!("word already exists: {}", word.text)));
                }
                insert_entity(&mut self.words, word);
            }
            ContentMutation::InsertSentence(sentence) => {
                if self.sentences.values().any(|s| s.text == sentence.text) {
                    return Err(StoreError::Conflict(format!(
                        "sentence already exists: {}",
                        sentence.text
                    )));
                }
                insert_entity(&mut self.sentences, sentence);
            }
            ContentMutation::SetWordStatus { word_id, status } => {
                if let Some(word) = self.words.get_mut(&word_id) {
                    word.set_status(status, now);
                }
            }
            ContentMutation::ApplyWordEnrichment {
                word_id,
                meaning,
                part_of_speech,
            } => {
                if let Some(word) = self.words.get_mut(&word_id) {
                    word.apply_enrichment(meaning, part_of_speech, now);
                }
            }
            ContentMutation::AttachExample { word_id, example } => {
                self.attach_example(word_id, &example, now)?;
            }
            ContentMutation::AttachIdiom { sentence_id, idiom } => {
                self.attach_idiom(sentence_id, &idiom, now)?;
            }
            ContentMutation::AttachGrammar {
                sentence_id,
                grammar,
            } => {
                self.attach_grammar(sentence_id, &grammar, now)?;
            }
            ContentMutation::MarkSentenceAnalyzed {
                sentence_id,
                translation,
            } => {
                if let Some(sentence) = self.sentences.get_mut(&sentence_id) {
                    sentence.mark_analyzed(translation.as_deref(), now);
                }
            }
            ContentMutation::LinkUserWord { user_id, word_id } => {
                if self.words.contains_key(&word_id)
                    && !linked(&self.user_words, user_id, word_id)
                {
                    self.user_words.push(LearnerLink::new(user_id, word_id, now));
                }
            }
            ContentMutation::LinkUserSentence {
                user_id,
                sentence_id,
            } => {
                if self.sentences.contains_key(&sentence_id)
                    && !linked(&self.user_sentences, user_id, sentence_id)
                {
                    self.user_sentences
                        .push(LearnerLink::new(user_id, sentence_id, now));
                }
            }
            ContentMutation::InsertConversation {
                conversation,
                progress,
            } => {
                if self.conversations.contains_key(&conversation.id) {
                    return Err(StoreError::Conflict(format!(
                        "conversation already exists: {}",
                        conversation.id
                    )));
                }
                if let Some(progress) = progress {
                    let exists = self.user_conversations.iter().any(|p| {
                        p.user_id == progress.user_id
                            && p.conversation_id == progress.conversation_id
                    });
                    if !exists {
                        self.user_conversations.push(progress);
                    }
                }
                insert_entity(&mut self.conversations, conversation);
            }
        }
        Ok(())
    }

    fn attach_example(
        &mut self,
        word_id: WordId,
        example: &ExampleDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !self.words.contains_key(&word_id) {
            return Ok(());
        }
        let text = content_key(&example.english).map_err(invalid)?;
        let sentence_id = find_or_insert(
            &mut self.sentences,
            |s| s.text == text,
            || Sentence::new(&text, example.japanese.clone(), now).map_err(invalid),
        )?;
        if !self.word_sentences.iter().any(|e| e.connects(word_id, sentence_id)) {
            self.word_sentences.push(WordSentence::new(word_id, sentence_id, now));
        }
        Ok(())
    }

    fn attach_idiom(
        &mut self,
        sentence_id: SentenceId,
        draft: &IdiomDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !self.sentences.contains_key(&sentence_id) {
            return Ok(());
        }
        let phrase = content_key(&draft.phrase).map_err(invalid)?;
        let idiom_id = find_or_insert(
            &mut self.idioms,
            |i| i.phrase == phrase,
            || Idiom::from_draft(draft, now).map_err(invalid),
        )?;
        if !self.sentence_idioms.iter().any(|e| e.connects(sentence_id, idiom_id)) {
            self.sentence_idioms.push(SentenceIdiom::new(sentence_id, idiom_id, now));
        }
        Ok(())
    }

    fn attach_grammar(
        &mut self,
        sentence_id: SentenceId,
        draft: &GrammarDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !self.sentences.contains_key(&sentence_id) {
            return Ok(());
        }
        let pattern = content_key(&draft.pattern).map_err(invalid)?;
        let grammar_id = find_or_insert(
            &mut self.grammars,
            |g| g.pattern == pattern,
            || GrammarPoint::from_draft(draft, now).map_err(invalid),
        )?;
        if !self
            .sentence_grammars
            .iter()
            .any(|e| e.connects(sentence_id, grammar_id))
        {
            self.sentence_grammars
                .push(SentenceGrammar::new(sentence_id, grammar_id, now));
        }
        Ok(())
    }

    fn enqueue(&mut self, job: Job) -> Result<JobId, StoreError> {
        if self.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job already exists: {}", job.id)));
        }
        let id = job.id;
        self.jobs.insert(id, job);
        Ok(id)
    }

    fn update(&mut self, job: Job) -> Result<(), StoreError> {
        match self.jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("job {}", job.id))),
        }
    }
}

fn linked<T: PartialEq>(links: &[LearnerLink<T>], user_id: UserId, target: T) -> bool {
    links
        .iter()
        .any(|l| l.user_id == user_id && l.target == target)
}

fn in_progress<T: Copy>(links: &[LearnerLink<T>], user_id: UserId) -> Vec<T> {
    let mut mine: Vec<&LearnerLink<T>> = links
        .iter()
        .filter(|l| l.user_id == user_id && l.learning_status.in_progress())
        .collect();
    mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    mine.into_iter().map(|l| l.target).collect()
}

#[async_trait::async_trait]
impl ContentStore for InMemoryStore {
    async fn word(&self, id: WordId) -> Result<Option<Word>, StoreError> {
        Ok(self.read()?.words.get(&id).cloned())
    }

    async fn word_by_text(&self, text: &str) -> Result<Option<Word>, StoreError> {
        Ok(self.read()?.words.values().find(|w| w.text == text).cloned())
    }

    async fn sentence(&self, id: SentenceId) -> Result<Option<Sentence>, StoreError> {
        Ok(self.read()?.sentences.get(&id).cloned())
    }

    async fn sentence_by_text(&self, text: &str) -> Result<Option<Sentence>, StoreError> {
        Ok(self.read()?.sentences.values().find(|s| s.text == text).cloned())
    }

    async fn idiom_by_phrase(&self, phrase: &str) -> Result<Option<Idiom>, StoreError> {
        Ok(self.read()?.idioms.values().find(|i| i.phrase == phrase).cloned())
    }

    async fn grammar_by_pattern(&self, pattern: &str) -> Result<Option<GrammarPoint>, StoreError> {
        Ok(self
            .read()?
            .grammars
            .values()
            .find(|g| g.pattern == pattern)
            .cloned())
    }

    async fn idioms_by_ids(&self, ids: &[IdiomId]) -> Result<Vec<Idiom>, StoreError> {
        let t = self.read()?;
        Ok(ids.iter().filter_map(|id| t.idioms.get(id).cloned()).collect())
    }

    async fn idioms_for_sentence(&self, id: SentenceId) -> Result<Vec<Idiom>, StoreError> {
        let t = self.read()?;
        Ok(t.sentence_idioms
            .iter()
            .filter(|e| e.source == id)
            .filter_map(|e| t.idioms.get(&e.target).cloned())
            .collect())
    }

    async fn grammars_for_sentence(&self, id: SentenceId) -> Result<Vec<GrammarPoint>, StoreError> {
        let t = self.read()?;
        Ok(t.sentence_grammars
            .iter()
            .filter(|e| e.source == id)
            .filter_map(|e| t.grammars.get(&e.target).cloned())
            .collect())
    }

    async fn sentences_for_word(&self, id: WordId) -> Result<Vec<Sentence>, StoreError> {
        let t = self.read()?;
        Ok(t.word_sentences
            .iter()
            .filter(|e| e.source == id)
            .filter_map(|e| t.sentences.get(&e.target).cloned())
            .collect())
    }

    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        Ok(self.read()?.conversations.get(&id).cloned())
    }

    async fn learning_words(&self, user_id: UserId, limit: usize) -> Result<Vec<Word>, StoreError> {
        let t = self.read()?;
        Ok(in_progress(&t.user_words, user_id)
            .into_iter()
            .filter_map(|id| t.words.get(&id).cloned())
            .take(limit)
            .collect())
    }

    async fn learning_sentences(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Sentence>, StoreError> {
        let t = self.read()?;
        Ok(in_progress(&t.user_sentences, user_id)
            .into_iter()
            .filter_map(|id| t.sentences.get(&id).cloned())
            .take(limit)
            .collect())
    }

    async fn commit(&self, work: UnitOfWork) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut guard = self.write()?;
        let mut staged = guard.clone();

        for mutation in work.mutations {
            staged.apply(mutation, now)?;
        }
        for job in work.enqueue {
            staged.enqueue(job)?;
        }
        for job in work.update {
            staged.update(job)?;
        }

        *guard = staged;
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryStore {
    async fn enqueue(&self, job: Job) -> Result<JobId, StoreError> {
        self.write()?.enqueue(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.read()?.jobs.get(&job_id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        self.write()?.update(job.clone())
    }

    async fn claim_batch(&self, request: &ClaimRequest) -> Result<ClaimBatch, StoreError> {
        let mut t = self.write()?;

        let mut eligible: Vec<&Job> = t
            .jobs
            .values()
            .filter(|j| j.is_eligible(request.now, request.max_retries, request.lease))
            .collect();
        // Sort by created_at to ensure FIFO
        eligible.sort_by_key(|j| (j.created_at, j.id));

        let mut to_claim = Vec::new();
        let mut to_reject = Vec::new();
        for job in eligible {
            if !request.accepts(&job.job_type) {
                to_reject.push(job.id);
            } else if to_claim.len() < request.limit {
                to_claim.push(job.id);
            }
        }

        let mut batch = ClaimBatch::default();
        for id in to_reject {
            if let Some(job) = t.jobs.get_mut(&id) {
                let reason = format!("unknown job type: {}", job.job_type);
                job.reject(reason, request.max_retries, request.now);
                batch.rejected.push(job.clone());
            }
        }
        for id in to_claim {
            if let Some(job) = t.jobs.get_mut(&id) {
                job.claim(request.now);
                batch.claimed.push(job.clone());
            }
        }
        Ok(batch)
    }

    async fn claim_job(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let mut t = self.write()?;
        match t.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.claim(now);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let t = self.read()?;
        let mut result: Vec<Job> = t
            .jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        result.truncate(limit);
        Ok(result)
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let t = self.read()?;
        let mut stats = JobStats::default();
        for job in t.jobs.values() {
            stats.count(job.status);
        }
        Ok(stats)
    }
}

#[async_trait::async_trait]
impl GenerationLogSink for InMemoryStore {
    async fn record(&self, log: GenerationLog) -> Result<(), LogSinkError> {
        self.logs
            .write()
            .map_err(|_| LogSinkError("in-memory log lock poisoned".to_string()))?
            .push(log);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobType;
    use kotoba_content::GrammarLevel;

    fn test_now() -> DateTime<Utc> {
        Utc::now()
    }

    fn claim_all(now: DateTime<Utc>) -> ClaimRequest {
        ClaimRequest {
            now,
            limit: 10,
            max_retries: 3,
            lease: None,
            accepted: JobType::KNOWN.to_vec(),
        }
    }

    async fn seeded_sentence(store: &InMemoryStore, text: &str) -> SentenceId {
        let sentence = Sentence::new(text, "", test_now()).unwrap();
        let id = sentence.id;
        store
            .commit(UnitOfWork::new().mutate(ContentMutation::InsertSentence(sentence)))
            .await
            .unwrap();
        id
    }

    fn idiom(sentence_id: SentenceId, phrase: &str, meaning: &str) -> ContentMutation {
        ContentMutation::AttachIdiom {
            sentence_id,
            idiom: IdiomDraft {
                phrase: phrase.into(),
                meaning: meaning.into(),
                example: None,
            },
        }
    }

    #[tokio::test]
    async fn duplicate_word_text_conflicts() {
        let store = InMemoryStore::new();
        let first = Word::register("ubiquitous", None, test_now()).unwrap();
        let second = Word::register("ubiquitous", None, test_now()).unwrap();

        store
            .commit(UnitOfWork::new().mutate(ContentMutation::InsertWord(first)))
            .await
            .unwrap();
        let err = store
            .commit(UnitOfWork::new().mutate(ContentMutation::InsertWord(second)))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.counts().unwrap().words, 1);
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_partial_writes() {
        let store = InMemoryStore::new();
        let existing = Word::register("ubiquitous", None, test_now()).unwrap();
        store
            .commit(UnitOfWork::new().mutate(ContentMutation::InsertWord(existing)))
            .await
            .unwrap();

        let mut work = UnitOfWork::new()
            .mutate(ContentMutation::InsertWord(
                Word::register("ephemeral", None, test_now()).unwrap(),
            ))
            .mutate(ContentMutation::InsertWord(
                Word::register("ubiquitous", None, test_now()).unwrap(),
            ));
        work.enqueue_job(Job::new(JobType::WordProcessing, serde_json::json!({}), test_now()));

        assert!(store.commit(work).await.is_err());
        let counts = store.counts().unwrap();
        assert_eq!(counts.words, 1);
        assert_eq!(counts.jobs, 0);
    }

    #[tokio::test]
    async fn idiom_nodes_and_edges_are_deduplicated_first_writer_wins() {
        let store = InMemoryStore::new();
        let s1 = seeded_sentence(&store, "Let's break the ice.").await;
        let s2 = seeded_sentence(&store, "He tried to break the ice.").await;

        for _ in 0..2 {
            store
                .commit(UnitOfWork::new().mutate(idiom(s1, "break the ice", "緊張をほぐす")))
                .await
                .unwrap();
        }
        store
            .commit(UnitOfWork::new().mutate(idiom(s2, " break the ice ", "別の説明")))
            .await
            .unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.idioms, 1);
        assert_eq!(counts.sentence_idioms, 2);

        let node = store.idiom_by_phrase("break the ice").await.unwrap().unwrap();
        assert_eq!(node.meaning, "緊張をほぐす");
        assert_eq!(store.idioms_for_sentence(s2).await.unwrap()[0].id, node.id);
    }

    #[tokio::test]
    async fn grammar_attached_to_missing_sentence_is_ignored() {
        let store = InMemoryStore::new();
        store
            .commit(UnitOfWork::new().mutate(ContentMutation::AttachGrammar {
                sentence_id: SentenceId::new(),
                grammar: GrammarDraft {
                    pattern: "used to + V".into(),
                    explanation: String::new(),
                    level: GrammarLevel::Intermediate,
                },
            }))
            .await
            .unwrap();
        assert_eq!(store.counts().unwrap().grammars, 0);
    }

    #[tokio::test]
    async fn generation_logs_survive_a_failed_commit() {
        let store = InMemoryStore::new();
        let log = GenerationLog::success("prompt", "response", 12);
        store.record(log).await.unwrap();

        let taken = Word::register("ubiquitous", None, test_now()).unwrap();
        store
            .commit(UnitOfWork::new().mutate(ContentMutation::InsertWord(taken)))
            .await
            .unwrap();
        let clash = Word::register("ubiquitous", None, test_now()).unwrap();
        assert!(store
            .commit(UnitOfWork::new().mutate(ContentMutation::InsertWord(clash)))
            .await
            .is_err());

        assert_eq!(store.generation_logs().len(), 1);
        assert_eq!(store.counts().unwrap().words, 1);
    }

    #[tokio::test]
    async fn claim_is_oldest_first_and_bounded() {
        let store = InMemoryStore::new();
        let base = test_now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let job = Job::new(
                JobType::WordProcessing,
                serde_json::json!({ "i": i }),
                base + chrono::Duration::seconds(i),
            );
            ids.push(store.enqueue(job).await.unwrap());
        }

        let mut request = claim_all(base + chrono::Duration::minutes(1));
        request.limit = 3;
        let batch = store.claim_batch(&request).await.unwrap();

        let claimed: Vec<JobId> = batch.claimed.iter().map(|j| j.id).collect();
        assert_eq!(claimed, ids[..3].to_vec());
        assert!(batch.claimed.iter().all(|j| j.status == JobStatus::Processing));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.processing, 3);
    }

    #[tokio::test]
    async fn unknown_types_are_rejected_at_claim_time() {
        let store = InMemoryStore::new();
        let now = test_now();
        let stray = Job::new(JobType::Other("send_newsletter".into()), serde_json::json!({}), now);
        let stray_id = store.enqueue(stray).await.unwrap();

        let batch = store.claim_batch(&claim_all(now)).await.unwrap();
        assert!(batch.claimed.is_empty());
        assert_eq!(batch.rejected.len(), 1);

        let job = store.get(stray_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.retry_count, 3);
        assert_eq!(job.error_message.as_deref(), Some("unknown job type: send_newsletter"));

        let again = store.claim_batch(&claim_all(now)).await.unwrap();
        assert!(again.rejected.is_empty());
    }

    #[tokio::test]
    async fn claimed_jobs_are_not_claimed_twice() {
        let store = InMemoryStore::new();
        let now = test_now();
        store
            .enqueue(Job::new(JobType::SentenceAnalysis, serde_json::json!({}), now))
            .await
            .unwrap();

        assert_eq!(store.claim_batch(&claim_all(now)).await.unwrap().claimed.len(), 1);
        assert!(store.claim_batch(&claim_all(now)).await.unwrap().claimed.is_empty());

        let mut with_lease = claim_all(now + chrono::Duration::minutes(30));
        with_lease.lease = Some(std::time::Duration::from_secs(600));
        assert_eq!(store.claim_batch(&with_lease).await.unwrap().claimed.len(), 1);
    }
}
