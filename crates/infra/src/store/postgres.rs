//! Postgres-backed store.
//!
//! One [`PostgresStore`] holds the content graph, the job queue and the
//! generation log, so a unit of work commits in a single transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key / check violation) | `23503` / `23514` | `Invalid` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed, Io, Other | N/A | `Storage` |
//!
//! ## Claiming
//!
//! Claims select candidates with `FOR UPDATE SKIP LOCKED`, so concurrent
//! dispatchers over the same database never claim the same job twice.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use kotoba_ai::{GenerationLog, GenerationLogSink, LogSinkError};
use kotoba_content::{
    content_key, Conversation, ConversationLine, ExampleDraft, GrammarDraft, GrammarPoint, Idiom,
    IdiomDraft, LearningStatus, Sentence, Speaker, UserConversation, Word, WordStatus,
};
use kotoba_core::{ConversationId, IdiomId, RelationId, SentenceId, UserId, WordId};

use crate::jobs::{ClaimBatch, ClaimRequest, Job, JobId, JobStats, JobStatus, JobStore, JobType};

use super::{ContentMutation, ContentStore, StoreError, UnitOfWork};

const WORD_COLUMNS: &str =
    "id, text, meaning, part_of_speech, status, created_by, created_at, updated_at";
const SENTENCE_COLUMNS: &str =
    "id, text, translation, source, difficulty, is_analyzed, created_at, updated_at";
const IDIOM_COLUMNS: &str = "id, phrase, meaning, example, created_at";
const GRAMMAR_COLUMNS: &str = "id, pattern, explanation, level, created_at";
const JOB_COLUMNS: &str = "id, job_type, payload, status, error_message, retry_count, \
     next_retry_at, processing_started_at, created_at, updated_at";

/// Eligibility predicate shared by both claim statements.
///
/// `$1` = now, `$3` = max retries, `$4` = lease cutoff (NULL disables reclaim).
const ELIGIBLE: &str = "((status = 'pending' AND retry_count < $3 \
       AND (next_retry_at IS NULL OR next_retry_at <= $1)) \
     OR (status = 'processing' AND $4::timestamptz IS NOT NULL \
       AND processing_started_at <= $4::timestamptz))";

/// Postgres-backed content store, job store and generation log.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool, which is `Send + Sync`; the store can be
/// shared behind an `Arc` by the dispatcher and the ops router.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("schema.sql"))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn fetch_words(&self, sql: &str, binds: WordQuery<'_>) -> Result<Vec<Word>, StoreError> {
        let query = sqlx::query(sql);
        let query = match binds {
            WordQuery::Id(id) => query.bind(*id.as_uuid()),
            WordQuery::Text(text) => query.bind(text),
            WordQuery::Learning(user_id, limit) => query.bind(*user_id.as_uuid()).bind(limit),
        };
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_words", e))?;
        rows.iter().map(decode_word).collect()
    }

    async fn fetch_sentences(
        &self,
        sql: &str,
        binds: SentenceQuery<'_>,
    ) -> Result<Vec<Sentence>, StoreError> {
        let query = sqlx::query(sql);
        let query = match binds {
            SentenceQuery::Id(id) => query.bind(*id.as_uuid()),
            SentenceQuery::Word(id) => query.bind(*id.as_uuid()),
            SentenceQuery::Text(text) => query.bind(text),
            SentenceQuery::Learning(user_id, limit) => query.bind(*user_id.as_uuid()).bind(limit),
        };
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_sentences", e))?;
        rows.iter().map(decode_sentence).collect()
    }

    async fn fetch_idioms(&self, sql: &str, bind: Uuid) -> Result<Vec<Idiom>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(bind)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_idioms", e))?;
        rows.iter().map(decode_idiom).collect()
    }

    async fn fetch_grammars(&self, sql: &str, bind: Uuid) -> Result<Vec<GrammarPoint>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(bind)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_grammars", e))?;
        rows.iter().map(decode_grammar).collect()
    }
}

enum WordQuery<'a> {
    Id(WordId),
    Text(&'a str),
    Learning(UserId, i64),
}

enum SentenceQuery<'a> {
    Id(SentenceId),
    Word(WordId),
    Text(&'a str),
    Learning(UserId, i64),
}

fn limit_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl ContentStore for PostgresStore {
    async fn word(&self, id: WordId) -> Result<Option<Word>, StoreError> {
        let sql = format!("SELECT {WORD_COLUMNS} FROM words WHERE id = $1");
        Ok(self.fetch_words(&sql, WordQuery::Id(id)).await?.pop())
    }

    async fn word_by_text(&self, text: &str) -> Result<Option<Word>, StoreError> {
        let sql = format!("SELECT {WORD_COLUMNS} FROM words WHERE text = $1");
        Ok(self.fetch_words(&sql, WordQuery::Text(text)).await?.pop())
    }

    async fn sentence(&self, id: SentenceId) -> Result<Option<Sentence>, StoreError> {
        let sql = format!("SELECT {SENTENCE_COLUMNS} FROM sentences WHERE id = $1");
        Ok(self.fetch_sentences(&sql, SentenceQuery::Id(id)).await?.pop())
    }

    async fn sentence_by_text(&self, text: &str) -> Result<Option<Sentence>, StoreError> {
        let sql = format!("SELECT {SENTENCE_COLUMNS} FROM sentences WHERE text = $1");
        Ok(self.fetch_sentences(&sql, SentenceQuery::Text(text)).await?.pop())
    }

    async fn idiom_by_phrase(&self, phrase: &str) -> Result<Option<Idiom>, StoreError> {
        let sql = format!("SELECT {IDIOM_COLUMNS} FROM idioms WHERE phrase = $1");
        let row = sqlx::query(&sql)
            .bind(phrase)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("idiom_by_phrase", e))?;
        row.as_ref().map(decode_idiom).transpose()
    }

    async fn grammar_by_pattern(&self, pattern: &str) -> Result<Option<GrammarPoint>, StoreError> {
        let sql = format!("SELECT {GRAMMAR_COLUMNS} FROM grammar_points WHERE pattern = $1");
        let row = sqlx::query(&sql)
            .bind(pattern)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("grammar_by_pattern", e))?;
        row.as_ref().map(decode_grammar).transpose()
    }

    async fn idioms_by_ids(&self, ids: &[IdiomId]) -> Result<Vec<Idiom>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let sql = format!("SELECT {IDIOM_COLUMNS} FROM idioms WHERE id = ANY($1)");
        let rows = sqlx::query(&sql)
            .bind(&uuids)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("idioms_by_ids", e))?;
        let mut found: HashMap<IdiomId, Idiom> = rows
            .iter()
            .map(decode_idiom)
            .map(|r| r.map(|idiom| (idiom.id, idiom)))
            .collect::<Result<_, _>>()?;
        // Keep the caller's order.
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn idioms_for_sentence(&self, id: SentenceId) -> Result<Vec<Idiom>, StoreError> {
        let sql = "SELECT i.id, i.phrase, i.meaning, i.example, i.created_at \
             FROM sentence_idioms si JOIN idioms i ON i.id = si.idiom_id \
             WHERE si.sentence_id = $1 ORDER BY si.created_at, si.id";
        self.fetch_idioms(sql, *id.as_uuid()).await
    }

    async fn grammars_for_sentence(&self, id: SentenceId) -> Result<Vec<GrammarPoint>, StoreError> {
        let sql = "SELECT g.id, g.pattern, g.explanation, g.level, g.created_at \
             FROM sentence_grammars sg JOIN grammar_points g ON g.id = sg.grammar_id \
             WHERE sg.sentence_id = $1 ORDER BY sg.created_at, sg.id";
        self.fetch_grammars(sql, *id.as_uuid()).await
    }

    async fn sentences_for_word(&self, id: WordId) -> Result<Vec<Sentence>, StoreError> {
        let sql = "SELECT s.id, s.text, s.translation, s.source, s.difficulty, s.is_analyzed, \
                    s.created_at, s.updated_at \
             FROM word_sentences ws JOIN sentences s ON s.id = ws.sentence_id \
             WHERE ws.word_id = $1 ORDER BY ws.created_at, ws.id";
        self.fetch_sentences(sql, SentenceQuery::Word(id)).await
    }

    #[instrument(skip(self), fields(conversation_id = %id), err)]
    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, description, situation, level, created_by, created_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_conversation", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let head = ConversationRow::from_row(&row).map_err(decode_error("conversation"))?;

        let speakers = sqlx::query(
            r#"
            SELECT id, name, age, gender, nationality, setting, personality, image
            FROM conversation_speakers
            WHERE conversation_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_speakers", e))?
        .iter()
        .map(|r| SpeakerRow::from_row(r).map(Speaker::from))
        .collect::<Result<Vec<_>, _>>()
        .map_err(decode_error("speaker"))?;

        let lines = sqlx::query(
            r#"
            SELECT id, line_order, speaker_id, english, japanese
            FROM conversation_lines
            WHERE conversation_id = $1
            ORDER BY line_order ASC
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_lines", e))?
        .iter()
        .map(|r| LineRow::from_row(r).map(ConversationLine::from))
        .collect::<Result<Vec<_>, _>>()
        .map_err(decode_error("line"))?;

        let word_refs = self
            .conversation_refs("SELECT word_id FROM conversation_words WHERE conversation_id = $1", id)
            .await?;
        let sentence_refs = self
            .conversation_refs(
                "SELECT sentence_id FROM conversation_sentences WHERE conversation_id = $1",
                id,
            )
            .await?;
        let idiom_refs = self
            .conversation_refs("SELECT idiom_id FROM conversation_idioms WHERE conversation_id = $1", id)
            .await?;

        Ok(Some(Conversation {
            id: ConversationId::from_uuid(head.id),
            title: head.title,
            description: head.description,
            situation: head.situation,
            level: head.level,
            speakers,
            lines,
            word_refs: word_refs.into_iter().map(WordId::from_uuid).collect(),
            sentence_refs: sentence_refs.into_iter().map(SentenceId::from_uuid).collect(),
            idiom_refs: idiom_refs.into_iter().map(IdiomId::from_uuid).collect(),
            created_by: head.created_by.map(UserId::from_uuid),
            created_at: head.created_at,
        }))
    }

    async fn learning_words(&self, user_id: UserId, limit: usize) -> Result<Vec<Word>, StoreError> {
        let sql = "SELECT w.id, w.text, w.meaning, w.part_of_speech, w.status, w.created_by, \
                    w.created_at, w.updated_at \
             FROM user_words uw JOIN words w ON w.id = uw.word_id \
             WHERE uw.user_id = $1 AND uw.learning_status <> 'mastered' \
             ORDER BY uw.created_at DESC LIMIT $2";
        self.fetch_words(sql, WordQuery::Learning(user_id, limit_i64(limit)))
            .await
    }

    async fn learning_sentences(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Sentence>, StoreError> {
        let sql = "SELECT s.id, s.text, s.translation, s.source, s.difficulty, s.is_analyzed, \
                    s.created_at, s.updated_at \
             FROM user_sentences us JOIN sentences s ON s.id = us.sentence_id \
             WHERE us.user_id = $1 AND us.learning_status <> 'mastered' \
             ORDER BY us.created_at DESC LIMIT $2";
        self.fetch_sentences(sql, SentenceQuery::Learning(user_id, limit_i64(limit)))
            .await
    }

    #[instrument(
        skip(self, work),
        fields(
            mutations = work.mutations.len(),
            enqueued = work.enqueue.len(),
            updated = work.update.len()
        ),
        err
    )]
    async fn commit(&self, work: UnitOfWork) -> Result<(), StoreError> {
        if work.is_empty() {
            return Ok(());
        }
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for mutation in work.mutations {
            apply_mutation(&mut tx, mutation, now).await?;
        }
        for job in &work.enqueue {
            insert_job(&mut tx, job).await?;
        }
        for job in &work.update {
            update_job(&mut tx, job).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

impl PostgresStore {
    async fn conversation_refs(&self, sql: &str, id: ConversationId) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(*id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_conversation_refs", e))?;
        rows.iter()
            .map(|r| r.try_get::<Uuid, _>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error("conversation reference"))
    }
}

async fn apply_mutation(
    conn: &mut PgConnection,
    mutation: ContentMutation,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    match mutation {
        ContentMutation::InsertWord(word) => {
            sqlx::query(
                r#"
                INSERT INTO words (id, text, meaning, part_of_speech, status, created_by, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(*word.id.as_uuid())
            .bind(&word.text)
            .bind(&word.meaning)
            .bind(&word.part_of_speech)
            .bind(word.status.as_str())
            .bind(word.created_by.map(Uuid::from))
            .bind(word.created_at)
            .bind(word.updated_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_word", e))?;
        }
        ContentMutation::InsertSentence(sentence) => {
            insert_sentence(conn, &sentence, false).await?;
        }
        ContentMutation::SetWordStatus { word_id, status } => {
            sqlx::query("UPDATE words SET status = $2, updated_at = $3 WHERE id = $1")
                .bind(*word_id.as_uuid())
                .bind(status.as_str())
                .bind(now)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("set_word_status", e))?;
        }
        ContentMutation::ApplyWordEnrichment {
            word_id,
            meaning,
            part_of_speech,
        } => {
            sqlx::query(
                r#"
                UPDATE words
                SET meaning = $2, part_of_speech = $3, status = $4, updated_at = $5
                WHERE id = $1
                "#,
            )
            .bind(*word_id.as_uuid())
            .bind(&meaning)
            .bind(&part_of_speech)
            .bind(WordStatus::Completed.as_str())
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("apply_word_enrichment", e))?;
        }
        ContentMutation::AttachExample { word_id, example } => {
            attach_example(conn, word_id, &example, now).await?;
        }
        ContentMutation::AttachIdiom { sentence_id, idiom } => {
            attach_idiom(conn, sentence_id, &idiom, now).await?;
        }
        ContentMutation::AttachGrammar {
            sentence_id,
            grammar,
        } => {
            attach_grammar(conn, sentence_id, &grammar, now).await?;
        }
        ContentMutation::MarkSentenceAnalyzed {
            sentence_id,
            translation,
        } => {
            let translation = translation
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty());
            sqlx::query(
                r#"
                UPDATE sentences
                SET is_analyzed = TRUE,
                    translation = COALESCE($2, translation),
                    updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(*sentence_id.as_uuid())
            .bind(translation)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("mark_sentence_analyzed", e))?;
        }
        ContentMutation::LinkUserWord { user_id, word_id } => {
            sqlx::query(
                r#"
                INSERT INTO user_words (id, user_id, word_id, learning_status, created_at)
                SELECT $1, $2, id, $4, $5 FROM words WHERE id = $3
                ON CONFLICT (user_id, word_id) DO NOTHING
                "#,
            )
            .bind(*RelationId::new().as_uuid())
            .bind(*user_id.as_uuid())
            .bind(*word_id.as_uuid())
            .bind(LearningStatus::New.as_str())
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("link_user_word", e))?;
        }
        ContentMutation::LinkUserSentence {
            user_id,
            sentence_id,
        } => {
            sqlx::query(
                r#"
                INSERT INTO user_sentences (id, user_id, sentence_id, learning_status, created_at)
                SELECT $1, $2, id, $4, $5 FROM sentences WHERE id = $3
                ON CONFLICT (user_id, sentence_id) DO NOTHING
                "#,
            )
            .bind(*RelationId::new().as_uuid())
            .bind(*user_id.as_uuid())
            .bind(*sentence_id.as_uuid())
            .bind(LearningStatus::New.as_str())
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("link_user_sentence", e))?;
        }
        ContentMutation::InsertConversation {
            conversation,
            progress,
        } => {
            insert_conversation(conn, &conversation).await?;
            if let Some(progress) = progress {
                insert_progress(conn, &progress).await?;
            }
        }
    }
    Ok(())
}

/// Insert a sentence. With `if_absent`, an existing text is left untouched.
async fn insert_sentence(
    conn: &mut PgConnection,
    sentence: &Sentence,
    if_absent: bool,
) -> Result<(), StoreError> {
    let sql = if if_absent {
        "INSERT INTO sentences (id, text, translation, source, difficulty, is_analyzed, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (text) DO NOTHING"
    } else {
        "INSERT INTO sentences (id, text, translation, source, difficulty, is_analyzed, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
    };
    sqlx::query(sql)
        .bind(*sentence.id.as_uuid())
        .bind(&sentence.text)
        .bind(&sentence.translation)
        .bind(&sentence.source)
        .bind(sentence.difficulty.as_str())
        .bind(sentence.is_analyzed)
        .bind(sentence.created_at)
        .bind(sentence.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_sentence", e))?;
    Ok(())
}

async fn exists(conn: &mut PgConnection, sql: &str, id: Uuid) -> Result<bool, StoreError> {
    let row = sqlx::query(sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("exists", e))?;
    Ok(row.is_some())
}

async fn lookup_id(conn: &mut PgConnection, sql: &str, key: &str) -> Result<Uuid, StoreError> {
    let row = sqlx::query(sql)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lookup_id", e))?;
    row.try_get::<Uuid, _>("id").map_err(decode_error("id"))
}

async fn link(
    conn: &mut PgConnection,
    sql: &str,
    source: Uuid,
    target: Uuid,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(sql)
        .bind(*RelationId::new().as_uuid())
        .bind(source)
        .bind(target)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("link", e))?;
    Ok(())
}

async fn attach_example(
    conn: &mut PgConnection,
    word_id: WordId,
    example: &ExampleDraft,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if !exists(conn, "SELECT 1 FROM words WHERE id = $1", *word_id.as_uuid()).await? {
        return Ok(());
    }
    let sentence = Sentence::new(&example.english, example.japanese.clone(), now)
        .map_err(|e| StoreError::Invalid(e.to_string()))?;
    insert_sentence(conn, &sentence, true).await?;
    let sentence_id = lookup_id(conn, "SELECT id FROM sentences WHERE text = $1", &sentence.text).await?;
    link(
        conn,
        "INSERT INTO word_sentences (id, word_id, sentence_id, created_at) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (word_id, sentence_id) DO NOTHING",
        *word_id.as_uuid(),
        sentence_id,
        now,
    )
    .await
}

async fn attach_idiom(
    conn: &mut PgConnection,
    sentence_id: SentenceId,
    draft: &IdiomDraft,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if !exists(conn, "SELECT 1 FROM sentences WHERE id = $1", *sentence_id.as_uuid()).await? {
        return Ok(());
    }
    let idiom = Idiom::from_draft(draft, now).map_err(|e| StoreError::Invalid(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO idioms (id, phrase, meaning, example, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (phrase) DO NOTHING
        "#,
    )
    .bind(*idiom.id.as_uuid())
    .bind(&idiom.phrase)
    .bind(&idiom.meaning)
    .bind(&idiom.example)
    .bind(idiom.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_idiom", e))?;

    let idiom_id = lookup_id(conn, "SELECT id FROM idioms WHERE phrase = $1", &idiom.phrase).await?;
    link(
        conn,
        "INSERT INTO sentence_idioms (id, sentence_id, idiom_id, created_at) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (sentence_id, idiom_id) DO NOTHING",
        *sentence_id.as_uuid(),
        idiom_id,
        now,
    )
    .await
}

async fn attach_grammar(
    conn: &mut PgConnection,
    sentence_id: SentenceId,
    draft: &GrammarDraft,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if !exists(conn, "SELECT 1 FROM sentences WHERE id = $1", *sentence_id.as_uuid()).await? {
        return Ok(());
    }
    let pattern = content_key(&draft.pattern).map_err(|e| StoreError::Invalid(e.to_string()))?;
    let grammar = GrammarPoint::from_draft(draft, now).map_err(|e| StoreError::Invalid(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO grammar_points (id, pattern, explanation, level, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (pattern) DO NOTHING
        "#,
    )
    .bind(*grammar.id.as_uuid())
    .bind(&pattern)
    .bind(&grammar.explanation)
    .bind(grammar.level.as_str())
    .bind(grammar.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_grammar", e))?;

    let grammar_id = lookup_id(conn, "SELECT id FROM grammar_points WHERE pattern = $1", &pattern).await?;
    link(
        conn,
        "INSERT INTO sentence_grammars (id, sentence_id, grammar_id, created_at) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (sentence_id, grammar_id) DO NOTHING",
        *sentence_id.as_uuid(),
        grammar_id,
        now,
    )
    .await
}

async fn insert_conversation(
    conn: &mut PgConnection,
    conversation: &Conversation,
) -> Result<(), StoreError> {
    let id = *conversation.id.as_uuid();
    sqlx::query(
        r#"
        INSERT INTO conversations (id, title, description, situation, level, created_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(&conversation.title)
    .bind(&conversation.description)
    .bind(&conversation.situation)
    .bind(conversation.level)
    .bind(conversation.created_by.map(Uuid::from))
    .bind(conversation.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_conversation", e))?;

    for (position, speaker) in conversation.speakers.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO conversation_speakers
                (id, conversation_id, position, name, age, gender, nationality, setting, personality, image)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*speaker.id.as_uuid())
        .bind(id)
        .bind(i32::try_from(position).unwrap_or(i32::MAX))
        .bind(&speaker.name)
        .bind(speaker.age)
        .bind(&speaker.gender)
        .bind(&speaker.nationality)
        .bind(&speaker.setting)
        .bind(&speaker.personality)
        .bind(&speaker.image)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_speaker", e))?;
    }

    for line in &conversation.lines {
        sqlx::query(
            r#"
            INSERT INTO conversation_lines (id, conversation_id, line_order, speaker_id, english, japanese)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*line.id.as_uuid())
        .bind(id)
        .bind(i32::try_from(line.order).unwrap_or(i32::MAX))
        .bind(line.speaker_id.map(Uuid::from))
        .bind(&line.english)
        .bind(&line.japanese)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_line", e))?;
    }

    // References to rows that no longer exist are dropped.
    let refs: [(&str, Vec<Uuid>); 3] = [
        (
            "INSERT INTO conversation_words (conversation_id, word_id) \
             SELECT $1, id FROM words WHERE id = $2 ON CONFLICT DO NOTHING",
            conversation.word_refs.iter().map(|r| *r.as_uuid()).collect(),
        ),
        (
            "INSERT INTO conversation_sentences (conversation_id, sentence_id) \
             SELECT $1, id FROM sentences WHERE id = $2 ON CONFLICT DO NOTHING",
            conversation.sentence_refs.iter().map(|r| *r.as_uuid()).collect(),
        ),
        (
            "INSERT INTO conversation_idioms (conversation_id, idiom_id) \
             SELECT $1, id FROM idioms WHERE id = $2 ON CONFLICT DO NOTHING",
            conversation.idiom_refs.iter().map(|r| *r.as_uuid()).collect(),
        ),
    ];
    for (sql, targets) in refs {
        for target in targets {
            sqlx::query(sql)
                .bind(id)
                .bind(target)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("insert_conversation_ref", e))?;
        }
    }
    Ok(())
}

async fn insert_progress(
    conn: &mut PgConnection,
    progress: &UserConversation,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO user_conversations (id, user_id, conversation_id, status, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, conversation_id) DO NOTHING
        "#,
    )
    .bind(*progress.id.as_uuid())
    .bind(*progress.user_id.as_uuid())
    .bind(*progress.conversation_id.as_uuid())
    .bind(progress.status.as_str())
    .bind(progress.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_user_conversation", e))?;
    Ok(())
}

fn retry_count_i32(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

async fn insert_job(conn: &mut PgConnection, job: &Job) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO processing_jobs (
            id, job_type, payload, status, error_message, retry_count,
            next_retry_at, processing_started_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(*job.id.as_uuid())
    .bind(job.job_type.as_str())
    .bind(&job.payload)
    .bind(job.status.as_str())
    .bind(&job.error_message)
    .bind(retry_count_i32(job.retry_count))
    .bind(job.next_retry_at)
    .bind(job.processing_started_at)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_job", e))?;
    Ok(())
}

async fn update_job(conn: &mut PgConnection, job: &Job) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE processing_jobs
        SET status = $2,
            error_message = $3,
            retry_count = $4,
            next_retry_at = $5,
            processing_started_at = $6,
            updated_at = $7
        WHERE id = $1
        "#,
    )
    .bind(*job.id.as_uuid())
    .bind(job.status.as_str())
    .bind(&job.error_message)
    .bind(retry_count_i32(job.retry_count))
    .bind(job.next_retry_at)
    .bind(job.processing_started_at)
    .bind(job.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_job", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("job {}", job.id)));
    }
    Ok(())
}

#[async_trait::async_trait]
impl JobStore for PostgresStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type), err)]
    async fn enqueue(&self, job: Job) -> Result<JobId, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_job(&mut conn, &job).await?;
        Ok(job.id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM processing_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;
        row.as_ref().map(decode_job).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status), err)]
    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        update_job(&mut conn, job).await
    }

    #[instrument(
        skip(self, request),
        fields(
            limit = request.limit,
            claimed = tracing::field::Empty,
            rejected = tracing::field::Empty
        ),
        err
    )]
    async fn claim_batch(&self, request: &ClaimRequest) -> Result<ClaimBatch, StoreError> {
        let span = Span::current();
        let accepted: Vec<String> = request.accepted.iter().map(|t| t.as_str().to_string()).collect();
        let lease_cutoff = request
            .lease
            .and_then(|lease| chrono::Duration::from_std(lease).ok())
            .and_then(|lease| request.now.checked_sub_signed(lease));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let reject_sql = format!(
            "UPDATE processing_jobs \
             SET status = 'error', \
                 error_message = 'unknown job type: ' || job_type, \
                 retry_count = GREATEST(retry_count, $3), \
                 next_retry_at = NULL, \
                 updated_at = $1 \
             WHERE id IN ( \
                 SELECT id FROM processing_jobs \
                 WHERE {ELIGIBLE} AND NOT (job_type = ANY($2)) \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        );
        let rejected_rows = sqlx::query(&reject_sql)
            .bind(request.now)
            .bind(&accepted)
            .bind(retry_count_i32(request.max_retries))
            .bind(lease_cutoff)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("reject_unknown_jobs", e))?;

        let claim_sql = format!(
            "UPDATE processing_jobs \
             SET status = 'processing', \
                 processing_started_at = $1, \
                 next_retry_at = NULL, \
                 updated_at = $1 \
             WHERE id IN ( \
                 SELECT id FROM processing_jobs \
                 WHERE {ELIGIBLE} AND job_type = ANY($2) \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT $5 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        );
        let claimed_rows = sqlx::query(&claim_sql)
            .bind(request.now)
            .bind(&accepted)
            .bind(retry_count_i32(request.max_retries))
            .bind(lease_cutoff)
            .bind(limit_i64(request.limit))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim_jobs", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let rejected = rejected_rows.iter().map(decode_job).collect::<Result<Vec<_>, _>>()?;
        let mut claimed = claimed_rows.iter().map(decode_job).collect::<Result<Vec<_>, _>>()?;
        // RETURNING does not preserve the subquery order.
        claimed.sort_by_key(|j| (j.created_at, j.id));

        span.record("claimed", claimed.len());
        span.record("rejected", rejected.len());
        Ok(ClaimBatch { claimed, rejected })
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn claim_job(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            "UPDATE processing_jobs \
             SET status = 'processing', processing_started_at = $2, next_retry_at = NULL, updated_at = $2 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(*job_id.as_uuid())
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_job", e))?;
        row.as_ref().map(decode_job).transpose()
    }

    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit_i64(limit))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_jobs", e))?;
        rows.iter().map(decode_job).collect()
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM processing_jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("job_stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(decode_error("status"))?;
            let n: i64 = row.try_get("n").map_err(decode_error("count"))?;
            let n = usize::try_from(n).unwrap_or(0);
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => stats.pending += n,
                Ok(JobStatus::Processing) => stats.processing += n,
                Ok(JobStatus::Completed) => stats.completed += n,
                Ok(JobStatus::Error) => stats.error += n,
                Err(e) => return Err(StoreError::Invalid(e)),
            }
        }
        Ok(stats)
    }
}

#[async_trait::async_trait]
impl GenerationLogSink for PostgresStore {
    async fn record(&self, log: GenerationLog) -> Result<(), LogSinkError> {
        sqlx::query(
            r#"
            INSERT INTO generation_logs (id, prompt, response, approx_tokens, latency_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*log.id.as_uuid())
        .bind(&log.prompt)
        .bind(&log.response)
        .bind(log.approx_tokens.map(|t| i32::try_from(t).unwrap_or(i32::MAX)))
        .bind(i64::try_from(log.latency_ms).unwrap_or(i64::MAX))
        .bind(log.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| LogSinkError(map_sqlx_error("record_generation_log", e).to_string()))?;
        Ok(())
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") | Some("23514") => StoreError::Invalid(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        other => StoreError::Storage(format!("{} failed: {}", operation, other)),
    }
}

fn decode_error(what: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| StoreError::Invalid(format!("failed to decode {what} row: {e}"))
}

// SQLx row types

struct WordRow {
    id: Uuid,
    text: String,
    meaning: String,
    part_of_speech: String,
    status: String,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for WordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(WordRow {
            id: row.try_get("id")?,
            text: row.try_get("text")?,
            meaning: row.try_get("meaning")?,
            part_of_speech: row.try_get("part_of_speech")?,
            status: row.try_get("status")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn decode_word(row: &PgRow) -> Result<Word, StoreError> {
    let r = WordRow::from_row(row).map_err(decode_error("word"))?;
    Ok(Word {
        id: WordId::from_uuid(r.id),
        text: r.text,
        meaning: r.meaning,
        part_of_speech: r.part_of_speech,
        status: r.status.parse().map_err(|e: kotoba_core::DomainError| StoreError::Invalid(e.to_string()))?,
        created_by: r.created_by.map(UserId::from_uuid),
        created_at: r.created_at,
        updated_at: r.updated_at,
    })
}

struct SentenceRow {
    id: Uuid,
    text: String,
    translation: String,
    source: Option<String>,
    difficulty: String,
    is_analyzed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for SentenceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SentenceRow {
            id: row.try_get("id")?,
            text: row.try_get("text")?,
            translation: row.try_get("translation")?,
            source: row.try_get("source")?,
            difficulty: row.try_get("difficulty")?,
            is_analyzed: row.try_get("is_analyzed")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn decode_sentence(row: &PgRow) -> Result<Sentence, StoreError> {
    let r = SentenceRow::from_row(row).map_err(decode_error("sentence"))?;
    Ok(Sentence {
        id: SentenceId::from_uuid(r.id),
        text: r.text,
        translation: r.translation,
        source: r.source,
        difficulty: r.difficulty.parse().unwrap_or_default(),
        is_analyzed: r.is_analyzed,
        created_at: r.created_at,
        updated_at: r.updated_at,
    })
}

fn decode_idiom(row: &PgRow) -> Result<Idiom, StoreError> {
    let decode = || -> Result<Idiom, sqlx::Error> {
        Ok(Idiom {
            id: IdiomId::from_uuid(row.try_get("id")?),
            phrase: row.try_get("phrase")?,
            meaning: row.try_get("meaning")?,
            example: row.try_get("example")?,
            created_at: row.try_get("created_at")?,
        })
    };
    decode().map_err(decode_error("idiom"))
}

fn decode_grammar(row: &PgRow) -> Result<GrammarPoint, StoreError> {
    let decode = || -> Result<GrammarPoint, sqlx::Error> {
        let level: String = row.try_get("level")?;
        Ok(GrammarPoint {
            id: kotoba_core::GrammarId::from_uuid(row.try_get("id")?),
            pattern: row.try_get("pattern")?,
            explanation: row.try_get("explanation")?,
            level: level.parse().unwrap_or_default(),
            created_at: row.try_get("created_at")?,
        })
    };
    decode().map_err(decode_error("grammar"))
}

struct ConversationRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    situation: Option<String>,
    level: i32,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ConversationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ConversationRow {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            situation: row.try_get("situation")?,
            level: row.try_get("level")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

struct SpeakerRow(Speaker);

impl<'r> FromRow<'r, PgRow> for SpeakerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;
        Ok(SpeakerRow(Speaker {
            id: id.into(),
            name: row.try_get("name")?,
            age: row.try_get("age")?,
            gender: row.try_get("gender")?,
            nationality: row.try_get("nationality")?,
            setting: row.try_get("setting")?,
            personality: row.try_get("personality")?,
            image: row.try_get("image")?,
        }))
    }
}

impl From<SpeakerRow> for Speaker {
    fn from(row: SpeakerRow) -> Self {
        row.0
    }
}

struct LineRow(ConversationLine);

impl<'r> FromRow<'r, PgRow> for LineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;
        let order: i32 = row.try_get("line_order")?;
        let speaker_id: Option<Uuid> = row.try_get("speaker_id")?;
        Ok(LineRow(ConversationLine {
            id: id.into(),
            order: u32::try_from(order).unwrap_or(0),
            speaker_id: speaker_id.map(Into::into),
            english: row.try_get("english")?,
            japanese: row.try_get("japanese")?,
        }))
    }
}

impl From<LineRow> for ConversationLine {
    fn from(row: LineRow) -> Self {
        row.0
    }
}

struct JobRow {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    status: String,
    error_message: Option<String>,
    retry_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
    processing_started_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            job_type: row.try_get("job_type")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            error_message: row.try_get("error_message")?,
            retry_count: row.try_get("retry_count")?,
            next_retry_at: row.try_get("next_retry_at")?,
            processing_started_at: row.try_get("processing_started_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn decode_job(row: &PgRow) -> Result<Job, StoreError> {
    let r = JobRow::from_row(row).map_err(decode_error("job"))?;
    Ok(Job {
        id: JobId::from_uuid(r.id),
        job_type: JobType::parse(&r.job_type),
        payload: r.payload,
        status: r.status.parse().map_err(StoreError::Invalid)?,
        error_message: r.error_message,
        retry_count: u32::try_from(r.retry_count).unwrap_or(0),
        next_retry_at: r.next_retry_at,
        processing_started_at: r.processing_started_at,
        created_at: r.created_at,
        updated_at: r.updated_at,
    })
}
