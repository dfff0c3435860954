use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Instant;

use crate::errors::DataAccessError;
use crate::log_db_operation;
use crate::models::*;

type DbResult<T> = Result<T, DataAccessError>;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

const QUESTION_COLUMNS: &str = "q.id, q.topic, q.question_type, q.question, q.answer, q.options, q.created_at";

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DataAccessError::Decode(format!("bad timestamp '{}': {}", raw, e)))
}

fn row_to_question(row: &SqliteRow) -> DbResult<Question> {
    let kind: String = row.try_get("question_type")?;
    let options = row
        .try_get::<Option<String>, _>("options")?
        .map(|raw| serde_json::from_str::<Vec<String>>(&raw))
        .transpose()
        .map_err(|e| DataAccessError::Decode(format!("bad options column: {}", e)))?;

    Ok(Question {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        kind: kind.parse().map_err(DataAccessError::Decode)?,
        question: row.try_get("question")?,
        answer: row.try_get("answer")?,
        options,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn row_to_attempt_record(row: &SqliteRow) -> DbResult<AttemptRecord> {
    let attempt = Attempt {
        id: row.try_get("attempt_id")?,
        username: row.try_get("username")?,
        question_id: row.try_get("question_id")?,
        is_correct: row.try_get("is_correct")?,
        user_answer: row.try_get("user_answer")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("attempt_created_at")?)?,
    };
    Ok(AttemptRecord {
        attempt,
        question: row_to_question(row)?,
    })
}

impl Database {
    pub async fn new(database_url: &str) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database sees its own empty database
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> DbResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                question_type TEXT NOT NULL CHECK (question_type IN ('flashcard', 'quiz', 'essay')),
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                options TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_questions_topic ON questions(topic);")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_progress (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                question_id INTEGER NOT NULL,
                is_correct INTEGER NOT NULL,
                user_answer TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY (question_id) REFERENCES questions(id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_progress_username ON user_progress(username);")
            .execute(&self.pool)
            .await?;

        log_db_operation!(info, "migrate", "schema ready");
        Ok(())
    }

    // Question operations

    /// Insert a batch of questions atomically: either all rows land or none do
    pub async fn insert_questions(&self, questions: &[NewQuestion]) -> DbResult<Vec<Question>> {
        let started = Instant::now();
        let created_at = Utc::now().trunc_subsecs(6);
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(questions.len());

        for new_question in questions {
            let options_json = new_question
                .options
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| DataAccessError::Decode(e.to_string()))?;

            let result = sqlx::query(
                r#"
                INSERT INTO questions (topic, question_type, question, answer, options, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&new_question.topic)
            .bind(new_question.kind.as_str())
            .bind(&new_question.question)
            .bind(&new_question.answer)
            .bind(&options_json)
            .bind(timestamp(created_at))
            .execute(&mut *tx)
            .await?;

            saved.push(Question {
                id: result.last_insert_rowid(),
                topic: new_question.topic.clone(),
                kind: new_question.kind,
                question: new_question.question.clone(),
                answer: new_question.answer.clone(),
                options: new_question.options.clone(),
                created_at,
            });
        }

        tx.commit().await?;
        log_db_operation!(
            debug,
            "insert_questions",
            count = saved.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(saved)
    }

    pub async fn get_question(&self, id: i64) -> DbResult<Option<Question>> {
        let started = Instant::now();
        let row = sqlx::query(&format!("SELECT {} FROM questions q WHERE q.id = ?1", QUESTION_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        log_db_operation!(
            debug,
            "get_question",
            question_id = id,
            duration_ms = started.elapsed().as_millis() as u64
        );
        row.as_ref().map(row_to_question).transpose()
    }

    /// Questions in creation order, optionally narrowed to a topic and/or type
    pub async fn list_questions(&self, topic: Option<&str>, kind: Option<QuestionType>) -> DbResult<Vec<Question>> {
        let started = Instant::now();
        let rows = sqlx::query(&format!(
            "SELECT {} FROM questions q
             WHERE (?1 IS NULL OR q.topic = ?1) AND (?2 IS NULL OR q.question_type = ?2)
             ORDER BY q.id ASC",
            QUESTION_COLUMNS
        ))
        .bind(topic)
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await?;

        log_db_operation!(
            debug,
            "list_questions",
            count = rows.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        rows.iter().map(row_to_question).collect()
    }

    /// Question texts of a topic, newest first
    pub async fn recent_question_texts(&self, topic: &str, limit: i64) -> DbResult<Vec<String>> {
        let rows = sqlx::query("SELECT question FROM questions WHERE topic = ?1 ORDER BY id DESC LIMIT ?2")
            .bind(topic)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get("question").map_err(DataAccessError::from))
            .collect()
    }

    pub async fn topic_summaries(&self) -> DbResult<Vec<TopicSummary>> {
        let started = Instant::now();
        let rows = sqlx::query(
            "SELECT topic, COUNT(*) AS question_count FROM questions GROUP BY topic ORDER BY topic",
        )
        .fetch_all(&self.pool)
        .await?;

        log_db_operation!(
            debug,
            "topic_summaries",
            count = rows.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        rows.iter()
            .map(|row| -> DbResult<TopicSummary> {
                Ok(TopicSummary {
                    topic: row.try_get("topic")?,
                    question_count: row.try_get("question_count")?,
                })
            })
            .collect()
    }

    pub async fn count_questions(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM questions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // Attempt operations

    pub async fn insert_attempt(&self, attempt: &NewAttempt) -> DbResult<Attempt> {
        let started = Instant::now();
        let created_at = Utc::now().trunc_subsecs(6);

        let result = sqlx::query(
            r#"
            INSERT INTO user_progress (username, question_id, is_correct, user_answer, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&attempt.username)
        .bind(attempt.question_id)
        .bind(attempt.is_correct)
        .bind(&attempt.user_answer)
        .bind(timestamp(created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            log_db_operation!(error, "insert_attempt", error = e);
            e
        })?;

        log_db_operation!(
            debug,
            "insert_attempt",
            question_id = attempt.question_id,
            duration_ms = started.elapsed().as_millis() as u64
        );

        Ok(Attempt {
            id: result.last_insert_rowid(),
            username: attempt.username.clone(),
            question_id: attempt.question_id,
            is_correct: attempt.is_correct,
            user_answer: attempt.user_answer.clone(),
            created_at,
        })
    }

    fn attempt_query(order: &str) -> String {
        format!(
            "SELECT p.id AS attempt_id, p.username, p.question_id, p.is_correct, p.user_answer,
                    p.created_at AS attempt_created_at, {}
             FROM user_progress p
             JOIN questions q ON q.id = p.question_id
             WHERE p.username = ?1
             ORDER BY {}",
            QUESTION_COLUMNS, order
        )
    }

    /// Every attempt of a user joined with its question, oldest first
    pub async fn attempt_records_for_user(&self, username: &str) -> DbResult<Vec<AttemptRecord>> {
        let started = Instant::now();
        let rows = sqlx::query(&Self::attempt_query("p.created_at ASC, p.id ASC"))
            .bind(username)
            .fetch_all(&self.pool)
            .await?;

        log_db_operation!(
            debug,
            "attempt_records_for_user",
            count = rows.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        rows.iter().map(row_to_attempt_record).collect()
    }

    /// The latest `limit` attempts of a user, newest first
    pub async fn recent_attempts(&self, username: &str, limit: i64) -> DbResult<Vec<AttemptRecord>> {
        let started = Instant::now();
        let rows = sqlx::query(&format!(
            "{} LIMIT ?2",
            Self::attempt_query("p.created_at DESC, p.id DESC")
        ))
        .bind(username)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        log_db_operation!(
            debug,
            "recent_attempts",
            count = rows.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        rows.iter().map(row_to_attempt_record).collect()
    }

    pub async fn count_attempts(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_progress")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
