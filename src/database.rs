use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Instant;

use crate::log_db_operation;
use crate::models::*;
use crate::store::EntityStore;

/// SQLite-backed entity store.
///
/// Each table keeps its indexed keys in columns and the full record as JSON in
/// `data`, so records round-trip without a column per optional field.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `sqlite::memory:` is a separate database, so
        // in-memory stores are pinned to one long-lived connection.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().max_connections(5).connect_with(options).await?
        };

        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS subjects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_topics_subject ON topics(subject_id);",
            r#"
            CREATE TABLE IF NOT EXISTS questions (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                topic_id TEXT NOT NULL,
                content_hash TEXT,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_questions_subject ON questions(subject_id);",
            "CREATE INDEX IF NOT EXISTS idx_questions_subject_hash ON questions(subject_id, content_hash);",
            r#"
            CREATE TABLE IF NOT EXISTS pdf_anchors (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS question_images (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL UNIQUE,
                mime_type TEXT NOT NULL,
                blob BLOB NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS practice_sessions (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        log_db_operation!(info, "migrate", "schema ready");
        Ok(())
    }

    async fn fetch_image(&self, sql: &str, key: &str) -> Result<Option<QuestionImageRecord>> {
        let Some(row) = sqlx::query(sql).bind(key).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let created_at: String = row.try_get("created_at")?;
        Ok(Some(QuestionImageRecord {
            id: row.try_get("id")?,
            filename: row.try_get("filename")?,
            blob: row.try_get("blob")?,
            mime_type: row.try_get("mime_type")?,
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        }))
    }

    async fn fetch_records<T: DeserializeOwned>(&self, sql: &str, binds: &[&str]) -> Result<Vec<T>> {
        let started = Instant::now();
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        let records = rows.iter().map(decode_record).collect::<Result<Vec<T>>>()?;

        log_db_operation!(
            debug,
            sql.split_whitespace().take(4).collect::<Vec<_>>().join(" "),
            count = records.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(records)
    }

    async fn fetch_record<T: DeserializeOwned>(&self, sql: &str, id: &str) -> Result<Option<T>> {
        let row = sqlx::query(sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode_record).transpose()
    }

    async fn delete_by_id(&self, table: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?1", table))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn decode_record<T: DeserializeOwned>(row: &SqliteRow) -> Result<T> {
    let data: String = row.try_get("data")?;
    serde_json::from_str(&data).context("stored record is not valid JSON for its table")
}

fn encode_record<T: Serialize>(record: &T) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

/// Fixed-width so that text ordering matches time ordering.
fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[async_trait]
impl EntityStore for Database {
    async fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.fetch_records("SELECT data FROM subjects ORDER BY created_at, name", &[]).await
    }

    async fn get_subject(&self, id: &str) -> Result<Option<Subject>> {
        self.fetch_record("SELECT data FROM subjects WHERE id = ?1", id).await
    }

    async fn put_subject(&self, subject: &Subject) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO subjects (id, name, created_at, data) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&subject.id)
        .bind(&subject.name)
        .bind(timestamp(&subject.created_at))
        .bind(encode_record(subject)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_subject(&self, id: &str) -> Result<bool> {
        self.delete_by_id("subjects", id).await
    }

    async fn list_all_topics(&self) -> Result<Vec<Topic>> {
        self.fetch_records("SELECT data FROM topics ORDER BY subject_id, sort_order, created_at", &[])
            .await
    }

    async fn list_topics(&self, subject_id: &str) -> Result<Vec<Topic>> {
        self.fetch_records(
            "SELECT data FROM topics WHERE subject_id = ?1 ORDER BY sort_order, created_at",
            &[subject_id],
        )
        .await
    }

    async fn get_topic(&self, id: &str) -> Result<Option<Topic>> {
        self.fetch_record("SELECT data FROM topics WHERE id = ?1", id).await
    }

    async fn put_topic(&self, topic: &Topic) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO topics (id, subject_id, sort_order, created_at, data) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&topic.id)
        .bind(&topic.subject_id)
        .bind(topic.order)
        .bind(timestamp(&topic.created_at))
        .bind(encode_record(topic)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_topic(&self, id: &str) -> Result<bool> {
        self.delete_by_id("topics", id).await
    }

    async fn list_all_questions(&self) -> Result<Vec<Question>> {
        self.fetch_records("SELECT data FROM questions ORDER BY subject_id, created_at", &[]).await
    }

    async fn list_questions(&self, subject_id: &str) -> Result<Vec<Question>> {
        self.fetch_records(
            "SELECT data FROM questions WHERE subject_id = ?1 ORDER BY created_at",
            &[subject_id],
        )
        .await
    }

    async fn find_questions_by_hash(&self, subject_id: &str, content_hash: &str) -> Result<Vec<Question>> {
        self.fetch_records(
            "SELECT data FROM questions WHERE subject_id = ?1 AND content_hash = ?2 ORDER BY created_at",
            &[subject_id, content_hash],
        )
        .await
    }

    async fn get_question(&self, id: &str) -> Result<Option<Question>> {
        self.fetch_record("SELECT data FROM questions WHERE id = ?1", id).await
    }

    async fn put_question(&self, question: &Question) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO questions (id, subject_id, topic_id, content_hash, created_at, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&question.id)
        .bind(&question.subject_id)
        .bind(&question.topic_id)
        .bind(&question.content_hash)
        .bind(timestamp(&question.created_at))
        .bind(encode_record(question)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_question(&self, id: &str) -> Result<bool> {
        self.delete_by_id("questions", id).await
    }

    async fn list_pdf_anchors(&self) -> Result<Vec<PdfAnchor>> {
        self.fetch_records("SELECT data FROM pdf_anchors ORDER BY subject_id, created_at", &[]).await
    }

    async fn put_pdf_anchor(&self, anchor: &PdfAnchor) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO pdf_anchors (id, subject_id, created_at, data) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&anchor.id)
        .bind(&anchor.subject_id)
        .bind(timestamp(&anchor.created_at))
        .bind(encode_record(anchor)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_pdf_anchor(&self, id: &str) -> Result<bool> {
        self.delete_by_id("pdf_anchors", id).await
    }

    async fn get_image(&self, id: &str) -> Result<Option<QuestionImageRecord>> {
        self.fetch_image("SELECT id, filename, mime_type, blob, created_at FROM question_images WHERE id = ?1", id)
            .await
    }

    async fn get_image_by_filename(&self, filename: &str) -> Result<Option<QuestionImageRecord>> {
        self.fetch_image(
            "SELECT id, filename, mime_type, blob, created_at FROM question_images WHERE filename = ?1",
            filename,
        )
        .await
    }

    /// Images are write-once: a second insert of the same filename fails.
    async fn put_image(&self, image: &QuestionImageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO question_images (id, filename, mime_type, blob, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&image.id)
        .bind(&image.filename)
        .bind(&image.mime_type)
        .bind(&image.blob)
        .bind(timestamp(&image.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<PracticeSession>> {
        self.fetch_record("SELECT data FROM practice_sessions WHERE id = ?1", id).await
    }

    async fn put_session(&self, session: &PracticeSession) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO practice_sessions (id, subject_id, created_at, data) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&session.id)
        .bind(&session.subject_id)
        .bind(timestamp(&session.created_at))
        .bind(encode_record(session)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
