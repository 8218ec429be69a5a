use anyhow::Result;
use async_trait::async_trait;

use crate::models::*;

/// Keyed persistence with the secondary indexes the bank needs.
///
/// `put_*` is an upsert keyed by `id`. Reads return `None` / empty vectors
/// for absent rows; every `Err` is a storage failure that callers propagate.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn list_subjects(&self) -> Result<Vec<Subject>>;
    async fn get_subject(&self, id: &str) -> Result<Option<Subject>>;
    async fn put_subject(&self, subject: &Subject) -> Result<()>;
    async fn delete_subject(&self, id: &str) -> Result<bool>;

    async fn list_all_topics(&self) -> Result<Vec<Topic>>;
    /// Topics of a subject, ordered by `order`.
    async fn list_topics(&self, subject_id: &str) -> Result<Vec<Topic>>;
    async fn get_topic(&self, id: &str) -> Result<Option<Topic>>;
    async fn put_topic(&self, topic: &Topic) -> Result<()>;
    async fn delete_topic(&self, id: &str) -> Result<bool>;

    async fn list_all_questions(&self) -> Result<Vec<Question>>;
    async fn list_questions(&self, subject_id: &str) -> Result<Vec<Question>>;
    async fn find_questions_by_hash(&self, subject_id: &str, content_hash: &str) -> Result<Vec<Question>>;
    async fn get_question(&self, id: &str) -> Result<Option<Question>>;
    async fn put_question(&self, question: &Question) -> Result<()>;
    async fn delete_question(&self, id: &str) -> Result<bool>;

    async fn list_pdf_anchors(&self) -> Result<Vec<PdfAnchor>>;
    async fn put_pdf_anchor(&self, anchor: &PdfAnchor) -> Result<()>;
    async fn delete_pdf_anchor(&self, id: &str) -> Result<bool>;

    async fn get_image(&self, id: &str) -> Result<Option<QuestionImageRecord>>;
    async fn get_image_by_filename(&self, filename: &str) -> Result<Option<QuestionImageRecord>>;
    async fn put_image(&self, image: &QuestionImageRecord) -> Result<()>;

    async fn get_session(&self, id: &str) -> Result<Option<PracticeSession>>;
    async fn put_session(&self, session: &PracticeSession) -> Result<()>;
}
