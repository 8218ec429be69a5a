use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub subject_id: String,
    pub title: String,
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "TEST")]
    Test,
    #[serde(rename = "DESARROLLO")]
    Desarrollo,
    #[serde(rename = "COMPLETAR")]
    Completar,
    #[serde(rename = "PRACTICO")]
    Practico,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Test => "TEST",
            QuestionType::Desarrollo => "DESARROLLO",
            QuestionType::Completar => "COMPLETAR",
            QuestionType::Practico => "PRACTICO",
        }
    }

    /// One-letter code used by the compact export.
    pub fn code(&self) -> &'static str {
        match self {
            QuestionType::Test => "T",
            QuestionType::Desarrollo => "D",
            QuestionType::Completar => "C",
            QuestionType::Practico => "P",
        }
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClozeBlank {
    pub id: String,
    pub accepted: Vec<String>,
}

/// Type-specific part of a question, tagged by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QuestionPayload {
    #[serde(rename = "TEST", rename_all = "camelCase")]
    Test {
        options: Vec<QuestionOption>,
        correct_option_ids: Vec<String>,
    },
    #[serde(rename = "DESARROLLO", rename_all = "camelCase")]
    Desarrollo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_answer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        keywords: Option<Vec<String>>,
    },
    #[serde(rename = "COMPLETAR", rename_all = "camelCase")]
    Completar {
        cloze_text: String,
        blanks: Vec<ClozeBlank>,
    },
    #[serde(rename = "PRACTICO", rename_all = "camelCase")]
    Practico {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_answer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        keywords: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        numeric_answer: Option<f64>,
    },
}

impl QuestionPayload {
    pub fn question_type(&self) -> QuestionType {
        match self {
            QuestionPayload::Test { .. } => QuestionType::Test,
            QuestionPayload::Desarrollo { .. } => QuestionType::Desarrollo,
            QuestionPayload::Completar { .. } => QuestionType::Completar,
            QuestionPayload::Practico { .. } => QuestionType::Practico,
        }
    }

    pub fn model_answer(&self) -> Option<&str> {
        match self {
            QuestionPayload::Desarrollo { model_answer, .. }
            | QuestionPayload::Practico { model_answer, .. } => model_answer.as_deref(),
            QuestionPayload::Test { .. } | QuestionPayload::Completar { .. } => None,
        }
    }

    pub fn keywords(&self) -> &[String] {
        match self {
            QuestionPayload::Desarrollo { keywords, .. }
            | QuestionPayload::Practico { keywords, .. } => keywords.as_deref().unwrap_or(&[]),
            QuestionPayload::Test { .. } | QuestionPayload::Completar { .. } => &[],
        }
    }

    /// Structural checks shared by local creation and pack import.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            QuestionPayload::Test { options, correct_option_ids } => {
                if options.is_empty() {
                    return Err("TEST question has no options".to_string());
                }
                if correct_option_ids.is_empty() {
                    return Err("TEST question has no correctOptionIds".to_string());
                }
                if let Some(unknown) = correct_option_ids
                    .iter()
                    .find(|id| !options.iter().any(|o| &o.id == *id))
                {
                    return Err(format!("correctOptionIds references unknown option '{}'", unknown));
                }
                Ok(())
            }
            QuestionPayload::Completar { cloze_text, blanks } => {
                if cloze_text.trim().is_empty() {
                    return Err("COMPLETAR question has empty clozeText".to_string());
                }
                if blanks.is_empty() {
                    return Err("COMPLETAR question has no blanks".to_string());
                }
                if let Some(blank) = blanks.iter().find(|b| b.accepted.is_empty()) {
                    return Err(format!("blank '{}' has no accepted answers", blank.id));
                }
                Ok(())
            }
            QuestionPayload::Desarrollo { .. } | QuestionPayload::Practico { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnswerResult {
    Correct,
    Wrong,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStats {
    pub seen: u32,
    pub correct: u32,
    pub wrong: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<AnswerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_review_at: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ease_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub subject_id: String,
    pub topic_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_ids: Option<Vec<String>>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_anchor_id: Option<String>,
    #[serde(default)]
    pub stats: QuestionStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: QuestionPayload,
}

impl Question {
    pub fn question_type(&self) -> QuestionType {
        self.payload.question_type()
    }

    /// All topics this question belongs to, primary first.
    pub fn all_topic_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.topic_id.as_str()];
        if let Some(extra) = &self.topic_ids {
            for id in extra {
                if !ids.contains(&id.as_str()) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    pub fn belongs_to_topic(&self, topic_id: &str) -> bool {
        self.all_topic_ids().contains(&topic_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfAnchor {
    pub id: String,
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    pub pdf_id: String,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionImageRecord {
    pub id: String,
    pub filename: String,
    pub blob: Vec<u8>,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswer {
    pub question_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blank_answers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_result: Option<AnswerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnswerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSession {
    pub id: String,
    pub subject_id: String,
    pub question_ids: Vec<String>,
    #[serde(default)]
    pub answers: Vec<UserAnswer>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PracticeSession {
    pub fn answer_for(&self, question_id: &str) -> Option<&UserAnswer> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }

    /// Answers are keyed by question id; a resubmission replaces the old one.
    pub fn record_answer(&mut self, answer: UserAnswer) {
        match self.answers.iter_mut().find(|a| a.question_id == answer.question_id) {
            Some(existing) => *existing = answer,
            None => self.answers.push(answer),
        }
    }
}

// Requests

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubjectRequest {
    pub name: String,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub exam_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubjectRequest {
    pub name: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub exam_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicRequest {
    pub title: String,
    pub order: Option<i64>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTopicRequest {
    pub title: Option<String>,
    pub order: Option<i64>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuestionRequest {
    pub subject_id: String,
    pub topic_id: String,
    pub topic_ids: Option<Vec<String>>,
    pub prompt: String,
    pub explanation: Option<String>,
    pub difficulty: Option<u8>,
    pub tags: Option<Vec<String>>,
    pub origin: Option<String>,
    pub pdf_anchor_id: Option<String>,
    #[serde(flatten)]
    pub payload: QuestionPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuestionRequest {
    pub topic_id: Option<String>,
    pub topic_ids: Option<Vec<String>>,
    pub prompt: Option<String>,
    pub explanation: Option<String>,
    pub difficulty: Option<u8>,
    pub tags: Option<Vec<String>>,
    pub payload: Option<QuestionPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePdfAnchorRequest {
    pub topic_id: Option<String>,
    pub pdf_id: String,
    pub page: u32,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub subject_id: String,
    pub topic_id: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub due_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub result: Option<AnswerResult>,
    pub keyword_hits: Option<usize>,
    pub stats: QuestionStats,
}
