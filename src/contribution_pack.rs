//! Portable, key-addressed question packs.
//!
//! A pack refers to subjects and topics by slug instead of local id so it can
//! be resolved against any recipient database. Questions stay raw JSON until
//! merge time: a malformed question must not reject the whole pack.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use crate::content_hash::QuestionContent;
use crate::errors::{BankError, BankResult, ErrorContext};
use crate::log_validation;
use crate::models::{Question, QuestionPayload, new_id};
use crate::normalize::slugify;
use crate::store::EntityStore;

pub const PACK_VERSION: u64 = 1;
pub const PACK_KIND: &str = "contribution";
pub const IMAGE_PATH_PREFIX: &str = "question-images/";

static IMAGE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"question-images/([A-Za-z0-9_-]+\.[A-Za-z0-9]+)").expect("image reference pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionTopicTarget {
    pub topic_key: String,
    pub topic_title: String,
}

/// A subject the pack contributes to, with the topics it declares (which may
/// not contain any question yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionTarget {
    pub subject_key: String,
    pub subject_name: String,
    #[serde(default)]
    pub topics: Vec<ContributionTopicTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionQuestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub subject_key: String,
    pub topic_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_keys: Option<Vec<String>>,
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
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(flatten)]
    pub payload: QuestionPayload,
}

impl QuestionContent for ContributionQuestion {
    fn prompt(&self) -> &str {
        &self.prompt
    }

    fn payload(&self) -> &QuestionPayload {
        &self.payload
    }
}

impl ContributionQuestion {
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt is empty".to_string());
        }
        if self.topic_key.trim().is_empty() {
            return Err("topicKey is empty".to_string());
        }
        self.payload.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionPack {
    pub version: u64,
    pub kind: String,
    pub pack_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub targets: Vec<ContributionTarget>,
    #[serde(default)]
    pub questions: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub question_images: BTreeMap<String, String>,
}

impl ContributionPack {
    pub fn to_json(&self) -> BankResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BankError::Internal(format!("failed to serialize pack: {}", e)))
    }
}

/// Parses and gates a pack file. Nothing is written by this step, so a
/// rejected pack leaves the store untouched.
pub fn parse_contribution_pack(json: &str) -> BankResult<ContributionPack> {
    let context = || ErrorContext::new("parse_contribution_pack", "contribution_pack");

    let value: Value = serde_json::from_str(json)
        .map_err(|e| BankError::Validation(format!("pack is not valid JSON: {}", e)).log_with_context(context()))?;

    check_envelope(&value, PACK_KIND).map_err(|e| e.log_with_context(context()))?;

    let pack: ContributionPack = serde_json::from_value(value)
        .map_err(|e| BankError::Validation(format!("malformed contribution pack: {}", e)).log_with_context(context()))?;

    if pack.pack_id.trim().is_empty() {
        return Err(BankError::Validation("packId is empty".to_string()).log_with_context(context()));
    }

    log_validation!(success, "contribution_pack", format!("pack {} accepted", pack.pack_id));
    Ok(pack)
}

/// Shared `{version: 1, kind}` gate for pack and bank files.
pub(crate) fn check_envelope(value: &Value, expected_kind: &str) -> BankResult<()> {
    let object = value
        .as_object()
        .ok_or_else(|| BankError::Validation("top-level JSON value must be an object".to_string()))?;

    match object.get("version").and_then(Value::as_u64) {
        Some(PACK_VERSION) => {}
        other => {
            return Err(BankError::Validation(format!(
                "unsupported version {:?}, expected {}",
                other, PACK_VERSION
            )));
        }
    }

    match object.get("kind").and_then(Value::as_str) {
        Some(kind) if kind == expected_kind => Ok(()),
        other => Err(BankError::Validation(format!(
            "unexpected kind {:?}, expected '{}'",
            other, expected_kind
        ))),
    }
}

/// Image filenames referenced as `question-images/<filename>` in `text`.
pub fn referenced_image_filenames(text: &str) -> BTreeSet<String> {
    IMAGE_REFERENCE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Markdown fields of a question that may embed images.
pub(crate) fn image_bearing_texts<'a>(
    prompt: &'a str,
    explanation: Option<&'a str>,
    payload: &'a QuestionPayload,
) -> Vec<&'a str> {
    let mut texts = vec![prompt];
    texts.extend(explanation);
    texts.extend(payload.model_answer());
    if let QuestionPayload::Completar { cloze_text, .. } = payload {
        texts.push(cloze_text);
    }
    texts
}

/// Builds a pack from local subjects so another instance can merge it.
///
/// Questions whose primary topic no longer exists are left out: a portable
/// question needs a topic key.
pub async fn build_contribution_pack(
    store: &dyn EntityStore,
    subject_ids: &[String],
    created_by: Option<String>,
) -> BankResult<ContributionPack> {
    let mut targets = Vec::new();
    let mut questions = Vec::new();
    let mut image_names = BTreeSet::new();

    for subject_id in subject_ids {
        let subject = store
            .get_subject(subject_id)
            .await?
            .ok_or_else(|| BankError::NotFound(format!("subject '{}'", subject_id)))?;
        let subject_key = slugify(&subject.name);

        let topics = store.list_topics(&subject.id).await?;
        let topic_keys: BTreeMap<&str, String> =
            topics.iter().map(|t| (t.id.as_str(), slugify(&t.title))).collect();

        targets.push(ContributionTarget {
            subject_key: subject_key.clone(),
            subject_name: subject.name.clone(),
            topics: topics
                .iter()
                .map(|t| ContributionTopicTarget {
                    topic_key: slugify(&t.title),
                    topic_title: t.title.clone(),
                })
                .collect(),
        });

        for question in store.list_questions(&subject.id).await? {
            let Some(topic_key) = topic_keys.get(question.topic_id.as_str()) else {
                tracing::warn!(
                    question_id = %question.id,
                    topic_id = %question.topic_id,
                    "Skipping question with dangling primary topic"
                );
                continue;
            };

            for text in image_bearing_texts(&question.prompt, question.explanation.as_deref(), &question.payload) {
                image_names.extend(referenced_image_filenames(text));
            }

            let portable = to_contribution_question(&question, &subject_key, topic_key, &topic_keys, created_by.as_deref());
            let value = serde_json::to_value(&portable)
                .map_err(|e| BankError::Internal(format!("failed to serialize question {}: {}", question.id, e)))?;
            questions.push(value);
        }
    }

    let mut question_images = BTreeMap::new();
    for filename in image_names {
        match store.get_image_by_filename(&filename).await? {
            Some(image) => {
                question_images.insert(filename, BASE64.encode(&image.blob));
            }
            None => tracing::warn!(filename = %filename, "Referenced image is missing from the local store"),
        }
    }

    Ok(ContributionPack {
        version: PACK_VERSION,
        kind: PACK_KIND.to_string(),
        pack_id: new_id(),
        created_by,
        created_at: Some(Utc::now()),
        targets,
        questions,
        question_images,
    })
}

fn to_contribution_question(
    question: &Question,
    subject_key: &str,
    topic_key: &str,
    topic_keys: &BTreeMap<&str, String>,
    pack_author: Option<&str>,
) -> ContributionQuestion {
    let keys = question.topic_ids.as_ref().map(|ids| {
        ids.iter()
            .filter_map(|id| topic_keys.get(id.as_str()).cloned())
            .collect::<Vec<_>>()
    });

    ContributionQuestion {
        id: Some(question.id.clone()),
        subject_key: subject_key.to_string(),
        topic_key: topic_key.to_string(),
        topic_keys: keys,
        prompt: question.prompt.clone(),
        explanation: question.explanation.clone(),
        difficulty: question.difficulty,
        tags: question.tags.clone(),
        origin: question.origin.clone(),
        content_hash: question.content_hash.clone(),
        created_by: question.created_by.clone().or_else(|| pack_author.map(str::to_string)),
        payload: question.payload.clone(),
    }
}
