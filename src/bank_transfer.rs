//! Whole-bank backup and restore.
//!
//! Import never trusts incoming ids: every entity gets a fresh id and every
//! reference is rewritten through one table per id namespace, so loading a
//! backup into a non-empty bank cannot collide with existing rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::contribution_pack::{PACK_VERSION, check_envelope};
use crate::errors::{BankError, BankResult, ErrorContext};
use crate::models::{PdfAnchor, Question, Subject, Topic, new_id};
use crate::store::EntityStore;
use crate::{log_service_start, log_service_success, log_service_warn};

pub const BANK_KIND: &str = "bank";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankSnapshot {
    pub version: u64,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub pdf_anchors: Vec<PdfAnchor>,
}

impl BankSnapshot {
    pub fn to_json(&self) -> BankResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BankError::Internal(format!("failed to serialize bank: {}", e)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankImportSummary {
    pub subjects_imported: usize,
    pub topics_imported: usize,
    pub questions_imported: usize,
    pub pdf_anchors_imported: usize,
    /// Rows left out because their subject is not part of the file.
    pub skipped: Vec<String>,
}

/// Old id -> fresh id for one namespace. Unknown ids get a fresh id on first
/// sight and keep it for the rest of the import.
#[derive(Debug, Default)]
struct IdRemap {
    ids: HashMap<String, String>,
}

impl IdRemap {
    fn map(&mut self, old: &str) -> String {
        self.ids.entry(old.to_string()).or_insert_with(new_id).clone()
    }

    fn map_all(&mut self, old: &[String]) -> Vec<String> {
        old.iter().map(|id| self.map(id)).collect()
    }
}

pub async fn export_bank(store: &dyn EntityStore) -> BankResult<BankSnapshot> {
    let start = Instant::now();
    log_service_start!("bank_transfer", "export_bank");

    let snapshot = BankSnapshot {
        version: PACK_VERSION,
        kind: BANK_KIND.to_string(),
        exported_at: Some(Utc::now()),
        subjects: store.list_subjects().await?,
        topics: store.list_all_topics().await?,
        questions: store.list_all_questions().await?,
        pdf_anchors: store.list_pdf_anchors().await?,
    };

    let count = snapshot.subjects.len() + snapshot.topics.len() + snapshot.questions.len() + snapshot.pdf_anchors.len();
    log_service_success!(
        "bank_transfer",
        "export_bank",
        count = count,
        duration_ms = start.elapsed().as_millis() as u64
    );
    Ok(snapshot)
}

/// Parses and gates a bank file without touching the store.
pub fn parse_bank_snapshot(json: &str) -> BankResult<BankSnapshot> {
    let context = || ErrorContext::new("import_bank", "bank_snapshot");

    let value: Value = serde_json::from_str(json)
        .map_err(|e| BankError::Validation(format!("bank file is not valid JSON: {}", e)).log_with_context(context()))?;
    check_envelope(&value, BANK_KIND).map_err(|e| e.log_with_context(context()))?;

    serde_json::from_value(value)
        .map_err(|e| BankError::Validation(format!("malformed bank file: {}", e)).log_with_context(context()))
}

pub async fn import_bank(store: &dyn EntityStore, json: &str) -> BankResult<BankImportSummary> {
    let snapshot = parse_bank_snapshot(json)?;
    import_snapshot(store, snapshot).await
}

/// Additive import: loading the same snapshot twice yields two copies.
pub async fn import_snapshot(store: &dyn EntityStore, snapshot: BankSnapshot) -> BankResult<BankImportSummary> {
    let start = Instant::now();
    log_service_start!("bank_transfer", "import_bank");

    let mut summary = BankImportSummary::default();
    let mut subject_ids = IdRemap::default();
    let mut topic_ids = IdRemap::default();
    let mut question_ids = IdRemap::default();
    let mut anchor_ids = IdRemap::default();
    let mut pdf_ids = IdRemap::default();

    let batch_subjects: HashSet<&str> = snapshot.subjects.iter().map(|s| s.id.as_str()).collect();

    for subject in &snapshot.subjects {
        let mut subject = subject.clone();
        subject.id = subject_ids.map(&subject.id);
        store.put_subject(&subject).await?;
        summary.subjects_imported += 1;
    }

    for topic in &snapshot.topics {
        if !batch_subjects.contains(topic.subject_id.as_str()) {
            summary.skip(format!("topic {} references unknown subject {}", topic.id, topic.subject_id));
            continue;
        }
        let mut topic = topic.clone();
        topic.id = topic_ids.map(&topic.id);
        topic.subject_id = subject_ids.map(&topic.subject_id);
        store.put_topic(&topic).await?;
        summary.topics_imported += 1;
    }

    for anchor in &snapshot.pdf_anchors {
        if !batch_subjects.contains(anchor.subject_id.as_str()) {
            summary.skip(format!("pdf anchor {} references unknown subject {}", anchor.id, anchor.subject_id));
            continue;
        }
        let mut anchor = anchor.clone();
        anchor.id = anchor_ids.map(&anchor.id);
        anchor.subject_id = subject_ids.map(&anchor.subject_id);
        anchor.topic_id = anchor.topic_id.as_deref().map(|id| topic_ids.map(id));
        anchor.pdf_id = pdf_ids.map(&anchor.pdf_id);
        store.put_pdf_anchor(&anchor).await?;
        summary.pdf_anchors_imported += 1;
    }

    for question in &snapshot.questions {
        if !batch_subjects.contains(question.subject_id.as_str()) {
            summary.skip(format!("question {} references unknown subject {}", question.id, question.subject_id));
            continue;
        }
        let mut question = question.clone();
        question.id = question_ids.map(&question.id);
        question.subject_id = subject_ids.map(&question.subject_id);
        question.topic_id = topic_ids.map(&question.topic_id);
        question.topic_ids = question.topic_ids.as_deref().map(|ids| topic_ids.map_all(ids));
        question.pdf_anchor_id = question.pdf_anchor_id.as_deref().map(|id| anchor_ids.map(id));
        store.put_question(&question).await?;
        summary.questions_imported += 1;
    }

    log_service_success!(
        "bank_transfer",
        "import_bank",
        count = summary.subjects_imported + summary.topics_imported + summary.questions_imported + summary.pdf_anchors_imported,
        duration_ms = start.elapsed().as_millis() as u64
    );
    Ok(summary)
}

impl BankImportSummary {
    fn skip(&mut self, message: String) {
        log_service_warn!("bank_transfer", "import_bank", message);
        self.skipped.push(message);
    }
}
