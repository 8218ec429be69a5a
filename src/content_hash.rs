use sha2::{Digest, Sha256};

use crate::models::{Question, QuestionPayload};
use crate::normalize::{normalize_text, slugify};

pub const HASH_PREFIX: &str = "sha256:";

/// The semantic content a question is fingerprinted by.
pub trait QuestionContent {
    fn prompt(&self) -> &str;
    fn payload(&self) -> &QuestionPayload;
}

impl QuestionContent for Question {
    fn prompt(&self) -> &str {
        &self.prompt
    }

    fn payload(&self) -> &QuestionPayload {
        &self.payload
    }
}

/// Deterministic fingerprint of a question's content, formatted `sha256:<hex>`.
///
/// Ids, timestamps, stats and whitespace formatting do not participate. Option
/// texts and accepted answers are sorted so that independent authors listing
/// them in a different order produce the same hash; blank order is kept since
/// it is positional in the cloze text.
///
/// TEST correct answers are keyed by option text rather than by the raw
/// `correctOptionIds`, so these hashes are not byte-compatible with hashes
/// built from sorted option ids.
pub fn compute_content_hash<Q: QuestionContent + ?Sized>(question: &Q, topic_key: &str) -> String {
    let payload = question.payload();

    let mut parts = vec![
        payload.question_type().as_str().to_string(),
        normalize_text(question.prompt(), true),
        slugify(topic_key),
    ];

    match payload {
        QuestionPayload::Test { options, correct_option_ids } => {
            let mut texts: Vec<String> = options.iter().map(|o| normalize_text(&o.text, true)).collect();
            texts.sort();
            parts.push(texts.join("|"));

            // Correct answers are fingerprinted by option text: option ids are
            // local to whoever authored the question.
            let mut correct: Vec<String> = correct_option_ids
                .iter()
                .map(|id| match options.iter().find(|o| &o.id == id) {
                    Some(option) => normalize_text(&option.text, true),
                    None => id.clone(),
                })
                .collect();
            correct.sort();
            parts.push(correct.join(","));
        }
        QuestionPayload::Desarrollo { model_answer, .. } | QuestionPayload::Practico { model_answer, .. } => {
            parts.push(normalize_text(model_answer.as_deref().unwrap_or(""), true));
        }
        QuestionPayload::Completar { cloze_text, blanks } => {
            parts.push(normalize_text(cloze_text, true));
            let blank_parts: Vec<String> = blanks
                .iter()
                .map(|blank| {
                    let mut accepted: Vec<String> =
                        blank.accepted.iter().map(|a| normalize_text(a, true)).collect();
                    accepted.sort();
                    accepted.join(",")
                })
                .collect();
            parts.push(blank_parts.join("|"));
        }
    }

    let digest = Sha256::digest(parts.join("::").as_bytes());
    format!("{}{:x}", HASH_PREFIX, digest)
}
