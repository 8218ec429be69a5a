use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::BankResult;
use crate::normalize::slugify;
use crate::store::EntityStore;
use crate::{log_performance, log_service_start};

/// One question in the compact projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactQuestion {
    /// Type code: T, D, C or P.
    pub t: String,
    pub p: String,
    pub h: Option<String>,
    /// Slug of the primary topic title, empty when the topic is gone.
    pub tp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactSubject {
    pub asignatura: String,
    pub slug: String,
    pub total: usize,
    pub preguntas: Vec<CompactQuestion>,
}

/// Read-only projection of every subject. Hashes are copied as stored.
pub async fn export_compact(store: &dyn EntityStore) -> BankResult<Vec<CompactSubject>> {
    let start = std::time::Instant::now();
    log_service_start!("compact_export", "export_compact");

    let topic_slugs: HashMap<String, String> = store
        .list_all_topics()
        .await?
        .into_iter()
        .map(|t| (t.id, slugify(&t.title)))
        .collect();

    let mut subjects = Vec::new();
    for subject in store.list_subjects().await? {
        let preguntas: Vec<CompactQuestion> = store
            .list_questions(&subject.id)
            .await?
            .into_iter()
            .map(|q| CompactQuestion {
                t: q.question_type().code().to_string(),
                tp: topic_slugs.get(&q.topic_id).cloned().unwrap_or_default(),
                p: q.prompt,
                h: q.content_hash,
            })
            .collect();

        subjects.push(CompactSubject {
            slug: slugify(&subject.name),
            asignatura: subject.name,
            total: preguntas.len(),
            preguntas,
        });
    }

    log_performance!(
        "export_compact",
        duration_ms = start.elapsed().as_millis() as u64,
        items = subjects.len()
    );
    Ok(subjects)
}
