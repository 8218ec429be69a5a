use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

pub use crate::contribution_pack::parse_contribution_pack;
use crate::config::DEFAULT_MAX_IMAGE_BYTES;
use crate::content_hash::compute_content_hash;
use crate::contribution_pack::{ContributionPack, ContributionQuestion, IMAGE_PATH_PREFIX, image_bearing_texts};
use crate::errors::{BankError, BankResult, ErrorContext, classify_storage_error};
use crate::models::{Question, QuestionImageRecord, QuestionStats, Subject, Topic, new_id};
use crate::normalize::slugify;
use crate::store::EntityStore;
use crate::{log_merge_event, log_performance};

static IMAGE_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_-]+)\.([A-Za-z0-9]+)$").expect("image filename pattern is valid"));

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub max_image_bytes: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    Validation,
    Resolution,
    Image,
}

/// A per-item problem that skipped one question, target or image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeIssue {
    /// Position in `pack.questions`; `None` for targets and images.
    pub index: Option<usize>,
    pub question_id: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupRecord {
    pub index: usize,
    pub existing_question_id: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub pack_id: String,
    pub subjects_created: usize,
    pub topics_created: usize,
    pub questions_imported: usize,
    pub questions_deduplicated: usize,
    pub images_imported: usize,
    pub images_skipped: usize,
    pub imported_question_ids: Vec<String>,
    pub deduplicated: Vec<DedupRecord>,
    pub errors: Vec<MergeIssue>,
}

impl MergeSummary {
    fn issue(&mut self, index: Option<usize>, question_id: Option<String>, kind: IssueKind, message: String) {
        log_merge_event!(issue, pack_id = self.pack_id, index = index, message);
        self.errors.push(MergeIssue {
            index,
            question_id,
            kind,
            message,
        });
    }
}

#[derive(Debug, Clone)]
struct ResolvedTopic {
    id: String,
    /// Slug of the stored title, which is what local hashes are keyed on.
    hash_key: String,
}

#[derive(Debug, Default)]
struct ResolvedSubject {
    id: String,
    topics: HashMap<String, ResolvedTopic>,
}

/// Subject topics loaded once per merge, indexed by title slug.
#[derive(Debug, Default)]
struct TopicIndex {
    by_slug: HashMap<String, Topic>,
    next_order: i64,
}

/// Merges contribution packs into the local bank.
///
/// Subjects and topics are matched by slug, questions by content hash within
/// their subject. Running the same pack twice writes nothing the second time.
pub struct ContributionMerger {
    store: Arc<dyn EntityStore>,
    options: MergeOptions,
}

impl ContributionMerger {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self::with_options(store, MergeOptions::default())
    }

    pub fn with_options(store: Arc<dyn EntityStore>, options: MergeOptions) -> Self {
        Self { store, options }
    }

    /// Parses the pack and merges it.
    pub async fn merge_json(&self, json: &str) -> BankResult<MergeSummary> {
        let pack = parse_contribution_pack(json)?;
        self.merge(&pack).await
    }

    pub async fn merge(&self, pack: &ContributionPack) -> BankResult<MergeSummary> {
        let start = Instant::now();
        log_merge_event!(start, pack_id = pack.pack_id, questions = pack.questions.len());

        let summary = self.merge_pack(pack).await.map_err(|e| {
            e.log_with_context(ErrorContext::new("merge_pack", "contribution_pack").with_id(&pack.pack_id))
        })?;

        log_merge_event!(
            done,
            pack_id = summary.pack_id,
            imported = summary.questions_imported,
            deduplicated = summary.questions_deduplicated,
            errors = summary.errors.len()
        );
        log_performance!(
            "merge_pack",
            duration_ms = start.elapsed().as_millis() as u64,
            items = pack.questions.len()
        );

        Ok(summary)
    }

    async fn merge_pack(&self, pack: &ContributionPack) -> BankResult<MergeSummary> {
        let mut summary = MergeSummary {
            pack_id: pack.pack_id.clone(),
            ..Default::default()
        };

        let declared = self.resolve_targets(pack, &mut summary).await?;

        let mut created: Vec<Question> = Vec::new();
        for (index, raw) in pack.questions.iter().enumerate() {
            let question = match ContributionQuestion::deserialize(raw) {
                Ok(q) => q,
                Err(e) => {
                    let question_id = raw.get("id").and_then(|v| v.as_str()).map(str::to_string);
                    summary.issue(Some(index), question_id, IssueKind::Validation, format!("malformed question: {}", e));
                    continue;
                }
            };

            if let Err(message) = question.validate() {
                summary.issue(Some(index), question.id.clone(), IssueKind::Validation, message);
                continue;
            }

            let (subject, primary, extra_topic_ids) = match resolve_question_keys(&declared, &question) {
                Ok(resolved) => resolved,
                Err(message) => {
                    summary.issue(Some(index), question.id.clone(), IssueKind::Resolution, message);
                    continue;
                }
            };

            let content_hash = compute_content_hash(&question, &primary.hash_key);

            let existing = self.store.find_questions_by_hash(&subject.id, &content_hash).await?;
            if let Some(hit) = existing.first() {
                log_merge_event!(dedup, pack_id = pack.pack_id, index = index, existing = hit.id);
                summary.questions_deduplicated += 1;
                summary.deduplicated.push(DedupRecord {
                    index,
                    existing_question_id: hit.id.clone(),
                    content_hash,
                });
                continue;
            }

            let now = Utc::now();
            let new_question = Question {
                id: new_id(),
                subject_id: subject.id.clone(),
                topic_id: primary.id.clone(),
                topic_ids: extra_topic_ids,
                prompt: question.prompt,
                explanation: question.explanation,
                difficulty: question.difficulty,
                tags: question.tags,
                origin: question.origin,
                pdf_anchor_id: None,
                stats: QuestionStats::default(),
                content_hash: Some(content_hash),
                source_pack_id: Some(pack.pack_id.clone()),
                created_by: pack.created_by.clone(),
                created_at: now,
                updated_at: now,
                payload: question.payload,
            };

            self.store.put_question(&new_question).await?;
            log_merge_event!(created, "question", pack_id = pack.pack_id, id = new_question.id);

            summary.questions_imported += 1;
            summary.imported_question_ids.push(new_question.id.clone());
            created.push(new_question);
        }

        self.import_images(pack, &created, &mut summary).await?;

        Ok(summary)
    }

    /// Resolves or creates every declared subject and topic.
    async fn resolve_targets(
        &self,
        pack: &ContributionPack,
        summary: &mut MergeSummary,
    ) -> BankResult<HashMap<String, ResolvedSubject>> {
        let mut subjects_by_slug: HashMap<String, Subject> = HashMap::new();
        for subject in self.store.list_subjects().await? {
            subjects_by_slug.entry(slugify(&subject.name)).or_insert(subject);
        }

        let mut topic_indexes: HashMap<String, TopicIndex> = HashMap::new();
        let mut declared: HashMap<String, ResolvedSubject> = HashMap::new();

        for target in &pack.targets {
            let subject_key = slugify(&target.subject_key);
            if subject_key.is_empty() {
                summary.issue(
                    None,
                    None,
                    IssueKind::Validation,
                    format!("target subjectKey '{}' has an empty slug", target.subject_key),
                );
                continue;
            }

            // A key that drifted from the name still resolves through the name slug.
            let name_key = slugify(&target.subject_name);
            let found = subjects_by_slug
                .get(&subject_key)
                .or_else(|| subjects_by_slug.get(&name_key))
                .cloned();

            let subject = match found {
                Some(subject) => subject,
                None => {
                    let now = Utc::now();
                    let name = if target.subject_name.trim().is_empty() {
                        target.subject_key.trim().to_string()
                    } else {
                        target.subject_name.trim().to_string()
                    };
                    let subject = Subject {
                        id: new_id(),
                        name,
                        color: None,
                        icon: None,
                        exam_date: None,
                        created_at: now,
                        updated_at: now,
                    };
                    self.store.put_subject(&subject).await?;
                    log_merge_event!(created, "subject", pack_id = pack.pack_id, id = subject.id);
                    summary.subjects_created += 1;
                    subjects_by_slug.insert(slugify(&subject.name), subject.clone());
                    subject
                }
            };

            if !topic_indexes.contains_key(&subject.id) {
                let topics = self.store.list_topics(&subject.id).await?;
                let next_order = topics.iter().map(|t| t.order + 1).max().unwrap_or(0);
                let mut by_slug = HashMap::new();
                for topic in topics {
                    by_slug.entry(slugify(&topic.title)).or_insert(topic);
                }
                topic_indexes.insert(subject.id.clone(), TopicIndex { by_slug, next_order });
            }

            let resolved = declared.entry(subject_key).or_insert_with(|| ResolvedSubject {
                id: subject.id.clone(),
                topics: HashMap::new(),
            });
            let Some(index) = topic_indexes.get_mut(&subject.id) else {
                continue;
            };

            for declared_topic in &target.topics {
                let topic_key = slugify(&declared_topic.topic_key);
                if topic_key.is_empty() {
                    summary.issue(
                        None,
                        None,
                        IssueKind::Validation,
                        format!("topicKey '{}' has an empty slug", declared_topic.topic_key),
                    );
                    continue;
                }

                let title_key = slugify(&declared_topic.topic_title);
                let found = index
                    .by_slug
                    .get(&topic_key)
                    .or_else(|| index.by_slug.get(&title_key))
                    .cloned();

                let topic = match found {
                    Some(topic) => topic,
                    None => {
                        let now = Utc::now();
                        let title = if declared_topic.topic_title.trim().is_empty() {
                            declared_topic.topic_key.trim().to_string()
                        } else {
                            declared_topic.topic_title.trim().to_string()
                        };
                        let topic = Topic {
                            id: new_id(),
                            subject_id: subject.id.clone(),
                            title,
                            order: index.next_order,
                            tags: None,
                            created_at: now,
                            updated_at: now,
                        };
                        self.store.put_topic(&topic).await?;
                        log_merge_event!(created, "topic", pack_id = pack.pack_id, id = topic.id);
                        summary.topics_created += 1;
                        index.next_order += 1;
                        index.by_slug.insert(slugify(&topic.title), topic.clone());
                        topic
                    }
                };

                resolved.topics.insert(
                    topic_key,
                    ResolvedTopic {
                        hash_key: slugify(&topic.title),
                        id: topic.id,
                    },
                );
            }
        }

        Ok(declared)
    }

    async fn import_images(
        &self,
        pack: &ContributionPack,
        created: &[Question],
        summary: &mut MergeSummary,
    ) -> BankResult<()> {
        if pack.question_images.is_empty() || created.is_empty() {
            return Ok(());
        }

        let texts: Vec<&str> = created
            .iter()
            .flat_map(|q| image_bearing_texts(&q.prompt, q.explanation.as_deref(), &q.payload))
            .collect();

        for (filename, encoded) in &pack.question_images {
            let reference = format!("{}{}", IMAGE_PATH_PREFIX, filename);
            if !texts.iter().any(|t| t.contains(&reference)) {
                continue;
            }

            if self.store.get_image_by_filename(filename).await?.is_some() {
                summary.images_skipped += 1;
                continue;
            }

            let Some(captures) = IMAGE_FILENAME.captures(filename) else {
                summary.issue(None, None, IssueKind::Image, format!("invalid image filename '{}'", filename));
                continue;
            };
            let id = captures[1].to_string();
            let extension = captures[2].to_lowercase();

            if let Some(existing) = self.store.get_image(&id).await? {
                summary.issue(
                    None,
                    None,
                    IssueKind::Image,
                    format!("image '{}' reuses id '{}' already taken by '{}'", filename, id, existing.filename),
                );
                continue;
            }

            let payload = encoded.clone();
            let blob = match tokio::task::spawn_blocking(move || decode_image_payload(&payload)).await? {
                Ok(blob) => blob,
                Err(e) => {
                    summary.issue(None, None, IssueKind::Image, format!("image '{}' is not valid base64: {}", filename, e));
                    continue;
                }
            };

            if blob.len() > self.options.max_image_bytes {
                summary.issue(
                    None,
                    None,
                    IssueKind::Image,
                    format!(
                        "image '{}' is {} bytes, limit is {}",
                        filename,
                        blob.len(),
                        self.options.max_image_bytes
                    ),
                );
                continue;
            }

            let image = QuestionImageRecord {
                id,
                filename: filename.clone(),
                blob,
                mime_type: mime_type_for_extension(&extension).to_string(),
                created_at: Utc::now(),
            };
            match self.store.put_image(&image).await.map_err(classify_storage_error) {
                Ok(()) => {}
                Err(BankError::Duplicate(message)) => {
                    summary.issue(None, None, IssueKind::Image, format!("image '{}' not stored: {}", filename, message));
                    continue;
                }
                Err(e) => return Err(e),
            }
            log_merge_event!(created, "image", pack_id = pack.pack_id, id = image.filename);
            summary.images_imported += 1;
        }

        Ok(())
    }
}

type ResolvedKeys<'a> = (&'a ResolvedSubject, &'a ResolvedTopic, Option<Vec<String>>);

fn resolve_question_keys<'a>(
    declared: &'a HashMap<String, ResolvedSubject>,
    question: &ContributionQuestion,
) -> Result<ResolvedKeys<'a>, String> {
    let subject = declared
        .get(&slugify(&question.subject_key))
        .ok_or_else(|| format!("subjectKey '{}' is not declared in targets", question.subject_key))?;

    let lookup = |key: &str| {
        subject
            .topics
            .get(&slugify(key))
            .ok_or_else(|| format!("topicKey '{}' is not declared for subject '{}'", key, question.subject_key))
    };

    let primary = lookup(&question.topic_key)?;

    let topic_ids = match &question.topic_keys {
        Some(keys) => {
            let mut ids = vec![primary.id.clone()];
            for key in keys {
                let topic = lookup(key)?;
                if !ids.contains(&topic.id) {
                    ids.push(topic.id.clone());
                }
            }
            Some(ids)
        }
        None => None,
    };

    Ok((subject, primary, topic_ids))
}

/// Decodes a base64 image, with or without a `data:<mime>;base64,` prefix.
pub fn decode_image_payload(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = encoded.trim();
    let body = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => trimmed,
    };
    let cleaned: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64.decode(cleaned)
}

pub fn mime_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
