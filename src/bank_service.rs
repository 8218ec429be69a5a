use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::content_hash::compute_content_hash;
use crate::errors::{BankError, BankResult, ErrorContext};
use crate::models::*;
use crate::normalize::slugify;
use crate::store::EntityStore;
use crate::{log_service_start, log_service_success, log_service_warn};

/// Outcome of recomputing stored content hashes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RehashReport {
    pub examined: usize,
    pub changed_question_ids: Vec<String>,
    pub dry_run: bool,
}

#[derive(Clone)]
pub struct BankService {
    store: Arc<dyn EntityStore>,
}

impl BankService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn EntityStore> {
        Arc::clone(&self.store)
    }

    // Subject operations
    pub async fn create_subject(&self, request: CreateSubjectRequest) -> BankResult<Subject> {
        log_service_start!("bank_service", "create_subject");

        let name = request.name.trim().to_string();
        self.ensure_subject_slug_free(&name, None)
            .await
            .map_err(|e| e.log_with_context(ErrorContext::new("create_subject", "subject")))?;

        let now = Utc::now();
        let subject = Subject {
            id: new_id(),
            name,
            color: request.color,
            icon: request.icon,
            exam_date: request.exam_date,
            created_at: now,
            updated_at: now,
        };
        self.store.put_subject(&subject).await?;

        log_service_success!("bank_service", "create_subject", subject_id = subject.id, "subject created");
        Ok(subject)
    }

    pub async fn get_subject(&self, id: &str) -> BankResult<Option<Subject>> {
        Ok(self.store.get_subject(id).await?)
    }

    pub async fn list_subjects(&self) -> BankResult<Vec<Subject>> {
        Ok(self.store.list_subjects().await?)
    }

    pub async fn update_subject(&self, id: &str, request: UpdateSubjectRequest) -> BankResult<Option<Subject>> {
        let mut subject = match self.store.get_subject(id).await? {
            Some(subject) => subject,
            None => return Ok(None),
        };

        if let Some(name) = request.name {
            let name = name.trim().to_string();
            self.ensure_subject_slug_free(&name, Some(id))
                .await
                .map_err(|e| e.log_with_context(ErrorContext::new("update_subject", "subject").with_id(id)))?;
            subject.name = name;
        }
        if let Some(color) = request.color {
            subject.color = Some(color);
        }
        if let Some(icon) = request.icon {
            subject.icon = Some(icon);
        }
        if let Some(exam_date) = request.exam_date {
            subject.exam_date = Some(exam_date);
        }

        subject.updated_at = Utc::now();
        self.store.put_subject(&subject).await?;
        Ok(Some(subject))
    }

    /// Removes the subject and everything it owns. Not transactional: a
    /// storage failure part way leaves the remaining rows in place.
    pub async fn delete_subject(&self, id: &str) -> BankResult<bool> {
        log_service_start!("bank_service", "delete_subject", subject_id = id);

        if self.store.get_subject(id).await?.is_none() {
            return Ok(false);
        }

        for question in self.store.list_questions(id).await? {
            self.store.delete_question(&question.id).await?;
        }
        for topic in self.store.list_topics(id).await? {
            self.store.delete_topic(&topic.id).await?;
        }
        for anchor in self.store.list_pdf_anchors().await? {
            if anchor.subject_id == id {
                self.store.delete_pdf_anchor(&anchor.id).await?;
            }
        }

        let deleted = self.store.delete_subject(id).await?;
        log_service_success!("bank_service", "delete_subject", subject_id = id, "subject and its content deleted");
        Ok(deleted)
    }

    async fn ensure_subject_slug_free(&self, name: &str, except_id: Option<&str>) -> BankResult<()> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(BankError::Validation(format!("subject name '{}' has an empty slug", name)));
        }

        let taken = self
            .store
            .list_subjects()
            .await?
            .into_iter()
            .any(|s| Some(s.id.as_str()) != except_id && slugify(&s.name) == slug);
        if taken {
            return Err(BankError::Duplicate(format!("a subject with slug '{}' already exists", slug)));
        }
        Ok(())
    }

    // Topic operations
    pub async fn create_topic(&self, subject_id: &str, request: CreateTopicRequest) -> BankResult<Topic> {
        log_service_start!("bank_service", "create_topic", subject_id = subject_id);
        let context = || ErrorContext::new("create_topic", "topic");

        if self.store.get_subject(subject_id).await?.is_none() {
            return Err(BankError::NotFound(format!("subject '{}'", subject_id)).log_with_context(context()));
        }

        let title = request.title.trim().to_string();
        let existing = self.store.list_topics(subject_id).await?;
        ensure_topic_slug_free(&existing, &title, None).map_err(|e| e.log_with_context(context()))?;

        let order = request
            .order
            .unwrap_or_else(|| existing.iter().map(|t| t.order + 1).max().unwrap_or(0));

        let now = Utc::now();
        let topic = Topic {
            id: new_id(),
            subject_id: subject_id.to_string(),
            title,
            order,
            tags: request.tags,
            created_at: now,
            updated_at: now,
        };
        self.store.put_topic(&topic).await?;
        Ok(topic)
    }

    pub async fn get_topic(&self, id: &str) -> BankResult<Option<Topic>> {
        Ok(self.store.get_topic(id).await?)
    }

    pub async fn list_topics(&self, subject_id: &str) -> BankResult<Vec<Topic>> {
        Ok(self.store.list_topics(subject_id).await?)
    }

    /// A title change moves the hash key of every question filed under the
    /// topic, so their hashes are recomputed.
    pub async fn update_topic(&self, id: &str, request: UpdateTopicRequest) -> BankResult<Option<Topic>> {
        let mut topic = match self.store.get_topic(id).await? {
            Some(topic) => topic,
            None => return Ok(None),
        };

        let mut title_changed = false;
        if let Some(title) = request.title {
            let title = title.trim().to_string();
            let siblings = self.store.list_topics(&topic.subject_id).await?;
            ensure_topic_slug_free(&siblings, &title, Some(id))
                .map_err(|e| e.log_with_context(ErrorContext::new("update_topic", "topic").with_id(id)))?;
            title_changed = title != topic.title;
            topic.title = title;
        }
        if let Some(order) = request.order {
            topic.order = order;
        }
        if let Some(tags) = request.tags {
            topic.tags = Some(tags);
        }

        topic.updated_at = Utc::now();
        self.store.put_topic(&topic).await?;

        if title_changed {
            let key = slugify(&topic.title);
            let mut rehashed = 0usize;
            for mut question in self.store.list_questions(&topic.subject_id).await? {
                if question.topic_id != topic.id {
                    continue;
                }
                question.content_hash = Some(compute_content_hash(&question, &key));
                question.updated_at = topic.updated_at;
                self.store.put_question(&question).await?;
                rehashed += 1;
            }
            log_service_success!(
                "bank_service",
                "update_topic",
                format!("topic {} renamed, {} question hashes recomputed", topic.id, rehashed)
            );
        }

        Ok(Some(topic))
    }

    /// Questions keep pointing at the deleted id and resolve it to nothing.
    pub async fn delete_topic(&self, id: &str) -> BankResult<bool> {
        Ok(self.store.delete_topic(id).await?)
    }

    /// Primary topic of a question, or `None` if it has been deleted.
    pub async fn resolve_topic(&self, question: &Question) -> BankResult<Option<Topic>> {
        Ok(self.store.get_topic(&question.topic_id).await?)
    }

    // Question operations
    pub async fn create_question(&self, request: CreateQuestionRequest) -> BankResult<Question> {
        log_service_start!("bank_service", "create_question", subject_id = request.subject_id);
        let context = || ErrorContext::new("create_question", "question");

        if self.store.get_subject(&request.subject_id).await?.is_none() {
            return Err(BankError::NotFound(format!("subject '{}'", request.subject_id)).log_with_context(context()));
        }
        let topic = self
            .subject_topic(&request.subject_id, &request.topic_id)
            .await
            .map_err(|e| e.log_with_context(context()))?;

        validate_content(&request.prompt, &request.payload).map_err(|e| e.log_with_context(context()))?;
        let topic_ids = match request.topic_ids {
            Some(ids) => Some(
                self.collect_topic_ids(&request.subject_id, &topic.id, ids)
                    .await
                    .map_err(|e| e.log_with_context(context()))?,
            ),
            None => None,
        };

        let now = Utc::now();
        let mut question = Question {
            id: new_id(),
            subject_id: request.subject_id,
            topic_id: topic.id.clone(),
            topic_ids,
            prompt: request.prompt,
            explanation: request.explanation,
            difficulty: request.difficulty,
            tags: request.tags,
            origin: request.origin,
            pdf_anchor_id: request.pdf_anchor_id,
            stats: QuestionStats::default(),
            content_hash: None,
            source_pack_id: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            payload: request.payload,
        };
        question.content_hash = Some(compute_content_hash(&question, &slugify(&topic.title)));

        self.store.put_question(&question).await?;
        log_service_success!("bank_service", "create_question", question_id = question.id, "question created");
        Ok(question)
    }

    pub async fn get_question(&self, id: &str) -> BankResult<Option<Question>> {
        Ok(self.store.get_question(id).await?)
    }

    pub async fn list_questions(&self, subject_id: &str) -> BankResult<Vec<Question>> {
        Ok(self.store.list_questions(subject_id).await?)
    }

    pub async fn update_question(&self, id: &str, request: UpdateQuestionRequest) -> BankResult<Option<Question>> {
        log_service_start!("bank_service", "update_question", question_id = id);
        let context = || ErrorContext::new("update_question", "question").with_id(id);

        let mut question = match self.store.get_question(id).await? {
            Some(question) => question,
            None => return Ok(None),
        };

        if let Some(payload) = request.payload {
            if payload.question_type() != question.question_type() {
                return Err(BankError::Validation(format!(
                    "question type cannot change from {} to {}",
                    question.question_type(),
                    payload.question_type()
                ))
                .log_with_context(context()));
            }
            question.payload = payload;
        }
        if let Some(prompt) = request.prompt {
            question.prompt = prompt;
        }
        validate_content(&question.prompt, &question.payload).map_err(|e| e.log_with_context(context()))?;

        if let Some(topic_id) = request.topic_id {
            let topic = self
                .subject_topic(&question.subject_id, &topic_id)
                .await
                .map_err(|e| e.log_with_context(context()))?;
            question.topic_id = topic.id;
        }
        if let Some(ids) = request.topic_ids {
            let ids = self
                .collect_topic_ids(&question.subject_id, &question.topic_id, ids)
                .await
                .map_err(|e| e.log_with_context(context()))?;
            question.topic_ids = Some(ids);
        } else if let Some(ids) = question.topic_ids.as_mut() {
            if !ids.contains(&question.topic_id) {
                ids.insert(0, question.topic_id.clone());
            }
        }
        if let Some(explanation) = request.explanation {
            question.explanation = Some(explanation);
        }
        if let Some(difficulty) = request.difficulty {
            question.difficulty = Some(difficulty);
        }
        if let Some(tags) = request.tags {
            question.tags = Some(tags);
        }

        let key = self.hash_key(&question.topic_id).await?;
        question.content_hash = Some(compute_content_hash(&question, &key));
        question.updated_at = Utc::now();

        self.store.put_question(&question).await?;
        Ok(Some(question))
    }

    pub async fn delete_question(&self, id: &str) -> BankResult<bool> {
        Ok(self.store.delete_question(id).await?)
    }

    /// Recomputes every stored hash; with `dry_run` only reports the drift.
    pub async fn rehash_questions(&self, dry_run: bool) -> BankResult<RehashReport> {
        log_service_start!("bank_service", "rehash_questions");
        let mut report = RehashReport {
            dry_run,
            ..Default::default()
        };

        for mut question in self.store.list_all_questions().await? {
            report.examined += 1;
            let key = self.hash_key(&question.topic_id).await?;
            let fresh = compute_content_hash(&question, &key);
            if question.content_hash.as_deref() == Some(fresh.as_str()) {
                continue;
            }

            report.changed_question_ids.push(question.id.clone());
            if !dry_run {
                question.content_hash = Some(fresh);
                self.store.put_question(&question).await?;
            }
        }

        log_service_success!(
            "bank_service",
            "rehash_questions",
            format!("{} of {} hashes changed", report.changed_question_ids.len(), report.examined)
        );
        Ok(report)
    }

    // PDF anchors
    pub async fn create_pdf_anchor(&self, subject_id: &str, request: CreatePdfAnchorRequest) -> BankResult<PdfAnchor> {
        let context = || ErrorContext::new("create_pdf_anchor", "pdf_anchor");

        if self.store.get_subject(subject_id).await?.is_none() {
            return Err(BankError::NotFound(format!("subject '{}'", subject_id)).log_with_context(context()));
        }
        if request.pdf_id.trim().is_empty() {
            return Err(BankError::Validation("pdfId is empty".to_string()).log_with_context(context()));
        }
        if let Some(topic_id) = &request.topic_id {
            self.subject_topic(subject_id, topic_id)
                .await
                .map_err(|e| e.log_with_context(context()))?;
        }

        let anchor = PdfAnchor {
            id: new_id(),
            subject_id: subject_id.to_string(),
            topic_id: request.topic_id,
            pdf_id: request.pdf_id,
            page: request.page,
            label: request.label,
            created_at: Utc::now(),
        };
        self.store.put_pdf_anchor(&anchor).await?;
        Ok(anchor)
    }

    pub async fn list_pdf_anchors(&self, subject_id: &str) -> BankResult<Vec<PdfAnchor>> {
        let anchors = self.store.list_pdf_anchors().await?;
        Ok(anchors.into_iter().filter(|a| a.subject_id == subject_id).collect())
    }

    async fn subject_topic(&self, subject_id: &str, topic_id: &str) -> BankResult<Topic> {
        match self.store.get_topic(topic_id).await? {
            Some(topic) if topic.subject_id == subject_id => Ok(topic),
            Some(_) => Err(BankError::Resolution(format!(
                "topic '{}' belongs to another subject",
                topic_id
            ))),
            None => Err(BankError::NotFound(format!("topic '{}'", topic_id))),
        }
    }

    /// Validates extra topics and returns them with the primary topic first.
    async fn collect_topic_ids(&self, subject_id: &str, primary: &str, ids: Vec<String>) -> BankResult<Vec<String>> {
        let mut collected = vec![primary.to_string()];
        for id in ids {
            if collected.contains(&id) {
                continue;
            }
            self.subject_topic(subject_id, &id).await?;
            collected.push(id);
        }
        Ok(collected)
    }

    async fn hash_key(&self, topic_id: &str) -> BankResult<String> {
        match self.store.get_topic(topic_id).await? {
            Some(topic) => Ok(slugify(&topic.title)),
            None => {
                log_service_warn!(
                    "bank_service",
                    "hash_key",
                    format!("topic {} no longer exists, hashing with an empty topic key", topic_id)
                );
                Ok(String::new())
            }
        }
    }
}

fn ensure_topic_slug_free(siblings: &[Topic], title: &str, except_id: Option<&str>) -> BankResult<()> {
    let slug = slugify(title);
    if slug.is_empty() {
        return Err(BankError::Validation(format!("topic title '{}' has an empty slug", title)));
    }
    if siblings
        .iter()
        .any(|t| Some(t.id.as_str()) != except_id && slugify(&t.title) == slug)
    {
        return Err(BankError::Duplicate(format!("a topic with slug '{}' already exists in this subject", slug)));
    }
    Ok(())
}

fn validate_content(prompt: &str, payload: &QuestionPayload) -> BankResult<()> {
    if prompt.trim().is_empty() {
        return Err(BankError::Validation("prompt is empty".to_string()));
    }
    payload.validate().map_err(BankError::Validation)
}
