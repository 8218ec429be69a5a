use chrono::{NaiveDate, Utc};
use std::sync::Arc;

use crate::errors::{BankError, BankResult, ErrorContext};
use crate::models::*;
use crate::scheduler::ReviewScheduler;
use crate::scoring::{keyword_match_count, score_answer};
use crate::store::EntityStore;
use crate::{log_service_start, log_service_success, log_service_warn};

#[derive(Clone)]
pub struct PracticeService {
    store: Arc<dyn EntityStore>,
    scheduler: ReviewScheduler,
}

impl PracticeService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            scheduler: ReviewScheduler::new(),
        }
    }

    // Session operations
    pub async fn start_session(&self, request: StartSessionRequest) -> BankResult<PracticeSession> {
        self.start_session_on(request, ReviewScheduler::today()).await
    }

    pub async fn start_session_on(&self, request: StartSessionRequest, today: NaiveDate) -> BankResult<PracticeSession> {
        log_service_start!("practice_service", "start_session", subject_id = request.subject_id);

        if self.store.get_subject(&request.subject_id).await?.is_none() {
            return Err(BankError::NotFound(format!("subject '{}'", request.subject_id))
                .log_with_context(ErrorContext::new("start_session", "practice_session")));
        }

        let mut questions = self.store.list_questions(&request.subject_id).await?;
        if let Some(topic_id) = &request.topic_id {
            questions.retain(|q| q.belongs_to_topic(topic_id));
        }

        self.scheduler.sort_by_priority(&mut questions, today);
        if request.due_only {
            questions.retain(|q| ReviewScheduler::is_due(&q.stats, today));
        }
        if let Some(limit) = request.limit {
            questions.truncate(limit);
        }

        let session = PracticeSession {
            id: new_id(),
            subject_id: request.subject_id,
            question_ids: questions.into_iter().map(|q| q.id).collect(),
            answers: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        };
        self.store.put_session(&session).await?;

        log_service_success!(
            "practice_service",
            "start_session",
            subject_id = session.subject_id,
            format!("session {} with {} questions", session.id, session.question_ids.len())
        );
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> BankResult<Option<PracticeSession>> {
        Ok(self.store.get_session(id).await?)
    }

    pub async fn finish_session(&self, id: &str) -> BankResult<Option<PracticeSession>> {
        let mut session = match self.store.get_session(id).await? {
            Some(session) => session,
            None => return Ok(None),
        };

        if session.finished_at.is_none() {
            session.finished_at = Some(Utc::now());
            self.store.put_session(&session).await?;
        }
        Ok(Some(session))
    }

    /// Questions of a subject that are due on `today`, most overdue first.
    pub async fn due_questions(&self, subject_id: &str, today: NaiveDate) -> BankResult<Vec<Question>> {
        let mut questions = self.store.list_questions(subject_id).await?;
        self.scheduler.sort_by_priority(&mut questions, today);
        questions.retain(|q| ReviewScheduler::is_due(&q.stats, today));
        Ok(questions)
    }

    // Answer operations
    pub async fn submit_answer(&self, session_id: &str, answer: UserAnswer) -> BankResult<Option<AnswerOutcome>> {
        self.submit_answer_on(session_id, answer, ReviewScheduler::today()).await
    }

    /// Scores the answer and updates the question's stats. Free-text types
    /// stay ungraded unless the answer carries a manual result.
    pub async fn submit_answer_on(
        &self,
        session_id: &str,
        mut answer: UserAnswer,
        today: NaiveDate,
    ) -> BankResult<Option<AnswerOutcome>> {
        log_service_start!("practice_service", "submit_answer", question_id = answer.question_id);

        let mut session = match self.store.get_session(session_id).await? {
            Some(session) => session,
            None => return Ok(None),
        };
        if !session.question_ids.contains(&answer.question_id) {
            log_service_warn!(
                "practice_service",
                "submit_answer",
                format!("question {} is not part of session {}", answer.question_id, session_id)
            );
            return Ok(None);
        }
        let mut question = match self.store.get_question(&answer.question_id).await? {
            Some(question) => question,
            None => return Ok(None),
        };

        let result = score_answer(&question, &answer);
        let keyword_hits = match (&answer.free_text, question.payload.keywords().is_empty()) {
            (Some(text), false) => Some(keyword_match_count(&question, text)),
            _ => None,
        };

        let now = Utc::now();
        question.stats.seen += 1;
        question.stats.last_seen_at = Some(now);
        if let Some(result) = result {
            self.apply_result(&mut question.stats, result, today);
        }
        question.updated_at = now;

        answer.result = result;
        answer.answered_at = Some(now);
        session.record_answer(answer);

        self.store.put_question(&question).await?;
        self.store.put_session(&session).await?;

        Ok(Some(AnswerOutcome {
            result,
            keyword_hits,
            stats: question.stats,
        }))
    }

    pub async fn grade_answer(
        &self,
        session_id: &str,
        question_id: &str,
        result: AnswerResult,
    ) -> BankResult<Option<AnswerOutcome>> {
        self.grade_answer_on(session_id, question_id, result, ReviewScheduler::today())
            .await
    }

    /// Records a manual grade for an answer that was submitted ungraded.
    /// `seen` was already counted at submission.
    pub async fn grade_answer_on(
        &self,
        session_id: &str,
        question_id: &str,
        result: AnswerResult,
        today: NaiveDate,
    ) -> BankResult<Option<AnswerOutcome>> {
        let mut session = match self.store.get_session(session_id).await? {
            Some(session) => session,
            None => return Ok(None),
        };
        let Some(mut answer) = session.answer_for(question_id).cloned() else {
            return Ok(None);
        };
        if answer.result.is_some() {
            return Err(BankError::Validation(format!("answer to question {} is already graded", question_id))
                .log_with_context(ErrorContext::new("grade_answer", "user_answer").with_id(question_id)));
        }
        let mut question = match self.store.get_question(question_id).await? {
            Some(question) => question,
            None => return Ok(None),
        };

        self.apply_result(&mut question.stats, result, today);
        question.updated_at = Utc::now();

        answer.manual_result = Some(result);
        answer.result = Some(result);
        session.record_answer(answer);

        self.store.put_question(&question).await?;
        self.store.put_session(&session).await?;

        Ok(Some(AnswerOutcome {
            result: Some(result),
            keyword_hits: None,
            stats: question.stats,
        }))
    }

    fn apply_result(&self, stats: &mut QuestionStats, result: AnswerResult, today: NaiveDate) {
        match result {
            AnswerResult::Correct => stats.correct += 1,
            AnswerResult::Wrong => stats.wrong += 1,
        }
        stats.last_result = Some(result);

        let schedule = self.scheduler.calc_next_review(stats, result, today);
        ReviewScheduler::apply(stats, &schedule);
    }
}
