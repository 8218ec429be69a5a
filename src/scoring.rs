use std::collections::HashSet;

use crate::models::{AnswerResult, ClozeBlank, Question, QuestionPayload, UserAnswer};
use crate::normalize::normalize_text;

/// Multiple choice: the selected set must equal the correct set exactly.
pub fn score_test(correct_option_ids: &[String], answer: &UserAnswer) -> AnswerResult {
    let correct: HashSet<&str> = correct_option_ids.iter().map(String::as_str).collect();
    let selected: HashSet<&str> = answer
        .selected_option_ids
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .map(String::as_str)
        .collect();

    if correct == selected {
        AnswerResult::Correct
    } else {
        AnswerResult::Wrong
    }
}

/// Cloze: every blank must match one of its accepted answers after
/// normalization. One miss fails the whole question.
pub fn score_completar(blanks: &[ClozeBlank], answer: &UserAnswer) -> AnswerResult {
    let all_match = blanks.iter().all(|blank| {
        let input = answer
            .blank_answers
            .as_ref()
            .and_then(|inputs| inputs.get(&blank.id))
            .map(|s| normalize_text(s, true))
            .unwrap_or_default();

        blank.accepted.iter().any(|accepted| normalize_text(accepted, true) == input)
    });

    if all_match {
        AnswerResult::Correct
    } else {
        AnswerResult::Wrong
    }
}

/// Scores an answer. Free-text types are never auto-graded: their result is
/// whatever manual grade the answer carries, `None` meaning ungraded.
pub fn score_answer(question: &Question, answer: &UserAnswer) -> Option<AnswerResult> {
    match &question.payload {
        QuestionPayload::Test { correct_option_ids, .. } => Some(score_test(correct_option_ids, answer)),
        QuestionPayload::Completar { blanks, .. } => Some(score_completar(blanks, answer)),
        QuestionPayload::Desarrollo { .. } | QuestionPayload::Practico { .. } => answer.manual_result,
    }
}

/// Grading hint: how many keywords occur in the free text.
pub fn keyword_match_count(question: &Question, free_text: &str) -> usize {
    let text = normalize_text(free_text, true);

    question
        .payload
        .keywords()
        .iter()
        .map(|k| normalize_text(k, true))
        .filter(|k| !k.is_empty() && text.contains(k.as_str()))
        .count()
}
