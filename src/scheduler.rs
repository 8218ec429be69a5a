use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::{AnswerResult, Question, QuestionStats};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSchedule {
    pub ease_factor: f64,
    pub interval: u32,
    pub repetitions: u32,
    pub next_review_at: NaiveDate,
}

/// SM-2 scheduler with a binary quality score (5 for correct, 0 for wrong).
#[derive(Debug, Clone)]
pub struct ReviewScheduler {
    initial_ease: f64,
    minimum_ease: f64,
}

impl Default for ReviewScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewScheduler {
    pub fn new() -> Self {
        Self {
            initial_ease: 2.5,
            minimum_ease: 1.3,
        }
    }

    pub fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    pub fn calc_next_review(&self, current: &QuestionStats, result: AnswerResult, today: NaiveDate) -> ReviewSchedule {
        let quality: f64 = match result {
            AnswerResult::Correct => 5.0,
            AnswerResult::Wrong => 0.0,
        };

        let ease = current.ease_factor.unwrap_or(self.initial_ease);
        let miss = 5.0 - quality;
        let ease_factor = (ease + (0.1 - miss * (0.08 + miss * 0.02))).max(self.minimum_ease);

        let (interval, repetitions) = if quality < 3.0 {
            (1, 0)
        } else {
            let repetitions = current.repetitions.unwrap_or(0) + 1;
            let interval = match repetitions {
                1 => 1,
                2 => 6,
                _ => {
                    let previous = current.interval.unwrap_or(1) as f64;
                    (previous * ease_factor).round().max(1.0) as u32
                }
            };
            (interval, repetitions)
        };

        ReviewSchedule {
            ease_factor,
            interval,
            repetitions,
            next_review_at: today + Duration::days(interval as i64),
        }
    }

    /// Applies a schedule to the stats it was computed from.
    pub fn apply(stats: &mut QuestionStats, schedule: &ReviewSchedule) {
        stats.ease_factor = Some(schedule.ease_factor);
        stats.interval = Some(schedule.interval);
        stats.repetitions = Some(schedule.repetitions);
        stats.next_review_at = Some(schedule.next_review_at);
    }

    pub fn is_due(stats: &QuestionStats, today: NaiveDate) -> bool {
        stats.next_review_at.is_none_or(|date| date <= today)
    }

    /// Stable ordering: overdue questions (due today or earlier, or never
    /// scheduled) first, then future ones, each group by ascending date.
    /// Unscheduled questions count as the most overdue.
    pub fn sort_by_priority(&self, questions: &mut [Question], today: NaiveDate) {
        questions.sort_by_key(|q| {
            let due = q.stats.next_review_at.unwrap_or(NaiveDate::MIN);
            (due > today, due)
        });
    }
}
