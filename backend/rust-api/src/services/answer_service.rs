use chrono::Utc;

use crate::error::AppError;
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, QUIZ_SESSIONS_ACTIVE, QUIZ_SESSIONS_TOTAL};
use crate::models::{GradeOutcome, GradeResult, QuizMode, SessionKey, SlotRef};
use crate::services::question_pool::QuestionBank;
use crate::services::session_store::SessionStore;

/// How many times a losing writer re-reads and re-applies before giving
/// up with a conflict the client can retry.
const CONFLICT_RETRIES: usize = 3;

/// Executes the grade transition against the persisted session: resolve
/// the canonical answer, apply the pure state-machine step, write back
/// under the optimistic version check.
pub struct AnswerGrader<B, S> {
    bank: B,
    store: S,
}

impl<B: QuestionBank, S: SessionStore> AnswerGrader<B, S> {
    pub fn new(bank: B, store: S) -> Self {
        Self { bank, store }
    }

    pub async fn grade(
        &self,
        key: &SessionKey,
        question: &SlotRef,
        submitted: &str,
    ) -> Result<GradeResult, AppError> {
        let canonical = self.bank.correct_answer(question).await?;
        let is_correct = answers_match(submitted, &canonical);

        let mut retries = CONFLICT_RETRIES;
        loop {
            // Re-read inside the loop: a lost version check means another
            // submission landed first, and its transition must be visible
            // before this one re-applies.
            let mut session = self
                .store
                .find_latest(key)
                .await?
                .ok_or(AppError::NotFound("Session"))?;

            let outcome = session.grade(question, is_correct, Utc::now())?;

            match self.store.update(&mut session).await {
                Ok(()) => {
                    record_metrics(key.mode, is_correct, outcome);
                    tracing::info!(
                        user_id = %key.user_id,
                        mode = key.mode.as_str(),
                        is_correct,
                        outcome = ?outcome,
                        completed = session.progress.completed_questions,
                        "Answer graded"
                    );
                    return Ok(GradeResult {
                        is_correct,
                        correct_answer: (!is_correct).then(|| canonical.clone()),
                        outcome,
                        progress: session.progress.clone(),
                        current: session.current,
                    });
                }
                Err(AppError::Conflict) if retries > 0 => {
                    retries -= 1;
                    tracing::debug!(
                        user_id = %key.user_id,
                        retries_left = retries,
                        "Concurrent session write detected, re-applying grade"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// The sole correctness rule across all modes: case-insensitive,
/// whitespace-trimmed string equality. No partial credit, no fuzziness.
/// Presentation-side option normalization never feeds this path.
pub fn answers_match(submitted: &str, canonical: &str) -> bool {
    submitted.trim().to_lowercase() == canonical.trim().to_lowercase()
}

fn record_metrics(mode: QuizMode, is_correct: bool, outcome: GradeOutcome) {
    let correct_label = if is_correct { "true" } else { "false" };
    ANSWERS_SUBMITTED_TOTAL
        .with_label_values(&[mode.as_str(), correct_label])
        .inc();
    match outcome {
        GradeOutcome::Completed => {
            QUIZ_SESSIONS_TOTAL
                .with_label_values(&[mode.as_str(), "completed"])
                .inc();
            QUIZ_SESSIONS_ACTIVE.dec();
        }
        GradeOutcome::WrongLimitReached => {
            QUIZ_SESSIONS_TOTAL
                .with_label_values(&[mode.as_str(), "cut_off"])
                .inc();
            QUIZ_SESSIONS_ACTIVE.dec();
        }
        GradeOutcome::Advanced => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_ignores_case_and_whitespace() {
        assert!(answers_match("  Photosynthesis ", "photosynthesis"));
        assert!(answers_match("42", " 42"));
        assert!(!answers_match("chlorophyll", "chloroplast"));
    }

    #[test]
    fn matching_never_fuzzes() {
        assert!(!answers_match("photosynthesi", "photosynthesis"));
        assert!(!answers_match("", "a"));
    }
}
