use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The eight quiz flavors. Each is a policy configuration over the same
/// sectioned-session state machine; the document shape never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizMode {
    Random,
    Timed,
    Mock,
    Missed,
    Flagged,
    Personalized,
    PreviousYear,
    Daily,
}

impl QuizMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizMode::Random => "random",
            QuizMode::Timed => "timed",
            QuizMode::Mock => "mock",
            QuizMode::Missed => "missed",
            QuizMode::Flagged => "flagged",
            QuizMode::Personalized => "personalized",
            QuizMode::PreviousYear => "previous_year",
            QuizMode::Daily => "daily",
        }
    }

    /// How the pointer moves after a grade. Review modes restart the scan
    /// from the front so slots un-answered out of order are not skipped.
    pub fn advance_rule(&self) -> AdvanceRule {
        match self {
            QuizMode::Missed | QuizMode::Flagged => AdvanceRule::FirstPending,
            _ => AdvanceRule::NextPending,
        }
    }
}

impl std::str::FromStr for QuizMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(QuizMode::Random),
            "timed" => Ok(QuizMode::Timed),
            "mock" => Ok(QuizMode::Mock),
            "missed" => Ok(QuizMode::Missed),
            "flagged" => Ok(QuizMode::Flagged),
            "personalized" => Ok(QuizMode::Personalized),
            "previous_year" | "previous-year" => Ok(QuizMode::PreviousYear),
            "daily" => Ok(QuizMode::Daily),
            other => Err(AppError::Validation(format!("Unknown quiz mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceRule {
    /// Scan forward from the slot just graded, wrapping once.
    NextPending,
    /// Scan from the first section regardless of where the grade landed.
    FirstPending,
}

/// Uniqueness key for active sessions: at most one `is_active` session may
/// exist per key at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: String,
    pub mode: QuizMode,
    pub subject: String,
    pub syllabus: String,
    pub standard: String,
}

/// Reference from a slot into the question bank. Previous-year sessions
/// point into a paper's embedded question list instead of a bank document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotRef {
    Bank { question_id: ObjectId },
    Paper { paper_id: ObjectId, question_index: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    Correct,
    Incorrect,
}

/// One question's progress state within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub question: SlotRef,
    /// 1-based order within the owning section, assigned at creation.
    pub number: u32,
    pub status: SlotStatus,
    pub attempts: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::bson_datetime_as_chrono_option"
    )]
    pub answered_at: Option<DateTime<Utc>>,
}

impl Slot {
    pub fn new(question: SlotRef, number: u32) -> Self {
        Self {
            question,
            number,
            status: SlotStatus::Pending,
            attempts: 0,
            answered_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub time_limit_seconds: u32,
    pub slots: Vec<Slot>,
}

impl Section {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self {
            topic: None,
            time_limit_seconds: 0,
            slots,
        }
    }
}

/// Pointer to the slot the user should answer next. `None` on the session
/// is the completed sentinel; while the session is live the pointer always
/// resolves to a pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPosition {
    pub section: u32,
    pub slot: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub completed_questions: u32,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub status: ProgressStatus,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            completed_questions: 0,
            correct_answers: 0,
            wrong_answers: 0,
            status: ProgressStatus::NotStarted,
        }
    }
}

/// Outcome of a single grade transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeOutcome {
    /// Pointer moved to the next pending slot.
    Advanced,
    /// Every slot is answered; the session was finalized.
    Completed,
    /// The configured wrong-answer limit was hit; the session was cut off
    /// early. An expected terminal result, not a failure.
    WrongLimitReached,
}

/// Session document stored in the `quiz_sessions` collection.
///
/// Invariants held between store round trips:
/// - `progress.completed_questions == correct_answers + wrong_answers`
///   and equals the number of non-pending slots across all sections;
/// - while not completed, `current` points at a pending slot;
/// - once completed, `current` is `None` and `is_active` is false;
/// - at most one active document exists per [`SessionKey`] (enforced by a
///   partial unique index, see the session store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionedSession {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: String,
    pub mode: QuizMode,
    pub subject: String,
    pub syllabus: String,
    pub standard: String,
    pub sections: Vec<Section>,
    pub current: Option<SlotPosition>,
    pub progress: Progress,
    pub is_active: bool,
    /// 0 disables the cutoff. Only the timed mode sets it.
    #[serde(default)]
    pub wrong_answers_limit: u32,
    #[serde(default)]
    pub time_limit_minutes: u32,
    /// Optimistic-concurrency stamp, checked and bumped on every update.
    #[serde(default)]
    pub version: i64,
    #[serde(with = "super::bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "super::bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl SectionedSession {
    pub fn new(key: SessionKey, sections: Vec<Section>, now: DateTime<Utc>) -> Self {
        let current = sections
            .iter()
            .position(|s| !s.slots.is_empty())
            .map(|section| SlotPosition {
                section: section as u32,
                slot: 0,
            });

        Self {
            id: None,
            user_id: key.user_id,
            mode: key.mode,
            subject: key.subject,
            syllabus: key.syllabus,
            standard: key.standard,
            sections,
            current,
            progress: Progress::default(),
            is_active: true,
            wrong_answers_limit: 0,
            time_limit_minutes: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            user_id: self.user_id.clone(),
            mode: self.mode,
            subject: self.subject.clone(),
            syllabus: self.syllabus.clone(),
            standard: self.standard.clone(),
        }
    }

    pub fn total_slots(&self) -> usize {
        self.sections.iter().map(|s| s.slots.len()).sum()
    }

    pub fn slot_at(&self, pos: SlotPosition) -> Option<&Slot> {
        self.sections
            .get(pos.section as usize)
            .and_then(|s| s.slots.get(pos.slot as usize))
    }

    pub fn iter_slots(&self) -> impl Iterator<Item = (SlotPosition, &Slot)> {
        self.sections.iter().enumerate().flat_map(|(si, section)| {
            section.slots.iter().enumerate().map(move |(qi, slot)| {
                (
                    SlotPosition {
                        section: si as u32,
                        slot: qi as u32,
                    },
                    slot,
                )
            })
        })
    }

    /// Locate the slot holding `question`: pointer first (fast path), then
    /// a full scan across all sections. Clients may answer out of pointer
    /// order, or the pointer may have drifted from a stale client view.
    pub fn locate(&self, question: &SlotRef) -> Option<SlotPosition> {
        if let Some(pos) = self.current {
            if let Some(slot) = self.slot_at(pos) {
                if &slot.question == question {
                    return Some(pos);
                }
            }
        }
        self.iter_slots()
            .find(|(_, slot)| &slot.question == question)
            .map(|(pos, _)| pos)
    }

    /// The state-machine transition: mutate the targeted slot, keep the
    /// aggregate counters in step, apply the wrong-answer cutoff, and move
    /// the pointer. Callers persist the document afterwards.
    pub fn grade(
        &mut self,
        question: &SlotRef,
        is_correct: bool,
        now: DateTime<Utc>,
    ) -> Result<GradeOutcome, AppError> {
        if !self.is_active {
            return Err(AppError::SessionInactive);
        }

        let pos = self.locate(question).ok_or(AppError::SlotNotFound)?;
        let slot = &mut self.sections[pos.section as usize].slots[pos.slot as usize];
        let previous = slot.status;

        slot.status = if is_correct {
            SlotStatus::Correct
        } else {
            SlotStatus::Incorrect
        };
        slot.attempts += 1;
        slot.answered_at = Some(now);

        // Counters track slot states, not grade calls, so re-grading an
        // already-answered slot moves a verdict between buckets instead of
        // inflating completed_questions past the slot count.
        match (previous, is_correct) {
            (SlotStatus::Pending, true) => {
                self.progress.completed_questions += 1;
                self.progress.correct_answers += 1;
            }
            (SlotStatus::Pending, false) => {
                self.progress.completed_questions += 1;
                self.progress.wrong_answers += 1;
            }
            (SlotStatus::Correct, false) => {
                self.progress.correct_answers -= 1;
                self.progress.wrong_answers += 1;
            }
            (SlotStatus::Incorrect, true) => {
                self.progress.wrong_answers -= 1;
                self.progress.correct_answers += 1;
            }
            _ => {}
        }

        self.updated_at = now;

        if self.wrong_answers_limit > 0 && self.progress.wrong_answers >= self.wrong_answers_limit
        {
            self.finalize();
            return Ok(GradeOutcome::WrongLimitReached);
        }

        match self.next_pending(pos) {
            Some(next) => {
                self.current = Some(next);
                self.progress.status = ProgressStatus::InProgress;
                Ok(GradeOutcome::Advanced)
            }
            None => {
                self.finalize();
                Ok(GradeOutcome::Completed)
            }
        }
    }

    /// Next pending slot per the mode's advance rule, or `None` when the
    /// session is exhausted.
    fn next_pending(&self, graded: SlotPosition) -> Option<SlotPosition> {
        let positions: Vec<SlotPosition> = self
            .iter_slots()
            .filter(|(_, slot)| slot.status == SlotStatus::Pending)
            .map(|(pos, _)| pos)
            .collect();

        if positions.is_empty() {
            return None;
        }

        match self.mode.advance_rule() {
            AdvanceRule::FirstPending => positions.first().copied(),
            AdvanceRule::NextPending => positions
                .iter()
                .find(|pos| {
                    (pos.section, pos.slot) > (graded.section, graded.slot)
                })
                .or_else(|| positions.first())
                .copied(),
        }
    }

    fn finalize(&mut self) {
        self.progress.status = ProgressStatus::Completed;
        self.is_active = false;
        self.current = None;
    }

    /// Append a slot to the single-section review sessions (flagged).
    /// Returns false if the question is already present.
    pub fn push_slot(&mut self, question: SlotRef, now: DateTime<Utc>) -> bool {
        if self.iter_slots().any(|(_, s)| s.question == question) {
            return false;
        }
        if self.sections.is_empty() {
            self.sections.push(Section::new(Vec::new()));
        }
        let section = &mut self.sections[0];
        let number = section.slots.len() as u32 + 1;
        section.slots.push(Slot::new(question, number));

        if self.current.is_none() {
            self.current = Some(SlotPosition {
                section: 0,
                slot: section.slots.len() as u32 - 1,
            });
        }
        self.is_active = true;
        if self.progress.status == ProgressStatus::Completed {
            self.progress.status = ProgressStatus::InProgress;
        }
        self.updated_at = now;
        true
    }

    /// Remove a slot from the single-section review sessions (unflag).
    /// Remaining slots are renumbered; an emptied session is deactivated.
    pub fn remove_slot(&mut self, question: &SlotRef, now: DateTime<Utc>) -> Result<(), AppError> {
        let pos = self
            .iter_slots()
            .find(|(_, s)| &s.question == question)
            .map(|(pos, _)| pos)
            .ok_or(AppError::SlotNotFound)?;

        let section = &mut self.sections[pos.section as usize];
        let removed = section.slots.remove(pos.slot as usize);
        for (i, slot) in section.slots.iter_mut().enumerate() {
            slot.number = i as u32 + 1;
        }

        if removed.status != SlotStatus::Pending {
            self.progress.completed_questions -= 1;
            match removed.status {
                SlotStatus::Correct => self.progress.correct_answers -= 1,
                SlotStatus::Incorrect => self.progress.wrong_answers -= 1,
                SlotStatus::Pending => {}
            }
        }

        if self.total_slots() == 0 {
            self.is_active = false;
            self.current = None;
            self.progress.status = ProgressStatus::NotStarted;
        } else {
            let next = self
                .iter_slots()
                .find(|(_, s)| s.status == SlotStatus::Pending)
                .map(|(p, _)| p);
            self.current = next;
            if self.current.is_none() {
                self.finalize();
            }
        }
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_ref(n: u8) -> SlotRef {
        SlotRef::Bank {
            question_id: ObjectId::from_bytes([n; 12]),
        }
    }

    fn key(mode: QuizMode) -> SessionKey {
        SessionKey {
            user_id: "student-1".into(),
            mode,
            subject: "Physics".into(),
            syllabus: "CBSE".into(),
            standard: "12".into(),
        }
    }

    fn session(mode: QuizMode, sections: &[usize]) -> SectionedSession {
        let mut n = 0u8;
        let sections = sections
            .iter()
            .map(|count| {
                Section::new(
                    (0..*count)
                        .map(|i| {
                            n += 1;
                            Slot::new(bank_ref(n), i as u32 + 1)
                        })
                        .collect(),
                )
            })
            .collect();
        SectionedSession::new(key(mode), sections, Utc::now())
    }

    fn assert_counters_consistent(s: &SectionedSession) {
        let answered = s
            .iter_slots()
            .filter(|(_, slot)| slot.status != SlotStatus::Pending)
            .count() as u32;
        assert_eq!(s.progress.completed_questions, answered);
        assert_eq!(
            s.progress.completed_questions,
            s.progress.correct_answers + s.progress.wrong_answers
        );
    }

    #[test]
    fn new_session_points_at_first_slot() {
        let s = session(QuizMode::Random, &[10, 10, 10]);
        assert_eq!(s.total_slots(), 30);
        assert_eq!(s.current, Some(SlotPosition { section: 0, slot: 0 }));
        assert_eq!(s.progress.status, ProgressStatus::NotStarted);
        assert_eq!(s.progress.completed_questions, 0);
        assert!(s.is_active);
    }

    #[test]
    fn correct_grade_advances_pointer_and_counters() {
        let mut s = session(QuizMode::Random, &[10, 10, 10]);
        let outcome = s.grade(&bank_ref(1), true, Utc::now()).unwrap();

        assert_eq!(outcome, GradeOutcome::Advanced);
        assert_eq!(s.progress.correct_answers, 1);
        assert_eq!(s.progress.completed_questions, 1);
        assert_eq!(s.progress.wrong_answers, 0);
        assert_eq!(s.progress.status, ProgressStatus::InProgress);
        assert_eq!(s.current, Some(SlotPosition { section: 0, slot: 1 }));
        assert_counters_consistent(&s);
    }

    #[test]
    fn pointer_crosses_section_boundary() {
        let mut s = session(QuizMode::Random, &[2, 2]);
        s.grade(&bank_ref(1), true, Utc::now()).unwrap();
        s.grade(&bank_ref(2), false, Utc::now()).unwrap();
        assert_eq!(s.current, Some(SlotPosition { section: 1, slot: 0 }));
        assert_counters_consistent(&s);
    }

    #[test]
    fn grading_last_slot_completes_session() {
        let mut s = session(QuizMode::Random, &[10, 10, 10]);
        for n in 1..=30u8 {
            s.grade(&bank_ref(n), true, Utc::now()).unwrap();
        }
        assert_eq!(s.progress.status, ProgressStatus::Completed);
        assert!(!s.is_active);
        assert!(s.current.is_none());
        assert_eq!(s.progress.correct_answers, 30);
        assert_counters_consistent(&s);
    }

    #[test]
    fn wrong_answer_limit_cuts_session_short() {
        let mut s = session(QuizMode::Timed, &[10, 10]);
        s.wrong_answers_limit = 3;

        assert_eq!(
            s.grade(&bank_ref(1), false, Utc::now()).unwrap(),
            GradeOutcome::Advanced
        );
        assert_eq!(
            s.grade(&bank_ref(2), false, Utc::now()).unwrap(),
            GradeOutcome::Advanced
        );
        let outcome = s.grade(&bank_ref(3), false, Utc::now()).unwrap();

        assert_eq!(outcome, GradeOutcome::WrongLimitReached);
        assert_eq!(s.progress.wrong_answers, 3);
        assert!(!s.is_active);
        assert!(s.current.is_none());
        assert_eq!(s.progress.status, ProgressStatus::Completed);
        assert_counters_consistent(&s);
    }

    #[test]
    fn out_of_order_answer_uses_full_scan() {
        let mut s = session(QuizMode::Random, &[3]);
        // Answer the third slot while the pointer sits on the first.
        s.grade(&bank_ref(3), true, Utc::now()).unwrap();
        // Pointer wraps to the earliest pending slot.
        assert_eq!(s.current, Some(SlotPosition { section: 0, slot: 0 }));

        s.grade(&bank_ref(1), true, Utc::now()).unwrap();
        assert_eq!(s.current, Some(SlotPosition { section: 0, slot: 1 }));
        assert_counters_consistent(&s);
    }

    #[test]
    fn pointer_always_rests_on_pending_slot() {
        let mut s = session(QuizMode::Random, &[2, 2]);
        s.grade(&bank_ref(2), true, Utc::now()).unwrap();
        s.grade(&bank_ref(3), false, Utc::now()).unwrap();

        let pos = s.current.unwrap();
        assert_eq!(s.slot_at(pos).unwrap().status, SlotStatus::Pending);
        assert_counters_consistent(&s);
    }

    #[test]
    fn regrade_increments_attempts_without_double_counting() {
        let mut s = session(QuizMode::Random, &[2]);
        s.grade(&bank_ref(1), false, Utc::now()).unwrap();
        s.grade(&bank_ref(1), true, Utc::now()).unwrap();

        let slot = s.slot_at(SlotPosition { section: 0, slot: 0 }).unwrap();
        assert_eq!(slot.attempts, 2);
        assert_eq!(slot.status, SlotStatus::Correct);
        assert_eq!(s.progress.completed_questions, 1);
        assert_eq!(s.progress.correct_answers, 1);
        assert_eq!(s.progress.wrong_answers, 0);
        assert_counters_consistent(&s);
    }

    #[test]
    fn grading_inactive_session_is_rejected() {
        let mut s = session(QuizMode::Random, &[1]);
        s.grade(&bank_ref(1), true, Utc::now()).unwrap();
        assert!(!s.is_active);

        let err = s.grade(&bank_ref(1), true, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::SessionInactive));
    }

    #[test]
    fn unknown_question_is_rejected() {
        let mut s = session(QuizMode::Random, &[2]);
        let err = s.grade(&bank_ref(99), true, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::SlotNotFound));
    }

    #[test]
    fn review_modes_scan_from_front() {
        let mut s = session(QuizMode::Flagged, &[3]);
        s.grade(&bank_ref(2), true, Utc::now()).unwrap();
        // FirstPending rule lands on slot 1, not slot 3.
        assert_eq!(s.current, Some(SlotPosition { section: 0, slot: 0 }));
    }

    #[test]
    fn flagging_appends_and_activates() {
        let mut s = SectionedSession::new(key(QuizMode::Flagged), vec![], Utc::now());
        assert!(s.push_slot(bank_ref(1), Utc::now()));
        assert!(s.push_slot(bank_ref(2), Utc::now()));
        // Duplicate flag is a no-op.
        assert!(!s.push_slot(bank_ref(1), Utc::now()));

        assert_eq!(s.total_slots(), 2);
        assert_eq!(s.current, Some(SlotPosition { section: 0, slot: 0 }));
        assert_eq!(s.sections[0].slots[1].number, 2);
    }

    #[test]
    fn unflagging_renumbers_and_deactivates_when_empty() {
        let mut s = SectionedSession::new(key(QuizMode::Flagged), vec![], Utc::now());
        s.push_slot(bank_ref(1), Utc::now());
        s.push_slot(bank_ref(2), Utc::now());
        s.push_slot(bank_ref(3), Utc::now());

        s.remove_slot(&bank_ref(1), Utc::now()).unwrap();
        assert_eq!(s.sections[0].slots[0].number, 1);
        assert_eq!(s.sections[0].slots[0].question, bank_ref(2));

        s.remove_slot(&bank_ref(2), Utc::now()).unwrap();
        s.remove_slot(&bank_ref(3), Utc::now()).unwrap();
        assert!(!s.is_active);
        assert!(s.current.is_none());
        assert_eq!(s.progress.status, ProgressStatus::NotStarted);
    }
}
