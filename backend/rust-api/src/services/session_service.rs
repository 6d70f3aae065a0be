use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use rand::seq::SliceRandom;
use std::collections::HashSet;

use crate::error::AppError;
use crate::metrics::{QUIZ_SESSIONS_ACTIVE, QUIZ_SESSIONS_TOTAL};
use crate::models::{
    GenerateSessionRequest, QuizMode, Section, SectionedSession, SessionKey, Slot, SlotRef,
    SlotStatus, SourceDistribution,
};
use crate::services::question_pool::{PaperCriteria, PoolCriteria, QuestionBank};
use crate::services::session_store::{sessions_excluding_mode, SessionStore};

const QUESTIONS_PER_SECTION: usize = 10;
const SECONDS_PER_QUESTION: u32 = 30;
const MOCK_SECTION_MINUTES: u32 = 30;
const PERSONALIZED_MAX_QUESTIONS: u32 = 100;

/// Builds a new [`SectionedSession`] from a pool draw, partitioning into
/// sections per the mode's rule. Generation is resume-don't-duplicate:
/// an existing active session for the key is returned as-is.
pub struct SessionGenerator<B, S> {
    bank: B,
    store: S,
}

impl<B: QuestionBank, S: SessionStore> SessionGenerator<B, S> {
    pub fn new(bank: B, store: S) -> Self {
        Self { bank, store }
    }

    /// Returns the session and whether it was resumed rather than created.
    pub async fn generate(
        &self,
        user_id: &str,
        mode: QuizMode,
        req: GenerateSessionRequest,
    ) -> Result<(SectionedSession, bool), AppError> {
        let key = SessionKey {
            user_id: user_id.to_string(),
            mode,
            subject: req.subject.clone(),
            syllabus: req.syllabus.clone(),
            standard: req.standard.clone(),
        };

        // Missed review is rebuilt on every request: the missed set moves
        // as the user keeps practicing, so it replaces rather than
        // resumes.
        if mode == QuizMode::Missed {
            return self.rebuild_missed(&key, &req).await;
        }

        if let Some(existing) = self.store.find_active(&key).await? {
            tracing::info!(
                user_id,
                mode = mode.as_str(),
                subject = %key.subject,
                "Resuming existing active session"
            );
            QUIZ_SESSIONS_TOTAL
                .with_label_values(&[mode.as_str(), "resumed"])
                .inc();
            return Ok((existing, true));
        }

        let mut session = match mode {
            QuizMode::Random => self.build_random(&key, &req).await?,
            QuizMode::Timed => self.build_timed(&key, &req).await?,
            QuizMode::Mock => self.build_mock(&key, &req).await?,
            QuizMode::Missed => unreachable!("handled above"),
            QuizMode::Personalized => self.build_personalized(&key, &req).await?,
            QuizMode::PreviousYear => self.build_previous_year(&key, &req).await?,
            QuizMode::Daily => self.build_daily(&key, &req).await?,
            QuizMode::Flagged => {
                return Err(AppError::Validation(
                    "Flagged sessions are built by flagging questions, not generated".into(),
                ))
            }
        };

        match self.store.insert(&mut session).await {
            Ok(_) => {
                QUIZ_SESSIONS_TOTAL
                    .with_label_values(&[mode.as_str(), "created"])
                    .inc();
                QUIZ_SESSIONS_ACTIVE.inc();
                Ok((session, false))
            }
            // Lost the creation race against a concurrent request for the
            // same key; resume the winner instead of failing.
            Err(AppError::DuplicateActiveSession) => {
                let existing = self
                    .store
                    .find_active(&key)
                    .await?
                    .ok_or(AppError::Conflict)?;
                QUIZ_SESSIONS_TOTAL
                    .with_label_values(&[mode.as_str(), "resumed"])
                    .inc();
                Ok((existing, true))
            }
            Err(err) => Err(err),
        }
    }

    /// Random practice: three equal sections of `total_questions` each
    /// (default 10). Hard-fails when the pool cannot cover the draw.
    async fn build_random(
        &self,
        key: &SessionKey,
        req: &GenerateSessionRequest,
    ) -> Result<SectionedSession, AppError> {
        let per_section = req.total_questions.unwrap_or(QUESTIONS_PER_SECTION as u32) as usize;
        if per_section == 0 {
            return Err(AppError::Validation(
                "total_questions must be positive".into(),
            ));
        }
        let required = per_section * 3;
        let criteria = bank_criteria(req);

        let ids = self.sample_exactly(&criteria, required).await?;
        let sections = partition_chunks(bank_refs(ids), per_section);
        Ok(SectionedSession::new(key.clone(), sections, Utc::now()))
    }

    /// Timed challenge: 30 seconds per question, fixed-size sections, last
    /// one possibly partial; carries the wrong-answer cutoff.
    async fn build_timed(
        &self,
        key: &SessionKey,
        req: &GenerateSessionRequest,
    ) -> Result<SectionedSession, AppError> {
        let minutes = req
            .challenge_minutes
            .ok_or_else(|| AppError::Validation("challenge_minutes is required".into()))?;
        let total = (minutes * 60 / SECONDS_PER_QUESTION) as usize;
        if total == 0 {
            return Err(AppError::Validation(
                "challenge_minutes is too short for a single question".into(),
            ));
        }

        let criteria = bank_criteria(req);
        let ids = self.sample_exactly(&criteria, total).await?;

        let mut sections = partition_chunks(bank_refs(ids), QUESTIONS_PER_SECTION);
        let section_seconds = minutes * 60 / sections.len() as u32;
        for section in &mut sections {
            section.time_limit_seconds = section_seconds;
        }

        let mut session = SectionedSession::new(key.clone(), sections, Utc::now());
        session.time_limit_minutes = minutes;
        session.wrong_answers_limit = req.wrong_answers_limit.unwrap_or(0);
        Ok(session)
    }

    /// Mock battle: one section per requested topic, each capped at 10
    /// questions, 30 minutes per section.
    async fn build_mock(
        &self,
        key: &SessionKey,
        req: &GenerateSessionRequest,
    ) -> Result<SectionedSession, AppError> {
        if req.topics.is_empty() {
            return Err(AppError::Validation("topics list is required".into()));
        }

        let mut sections = Vec::new();
        for topic in &req.topics {
            let criteria = PoolCriteria {
                topics: vec![topic.clone()],
                ..bank_criteria(req)
            };
            let ids = self
                .bank
                .sample(&criteria, QUESTIONS_PER_SECTION, &[])
                .await?;
            if ids.is_empty() {
                continue;
            }
            let mut section = make_section(bank_refs(ids));
            section.topic = Some(topic.clone());
            section.time_limit_seconds = MOCK_SECTION_MINUTES * 60;
            sections.push(section);
        }

        if sections.is_empty() {
            return Err(AppError::NotFound("Questions for the selected topics"));
        }

        let minutes = sections.len() as u32 * MOCK_SECTION_MINUTES;
        let mut session = SectionedSession::new(key.clone(), sections, Utc::now());
        session.time_limit_minutes = minutes;
        Ok(session)
    }

    /// Daily questions: a single section of 10.
    async fn build_daily(
        &self,
        key: &SessionKey,
        req: &GenerateSessionRequest,
    ) -> Result<SectionedSession, AppError> {
        let criteria = bank_criteria(req);
        let ids = self.sample_exactly(&criteria, QUESTIONS_PER_SECTION).await?;
        let sections = vec![make_section(bank_refs(ids))];
        Ok(SectionedSession::new(key.clone(), sections, Utc::now()))
    }

    /// Missed review: every incorrectly answered question across the
    /// user's other sessions for the triple, deduplicated, one section.
    /// Unlike the other modes this replaces an existing active session:
    /// the missed set moves as the user keeps practicing.
    async fn rebuild_missed(
        &self,
        key: &SessionKey,
        req: &GenerateSessionRequest,
    ) -> Result<(SectionedSession, bool), AppError> {
        let sessions = self
            .store
            .find_for_user(&key.user_id, &key.subject, &key.syllabus, &key.standard)
            .await?;
        let sources = sessions_excluding_mode(sessions, QuizMode::Missed);

        let mut seen = HashSet::new();
        let mut refs = Vec::new();
        for session in &sources {
            for (_, slot) in session.iter_slots() {
                if slot.status == SlotStatus::Incorrect && seen.insert(slot.question.clone()) {
                    refs.push(slot.question.clone());
                }
            }
        }

        // Bank refs may have drifted out of the requested triple (the
        // flagged session spans subjects); re-check against the bank.
        let bank_ids: Vec<ObjectId> = refs
            .iter()
            .filter_map(|r| match r {
                SlotRef::Bank { question_id } => Some(*question_id),
                SlotRef::Paper { .. } => None,
            })
            .collect();
        let eligible: HashSet<ObjectId> = self
            .bank
            .find_by_ids(&bank_ids)
            .await?
            .into_iter()
            .filter(|q| {
                q.subject == req.subject && q.syllabus == req.syllabus && q.standard == req.standard
            })
            .filter_map(|q| q.id)
            .collect();
        refs.retain(|r| match r {
            SlotRef::Bank { question_id } => eligible.contains(question_id),
            SlotRef::Paper { .. } => true,
        });

        if refs.is_empty() {
            return Err(AppError::NotFound("Missed questions"));
        }

        let sections = vec![make_section(refs)];
        match self.store.find_active(key).await? {
            Some(mut existing) => {
                let rebuilt = SectionedSession::new(key.clone(), sections, Utc::now());
                existing.sections = rebuilt.sections;
                existing.current = rebuilt.current;
                existing.progress = rebuilt.progress;
                existing.is_active = true;
                existing.updated_at = Utc::now();
                self.store.update(&mut existing).await?;
                QUIZ_SESSIONS_TOTAL
                    .with_label_values(&[QuizMode::Missed.as_str(), "rebuilt"])
                    .inc();
                Ok((existing, true))
            }
            None => {
                let mut session = SectionedSession::new(key.clone(), sections, Utc::now());
                self.store.insert(&mut session).await?;
                QUIZ_SESSIONS_TOTAL
                    .with_label_values(&[QuizMode::Missed.as_str(), "created"])
                    .inc();
                Ok((session, false))
            }
        }
    }

    /// Personalized mix: distribution-weighted draw across topic,
    /// previous-year, attempted and random sources. Source shortfalls are
    /// reallocated to the random draw, a best-effort fallback chain rather
    /// a hard requirement.
    async fn build_personalized(
        &self,
        key: &SessionKey,
        req: &GenerateSessionRequest,
    ) -> Result<SectionedSession, AppError> {
        let total = req
            .total_questions
            .ok_or_else(|| AppError::Validation("total_questions is required".into()))?;
        if total == 0 || total > PERSONALIZED_MAX_QUESTIONS {
            return Err(AppError::Validation(format!(
                "total_questions must be between 1 and {}",
                PERSONALIZED_MAX_QUESTIONS
            )));
        }
        let total = total as usize;
        let dist = req.distribution.unwrap_or_default();
        let (mut topic_share, mut year_share, mut attempted_share) = allocate(total, &dist);

        if req.topics.is_empty() {
            topic_share = 0;
        }
        if req.years.is_empty() {
            year_share = 0;
        }
        if !req.include_attempted {
            attempted_share = 0;
        }

        let mut refs: Vec<SlotRef> = Vec::with_capacity(total);
        let mut chosen_bank: Vec<ObjectId> = Vec::new();

        if topic_share > 0 {
            let criteria = PoolCriteria {
                topics: req.topics.clone(),
                difficulties: req.difficulties.clone(),
                ..bank_criteria(req)
            };
            let ids = self.bank.sample(&criteria, topic_share, &[]).await?;
            chosen_bank.extend(&ids);
            refs.extend(bank_refs(ids));
        }

        if year_share > 0 {
            let criteria = paper_criteria(req);
            let mut pool = self.bank.paper_slots(&criteria).await?;
            pool.shuffle(&mut rand::rng());
            refs.extend(pool.into_iter().take(year_share));
        }

        if attempted_share > 0 {
            let sessions = self
                .store
                .find_for_user(&key.user_id, &key.subject, &key.syllabus, &key.standard)
                .await?;
            let mut attempted = Vec::new();
            for session in sessions_excluding_mode(sessions, QuizMode::Personalized) {
                for (_, slot) in session.iter_slots() {
                    if slot.status != SlotStatus::Pending {
                        if let SlotRef::Bank { question_id } = slot.question {
                            attempted.push(question_id);
                        }
                    }
                }
            }
            attempted.shuffle(&mut rand::rng());
            for id in attempted.into_iter().take(attempted_share) {
                chosen_bank.push(id);
                refs.push(SlotRef::Bank { question_id: id });
            }
        }

        refs = dedupe_refs(refs);

        // Everything not covered by the weighted sources comes from the
        // unconstrained random draw, excluding what is already placed.
        if refs.len() < total {
            let shortfall = total - refs.len();
            let criteria = PoolCriteria {
                difficulties: req.difficulties.clone(),
                ..bank_criteria(req)
            };
            let ids = self.bank.sample(&criteria, shortfall, &chosen_bank).await?;
            refs.extend(bank_refs(ids));
            refs = dedupe_refs(refs);
        }

        if refs.is_empty() {
            return Err(AppError::InsufficientQuestions {
                required: total,
                found: 0,
            });
        }
        if refs.len() < total {
            crate::metrics::POOL_SHORTFALLS_TOTAL
                .with_label_values(&[QuizMode::Personalized.as_str()])
                .inc();
            tracing::warn!(
                required = total,
                found = refs.len(),
                "Personalized draw fell short after fallback; proceeding"
            );
        }

        refs.shuffle(&mut rand::rng());
        refs.truncate(total);
        let sections = partition_thirds(refs);
        Ok(SectionedSession::new(key.clone(), sections, Utc::now()))
    }

    /// Previous-year papers: shuffle the (paper, index) pool and deal
    /// `max(1, total/3)` refs into each of three sections.
    async fn build_previous_year(
        &self,
        key: &SessionKey,
        req: &GenerateSessionRequest,
    ) -> Result<SectionedSession, AppError> {
        let total = req.total_questions.unwrap_or(QUESTIONS_PER_SECTION as u32) as usize;
        let per_section = std::cmp::max(1, total / 3);

        let criteria = paper_criteria(req);
        let mut pool = self.bank.paper_slots(&criteria).await?;

        // When requested, drop paper questions the user has already seen
        // in earlier previous-year sessions.
        if req.include_attempted {
            let sessions = self
                .store
                .find_for_user(&key.user_id, &key.subject, &key.syllabus, &key.standard)
                .await?;
            let attempted: HashSet<SlotRef> = sessions
                .iter()
                .filter(|s| s.mode == QuizMode::PreviousYear)
                .flat_map(|s| s.iter_slots().map(|(_, slot)| slot.question.clone()))
                .collect();
            pool.retain(|r| !attempted.contains(r));
        }

        if pool.is_empty() {
            return Err(AppError::NotFound("Questions matching the given filters"));
        }

        pool.shuffle(&mut rand::rng());
        pool.truncate(per_section * 3);
        let sections = partition_chunks(pool, per_section);
        Ok(SectionedSession::new(key.clone(), sections, Utc::now()))
    }

    /// Flag a bank question for later review. The flagged session is a
    /// single-section document keyed like every other mode; the key fields
    /// come from the question itself. Flagging an already-flagged question
    /// is a no-op.
    pub async fn flag_question(
        &self,
        user_id: &str,
        question_id: ObjectId,
    ) -> Result<SectionedSession, AppError> {
        let question = self
            .bank
            .find_by_ids(&[question_id])
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::NotFound("Question"))?;

        let key = SessionKey {
            user_id: user_id.to_string(),
            mode: QuizMode::Flagged,
            subject: question.subject,
            syllabus: question.syllabus,
            standard: question.standard,
        };
        let slot_ref = SlotRef::Bank { question_id };

        match self.store.find_latest(&key).await? {
            Some(mut session) => {
                if session.push_slot(slot_ref, Utc::now()) {
                    self.store.update(&mut session).await?;
                }
                Ok(session)
            }
            None => {
                let mut session = SectionedSession::new(key, Vec::new(), Utc::now());
                session.push_slot(slot_ref, Utc::now());
                self.store.insert(&mut session).await?;
                Ok(session)
            }
        }
    }

    /// Remove a question from the user's flagged session. Remaining slots
    /// are renumbered; removing the last one deactivates the session.
    pub async fn unflag_question(
        &self,
        user_id: &str,
        question_id: ObjectId,
    ) -> Result<SectionedSession, AppError> {
        let question = self
            .bank
            .find_by_ids(&[question_id])
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::NotFound("Question"))?;

        let key = SessionKey {
            user_id: user_id.to_string(),
            mode: QuizMode::Flagged,
            subject: question.subject,
            syllabus: question.syllabus,
            standard: question.standard,
        };

        let mut session = self
            .store
            .find_latest(&key)
            .await?
            .ok_or(AppError::NotFound("Flagged session"))?;
        session.remove_slot(&SlotRef::Bank { question_id }, Utc::now())?;
        self.store.update(&mut session).await?;
        Ok(session)
    }

    /// Draw exactly `required` refs or fail with the required/found pair.
    /// The count check runs first so no partial draw is ever persisted.
    async fn sample_exactly(
        &self,
        criteria: &PoolCriteria,
        required: usize,
    ) -> Result<Vec<ObjectId>, AppError> {
        let available = self.bank.count(criteria).await? as usize;
        if available < required {
            return Err(AppError::InsufficientQuestions {
                required,
                found: available,
            });
        }
        let ids = self.bank.sample(criteria, required, &[]).await?;
        if ids.len() < required {
            return Err(AppError::InsufficientQuestions {
                required,
                found: ids.len(),
            });
        }
        Ok(ids)
    }
}

fn bank_criteria(req: &GenerateSessionRequest) -> PoolCriteria {
    PoolCriteria {
        subject: req.subject.clone(),
        syllabus: req.syllabus.clone(),
        standard: req.standard.clone(),
        topics: Vec::new(),
        difficulties: Vec::new(),
        frequently_asked: req.frequently_asked,
    }
}

fn paper_criteria(req: &GenerateSessionRequest) -> PaperCriteria {
    PaperCriteria {
        subject: req.subject.clone(),
        syllabus: req.syllabus.clone(),
        standard: req.standard.clone(),
        years: req.years.clone(),
        units: req.units.clone(),
        frequently_asked: req.frequently_asked,
    }
}

fn bank_refs(ids: Vec<ObjectId>) -> Vec<SlotRef> {
    ids.into_iter()
        .map(|question_id| SlotRef::Bank { question_id })
        .collect()
}

fn dedupe_refs(refs: Vec<SlotRef>) -> Vec<SlotRef> {
    let mut seen = HashSet::new();
    refs.into_iter().filter(|r| seen.insert(r.clone())).collect()
}

/// Initial per-source allocation; the remainder implicitly belongs to the
/// random draw.
fn allocate(total: usize, dist: &SourceDistribution) -> (usize, usize, usize) {
    let share = |weight: f64| ((total as f64) * weight).floor() as usize;
    (
        share(dist.topics),
        share(dist.previous_year),
        share(dist.attempted),
    )
}

/// Slots numbered 1..n within one section.
fn make_section(refs: Vec<SlotRef>) -> Section {
    Section::new(
        refs.into_iter()
            .enumerate()
            .map(|(i, question)| Slot::new(question, i as u32 + 1))
            .collect(),
    )
}

/// Fixed-size sections; the last one takes the remainder.
fn partition_chunks(refs: Vec<SlotRef>, per_section: usize) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut refs = refs;
    while !refs.is_empty() {
        let take = std::cmp::min(per_section, refs.len());
        let chunk: Vec<SlotRef> = refs.drain(..take).collect();
        sections.push(make_section(chunk));
    }
    sections
}

/// Three sections with ceil-based boundaries, matching the personalized
/// split (earlier sections take the extra when the total is not
/// divisible).
fn partition_thirds(refs: Vec<SlotRef>) -> Vec<Section> {
    let total = refs.len();
    let first = total.div_ceil(3);
    let second = (total * 2).div_ceil(3) - first;

    let mut refs = refs;
    let s1: Vec<SlotRef> = refs.drain(..first).collect();
    let s2: Vec<SlotRef> = refs.drain(..second.min(refs.len())).collect();
    let s3 = refs;

    [s1, s2, s3]
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(make_section)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(n: usize) -> Vec<SlotRef> {
        (0..n)
            .map(|i| SlotRef::Bank {
                question_id: ObjectId::from_bytes([i as u8; 12]),
            })
            .collect()
    }

    #[test]
    fn chunks_split_evenly_with_partial_tail() {
        let sections = partition_chunks(refs(25), 10);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].slots.len(), 10);
        assert_eq!(sections[1].slots.len(), 10);
        assert_eq!(sections[2].slots.len(), 5);
    }

    #[test]
    fn chunk_numbering_restarts_per_section() {
        let sections = partition_chunks(refs(12), 10);
        assert_eq!(sections[0].slots[9].number, 10);
        assert_eq!(sections[1].slots[0].number, 1);
    }

    #[test]
    fn thirds_cover_all_refs() {
        let sections = partition_thirds(refs(10));
        let counts: Vec<usize> = sections.iter().map(|s| s.slots.len()).collect();
        assert_eq!(counts.iter().sum::<usize>(), 10);
        assert_eq!(counts[0], 4);
    }

    #[test]
    fn thirds_of_divisible_total_are_equal() {
        let sections = partition_thirds(refs(30));
        assert_eq!(sections.len(), 3);
        assert!(sections.iter().all(|s| s.slots.len() == 10));
    }

    #[test]
    fn tiny_thirds_drop_empty_sections() {
        let sections = partition_thirds(refs(2));
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].slots.len(), 1);
    }

    #[test]
    fn allocation_floors_each_share() {
        let dist = SourceDistribution::default();
        let (topics, years, attempted) = allocate(25, &dist);
        assert_eq!(topics, 10);
        assert_eq!(years, 7);
        assert_eq!(attempted, 5);
        assert!(topics + years + attempted <= 25);
    }

    #[test]
    fn dedupe_preserves_first_occurrence_order() {
        let mut list = refs(3);
        list.push(list[0].clone());
        list.push(list[1].clone());
        let deduped = dedupe_refs(list);
        assert_eq!(deduped, refs(3));
    }
}
