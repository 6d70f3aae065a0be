use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use std::sync::Mutex;

use examprep_api::error::AppError;
use examprep_api::models::paper::{ExamType, PaperQuestion, QuestionPaper};
use examprep_api::models::question::{Difficulty, Question};
use examprep_api::models::{SectionedSession, SessionKey, SlotRef};
use examprep_api::services::question_pool::{PaperCriteria, PoolCriteria, QuestionBank};
use examprep_api::services::session_store::SessionStore;

pub const SUBJECT: &str = "Physics";
pub const SYLLABUS: &str = "CBSE";
pub const STANDARD: &str = "12";

pub fn question(n: u8, answer: &str) -> Question {
    Question {
        id: Some(ObjectId::from_bytes([n; 12])),
        question: format!("Question {}", n),
        options: Vec::new(),
        correct_answer: answer.to_string(),
        difficulty: Difficulty::Easy,
        subject: SUBJECT.to_string(),
        topic: "Kinematics".to_string(),
        syllabus: SYLLABUS.to_string(),
        standard: STANDARD.to_string(),
        unit: None,
        frequently_asked: false,
        diagram_url: None,
        created_at: Utc::now(),
    }
}

pub fn question_id(n: u8) -> ObjectId {
    ObjectId::from_bytes([n; 12])
}

pub fn paper(n: u8, questions: usize) -> QuestionPaper {
    QuestionPaper {
        id: Some(ObjectId::from_bytes([n; 12])),
        exam_year: 2023,
        exam_type: ExamType::Board,
        subject: SUBJECT.to_string(),
        syllabus: SYLLABUS.to_string(),
        standard: STANDARD.to_string(),
        paper_name: format!("Board paper {}", n),
        unit: "Unit 1".to_string(),
        questions: (0..questions)
            .map(|i| PaperQuestion {
                question: format!("Paper question {}", i),
                options: Vec::new(),
                correct_answer: format!("answer-{}", i),
                difficulty: Difficulty::Easy,
                frequently_asked: false,
                diagram_url: None,
            })
            .collect(),
        notes: None,
        created_at: Utc::now(),
    }
}

/// Deterministic stand-in for the Mongo-backed bank: "sampling" returns
/// matching questions in insertion order.
#[derive(Default)]
pub struct FakeBank {
    pub questions: Vec<Question>,
    pub papers: Vec<QuestionPaper>,
}

impl FakeBank {
    pub fn with_questions(count: u8, answer: &str) -> Self {
        Self {
            questions: (1..=count).map(|n| question(n, answer)).collect(),
            papers: Vec::new(),
        }
    }

    fn matching(&self, criteria: &PoolCriteria) -> Vec<&Question> {
        self.questions
            .iter()
            .filter(|q| {
                q.subject == criteria.subject
                    && q.syllabus == criteria.syllabus
                    && q.standard == criteria.standard
                    && (criteria.topics.is_empty() || criteria.topics.contains(&q.topic))
                    && (criteria.difficulties.is_empty()
                        || criteria
                            .difficulties
                            .contains(&q.difficulty.as_str().to_string()))
                    && (!criteria.frequently_asked || q.frequently_asked)
            })
            .collect()
    }
}

#[async_trait]
impl QuestionBank for FakeBank {
    async fn sample(
        &self,
        criteria: &PoolCriteria,
        count: usize,
        exclude: &[ObjectId],
    ) -> Result<Vec<ObjectId>, AppError> {
        Ok(self
            .matching(criteria)
            .into_iter()
            .filter_map(|q| q.id)
            .filter(|id| !exclude.contains(id))
            .take(count)
            .collect())
    }

    async fn count(&self, criteria: &PoolCriteria) -> Result<u64, AppError> {
        Ok(self.matching(criteria).len() as u64)
    }

    async fn find_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Question>, AppError> {
        Ok(self
            .questions
            .iter()
            .filter(|q| q.id.map(|id| ids.contains(&id)).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn find_papers_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<QuestionPaper>, AppError> {
        Ok(self
            .papers
            .iter()
            .filter(|p| p.id.map(|id| ids.contains(&id)).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn paper_slots(&self, criteria: &PaperCriteria) -> Result<Vec<SlotRef>, AppError> {
        Ok(self
            .papers
            .iter()
            .filter(|p| {
                p.subject == criteria.subject
                    && (criteria.years.is_empty() || criteria.years.contains(&p.exam_year))
                    && (criteria.units.is_empty() || criteria.units.contains(&p.unit))
            })
            .flat_map(|p| {
                let paper_id = p.id.unwrap();
                (0..p.questions.len()).map(move |i| SlotRef::Paper {
                    paper_id,
                    question_index: i as u32,
                })
            })
            .collect())
    }

    async fn correct_answer(&self, slot: &SlotRef) -> Result<String, AppError> {
        match slot {
            SlotRef::Bank { question_id } => self
                .questions
                .iter()
                .find(|q| q.id == Some(*question_id))
                .map(|q| q.correct_answer.clone())
                .ok_or(AppError::NotFound("Question")),
            SlotRef::Paper {
                paper_id,
                question_index,
            } => self
                .papers
                .iter()
                .find(|p| p.id == Some(*paper_id))
                .and_then(|p| p.questions.get(*question_index as usize))
                .map(|q| q.correct_answer.clone())
                .ok_or(AppError::NotFound("Question")),
        }
    }

    async fn distinct_topics(&self, criteria: &PoolCriteria) -> Result<Vec<String>, AppError> {
        let mut topics: Vec<String> = self
            .matching(criteria)
            .into_iter()
            .map(|q| q.topic.clone())
            .collect();
        topics.sort();
        topics.dedup();
        Ok(topics)
    }

    async fn distinct_years(&self, _criteria: &PaperCriteria) -> Result<Vec<i32>, AppError> {
        let mut years: Vec<i32> = self.papers.iter().map(|p| p.exam_year).collect();
        years.sort_unstable_by(|a, b| b.cmp(a));
        years.dedup();
        Ok(years)
    }

    async fn distinct_units(&self, _criteria: &PaperCriteria) -> Result<Vec<String>, AppError> {
        let mut units: Vec<String> = self.papers.iter().map(|p| p.unit.clone()).collect();
        units.sort();
        units.dedup();
        Ok(units)
    }
}

/// In-memory session store with the same contract as the Mongo one:
/// duplicate-active rejection on insert and a version check on update.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: Mutex<Vec<SectionedSession>>,
}

impl InMemoryStore {
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn get(&self, id: ObjectId) -> Option<SectionedSession> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == Some(id))
            .cloned()
    }

}

fn matches_key(session: &SectionedSession, key: &SessionKey) -> bool {
    session.user_id == key.user_id
        && session.mode == key.mode
        && session.subject == key.subject
        && session.syllabus == key.syllabus
        && session.standard == key.standard
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn find_active(&self, key: &SessionKey) -> Result<Option<SectionedSession>, AppError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.is_active && matches_key(s, key))
            .cloned())
    }

    async fn find_latest(&self, key: &SessionKey) -> Result<Option<SectionedSession>, AppError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| matches_key(s, key))
            .cloned())
    }

    async fn insert(&self, session: &mut SectionedSession) -> Result<ObjectId, AppError> {
        let mut sessions = self.sessions.lock().unwrap();
        if session.is_active
            && sessions
                .iter()
                .any(|s| s.is_active && matches_key(s, &session.key()))
        {
            return Err(AppError::DuplicateActiveSession);
        }
        let id = ObjectId::new();
        session.id = Some(id);
        sessions.push(session.clone());
        Ok(id)
    }

    async fn update(&self, session: &mut SectionedSession) -> Result<(), AppError> {
        let mut sessions = self.sessions.lock().unwrap();
        let stored = sessions
            .iter_mut()
            .find(|s| s.id == session.id)
            .ok_or(AppError::NotFound("Session"))?;

        if stored.version != session.version {
            return Err(AppError::Conflict);
        }
        session.version += 1;
        *stored = session.clone();
        Ok(())
    }

    async fn find_for_user(
        &self,
        user_id: &str,
        subject: &str,
        syllabus: &str,
        standard: &str,
    ) -> Result<Vec<SectionedSession>, AppError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                s.user_id == user_id
                    && s.subject == subject
                    && s.syllabus == syllabus
                    && s.standard == standard
            })
            .cloned()
            .collect())
    }
}
