use serde::{Deserialize, Serialize};
use validator::Validate;

pub mod paper;
pub mod payment;
pub mod question;
pub mod session;
pub mod student;

pub use session::{
    GradeOutcome, Progress, ProgressStatus, QuizMode, Section, SectionedSession, SessionKey, Slot,
    SlotPosition, SlotRef, SlotStatus,
};

// Serde converters for chrono::DateTime <-> mongodb::bson::DateTime
pub(crate) mod bson_datetime_as_chrono {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bson_dt = bson::DateTime::from_millis(date.timestamp_millis());
        bson_dt.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bson_dt = bson::DateTime::deserialize(deserializer)?;
        Ok(DateTime::from_timestamp_millis(bson_dt.timestamp_millis()).unwrap())
    }
}

pub(crate) mod bson_datetime_as_chrono_option {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let bson_dt = bson::DateTime::from_millis(d.timestamp_millis());
                serializer.serialize_some(&bson_dt)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt_bson_dt: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        Ok(opt_bson_dt
            .map(|bson_dt| DateTime::from_timestamp_millis(bson_dt.timestamp_millis()).unwrap()))
    }
}

/// Selection criteria accepted by every generation endpoint. The mode
/// decides which of the optional fields matter.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateSessionRequest {
    #[validate(length(min = 1, message = "subject is required"))]
    pub subject: String,

    #[validate(length(min = 1, message = "syllabus is required"))]
    pub syllabus: String,

    #[validate(length(min = 1, message = "standard is required"))]
    pub standard: String,

    /// Topic filter (mock, personalized).
    #[serde(default)]
    pub topics: Vec<String>,

    /// Difficulty filter (personalized).
    #[serde(default)]
    pub difficulties: Vec<String>,

    /// Exam-year filter (previous-year, personalized).
    #[serde(default)]
    pub years: Vec<i32>,

    /// Unit filter (previous-year).
    #[serde(default)]
    pub units: Vec<String>,

    /// Overall draw size where the mode does not fix it.
    pub total_questions: Option<u32>,

    /// Timed mode: challenge duration, 30 seconds per question.
    pub challenge_minutes: Option<u32>,

    /// Timed mode: early-termination threshold, 0 disables.
    pub wrong_answers_limit: Option<u32>,

    #[serde(default)]
    pub frequently_asked: bool,

    /// Personalized mode: also draw from previously attempted questions.
    #[serde(default)]
    pub include_attempted: bool,

    /// Personalized mode: per-source weights, defaulted when absent.
    pub distribution: Option<SourceDistribution>,
}

/// Per-source weights for the personalized draw. Shortfalls in any source
/// are reallocated to the unconstrained random draw.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SourceDistribution {
    pub topics: f64,
    pub previous_year: f64,
    pub attempted: f64,
    pub random: f64,
}

impl Default for SourceDistribution {
    fn default() -> Self {
        Self {
            topics: 0.4,
            previous_year: 0.3,
            attempted: 0.2,
            random: 0.1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateSessionResponse {
    pub session_id: String,
    /// True when an active session already existed for the key and was
    /// returned instead of a new draw.
    pub resumed: bool,
    pub total_questions: usize,
    pub progress: Progress,
    pub current: Option<SlotPosition>,
}

/// Key fields identifying which of the caller's sessions to operate on.
/// The user id always comes from the access token, never the body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SessionKeyQuery {
    #[validate(length(min = 1, message = "subject is required"))]
    pub subject: String,
    #[validate(length(min = 1, message = "syllabus is required"))]
    pub syllabus: String,
    #[validate(length(min = 1, message = "standard is required"))]
    pub standard: String,
}

impl SessionKeyQuery {
    pub fn into_key(self, user_id: &str, mode: QuizMode) -> SessionKey {
        SessionKey {
            user_id: user_id.to_string(),
            mode,
            subject: self.subject,
            syllabus: self.syllabus,
            standard: self.standard,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[serde(flatten)]
    #[validate(nested)]
    pub key: SessionKeyQuery,

    /// Bank question id, or the paper id for previous-year sessions.
    #[validate(length(min = 1, message = "question_id is required"))]
    pub question_id: String,

    /// Index into the paper's question list; previous-year sessions only.
    pub question_index: Option<u32>,

    #[validate(length(min = 1, message = "answer is required"))]
    pub answer: String,
}

/// The grade transition's result, returned to the client. The canonical
/// answer is withheld on correct submissions.
#[derive(Debug, Clone, Serialize)]
pub struct GradeResult {
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    pub outcome: GradeOutcome,
    pub progress: Progress,
    pub current: Option<SlotPosition>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FlagQuestionRequest {
    #[validate(length(min = 1, message = "question_id is required"))]
    pub question_id: String,
}
