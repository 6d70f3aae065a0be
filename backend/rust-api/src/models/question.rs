use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, Bson};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// MCQ document stored in the `questions` collection.
///
/// `options` is kept as raw BSON on purpose: the bank accumulated several
/// option shapes over time (plain strings, `{text, diagramUrl}` documents,
/// numeric-keyed pseudo-arrays) and they are only normalized at
/// presentation time. Correctness checks always use `correct_answer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub question: String,
    pub options: Vec<Bson>,
    pub correct_answer: String,
    #[serde(default = "Difficulty::default")]
    pub difficulty: Difficulty,
    pub subject: String,
    pub topic: String,
    pub syllabus: String,
    pub standard: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub frequently_asked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_url: Option<String>,
    #[serde(with = "super::bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// Admin request to create a bank question. Option diagrams arrive as raw
/// image bytes (base64) and are uploaded to object storage before the
/// document is written.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, message = "question is required"))]
    pub question: String,

    #[validate(length(min = 2, message = "at least two options are required"))]
    pub options: Vec<CreateOptionRequest>,

    #[validate(length(min = 1, message = "correct_answer is required"))]
    pub correct_answer: String,

    #[serde(default)]
    pub difficulty: Difficulty,

    #[validate(length(min = 1, message = "subject is required"))]
    pub subject: String,

    #[validate(length(min = 1, message = "topic is required"))]
    pub topic: String,

    #[validate(length(min = 1, message = "syllabus is required"))]
    pub syllabus: String,

    #[validate(length(min = 1, message = "standard is required"))]
    pub standard: String,

    pub unit: Option<String>,

    #[serde(default)]
    pub frequently_asked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOptionRequest {
    #[serde(default)]
    pub text: String,
    /// Pre-existing hosted diagram.
    pub diagram_url: Option<String>,
    /// Base64-encoded image to upload; takes precedence over nothing,
    /// `diagram_url` wins when both are present.
    pub image_data: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkCreateQuestionsRequest {
    #[validate(length(min = 1, message = "questions array is required"), nested)]
    pub questions: Vec<CreateQuestionRequest>,
}
