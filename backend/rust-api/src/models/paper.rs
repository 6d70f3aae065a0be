use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, Bson};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::question::Difficulty;

/// Previous-year paper stored in the `question_papers` collection.
/// Questions are embedded sub-documents; sessions reference them as
/// (paper id, index) pairs rather than standalone bank ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPaper {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub exam_year: i32,
    pub exam_type: ExamType,
    pub subject: String,
    pub syllabus: String,
    pub standard: String,
    pub paper_name: String,
    pub unit: String,
    pub questions: Vec<PaperQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(with = "super::bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperQuestion {
    pub question: String,
    pub options: Vec<Bson>,
    pub correct_answer: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub frequently_asked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamType {
    Board,
    Entrance,
    Scholarship,
    Other,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaperRequest {
    pub exam_year: i32,
    pub exam_type: ExamType,

    #[validate(length(min = 1, message = "subject is required"))]
    pub subject: String,

    #[validate(length(min = 1, message = "syllabus is required"))]
    pub syllabus: String,

    #[validate(length(min = 1, message = "standard is required"))]
    pub standard: String,

    #[validate(length(min = 1, message = "paper_name is required"))]
    pub paper_name: String,

    #[validate(length(min = 1, message = "unit is required"))]
    pub unit: String,

    #[validate(length(min = 1, message = "questions array is required"))]
    pub questions: Vec<CreatePaperQuestionRequest>,

    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePaperQuestionRequest {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub frequently_asked: bool,
}
