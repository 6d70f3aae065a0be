use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use mongodb::bson::Bson;
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    error::AppError,
    extractors::ValidatedJson,
    models::paper::{CreatePaperRequest, PaperQuestion, QuestionPaper},
    models::question::{
        BulkCreateQuestionsRequest, CreateOptionRequest, CreateQuestionRequest, Question,
    },
    services::{
        object_storage::ObjectStorageClient,
        question_pool::{MongoQuestionBank, PaperCriteria, PoolCriteria, QuestionBank},
        AppState,
    },
};

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub subject: String,
    pub syllabus: String,
    pub standard: String,
}

impl LookupQuery {
    fn pool_criteria(&self) -> PoolCriteria {
        PoolCriteria {
            subject: self.subject.clone(),
            syllabus: self.syllabus.clone(),
            standard: self.standard.clone(),
            ..PoolCriteria::default()
        }
    }

    fn paper_criteria(&self) -> PaperCriteria {
        PaperCriteria {
            subject: self.subject.clone(),
            syllabus: self.syllabus.clone(),
            standard: self.standard.clone(),
            ..PaperCriteria::default()
        }
    }
}

/// POST /api/v1/questions (admin only).
pub async fn create_question(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let question = build_question(&state, req).await?;
    let collection = state
        .mongo
        .collection::<Question>(MongoQuestionBank::QUESTIONS);
    let result = collection.insert_one(&question).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Question created successfully",
            "question_id": result.inserted_id.as_object_id().map(|id| id.to_hex()),
        })),
    ))
}

/// POST /api/v1/questions/bulk (admin only). All-or-nothing validation,
/// then a single insert_many.
pub async fn bulk_create_questions(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<BulkCreateQuestionsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut questions = Vec::with_capacity(req.questions.len());
    for item in req.questions {
        questions.push(build_question(&state, item).await?);
    }

    let collection = state
        .mongo
        .collection::<Question>(MongoQuestionBank::QUESTIONS);
    let result = collection.insert_many(&questions).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Bulk questions created successfully",
            "count": result.inserted_ids.len(),
        })),
    ))
}

/// POST /api/v1/questions/papers (admin only).
pub async fn create_paper(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreatePaperRequest>,
) -> Result<impl IntoResponse, AppError> {
    let paper = QuestionPaper {
        id: None,
        exam_year: req.exam_year,
        exam_type: req.exam_type,
        subject: req.subject,
        syllabus: req.syllabus,
        standard: req.standard,
        paper_name: req.paper_name,
        unit: req.unit,
        questions: req
            .questions
            .into_iter()
            .map(|q| PaperQuestion {
                question: q.question,
                options: q.options.into_iter().map(Bson::String).collect(),
                correct_answer: q.correct_answer,
                difficulty: q.difficulty,
                frequently_asked: q.frequently_asked,
                diagram_url: None,
            })
            .collect(),
        notes: req.notes,
        created_at: Utc::now(),
    };

    let collection = state
        .mongo
        .collection::<QuestionPaper>(MongoQuestionBank::PAPERS);
    let result = collection.insert_one(&paper).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Question paper created successfully",
            "paper_id": result.inserted_id.as_object_id().map(|id| id.to_hex()),
        })),
    ))
}

/// GET /api/v1/questions/topics
pub async fn list_topics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LookupQuery>,
) -> Result<impl IntoResponse, AppError> {
    let bank = MongoQuestionBank::new(state.mongo.clone());
    let topics = bank.distinct_topics(&query.pool_criteria()).await?;
    Ok(Json(serde_json::json!({ "topics": topics })))
}

/// GET /api/v1/questions/years
pub async fn list_years(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LookupQuery>,
) -> Result<impl IntoResponse, AppError> {
    let bank = MongoQuestionBank::new(state.mongo.clone());
    let years = bank.distinct_years(&query.paper_criteria()).await?;
    Ok(Json(serde_json::json!({ "years": years })))
}

/// GET /api/v1/questions/units
pub async fn list_units(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LookupQuery>,
) -> Result<impl IntoResponse, AppError> {
    let bank = MongoQuestionBank::new(state.mongo.clone());
    let units = bank.distinct_units(&query.paper_criteria()).await?;
    Ok(Json(serde_json::json!({ "units": units })))
}

async fn build_question(
    state: &AppState,
    req: CreateQuestionRequest,
) -> Result<Question, AppError> {
    let mut options = Vec::with_capacity(req.options.len());
    for option in req.options {
        options.push(build_option(state, option).await?);
    }

    Ok(Question {
        id: None,
        question: req.question,
        options,
        correct_answer: req.correct_answer,
        difficulty: req.difficulty,
        subject: req.subject,
        topic: req.topic,
        syllabus: req.syllabus,
        standard: req.standard,
        unit: req.unit,
        frequently_asked: req.frequently_asked,
        diagram_url: None,
        created_at: Utc::now(),
    })
}

/// Options are stored in the canonical `{text, diagramUrl}` shape; image
/// payloads are pushed to object storage first and only the URL is kept.
async fn build_option(state: &AppState, option: CreateOptionRequest) -> Result<Bson, AppError> {
    let diagram_url = match (&option.diagram_url, &option.image_data) {
        (Some(url), _) => Some(url.clone()),
        (None, Some(data)) => {
            let settings = state.config.storage.clone().ok_or_else(|| {
                AppError::Validation("Object storage is not configured for image uploads".into())
            })?;
            let client = ObjectStorageClient::new(settings).map_err(AppError::Infrastructure)?;
            let bytes = general_purpose::STANDARD
                .decode(data)
                .map_err(|_| AppError::Validation("image_data is not valid base64".into()))?;
            let url = client
                .upload_diagram(bytes, "image/png")
                .await
                .map_err(AppError::Infrastructure)?;
            Some(url)
        }
        (None, None) => None,
    };

    Ok(Bson::Document(mongodb::bson::doc! {
        "text": option.text,
        "diagramUrl": diagram_url.map(Bson::String).unwrap_or(Bson::Null),
    }))
}
