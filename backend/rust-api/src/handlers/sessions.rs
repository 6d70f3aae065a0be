use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::AppError,
    extractors::ValidatedJson,
    middlewares::auth::JwtClaims,
    models::{
        FlagQuestionRequest, GenerateSessionRequest, GenerateSessionResponse, QuizMode,
        SessionKeyQuery, SlotRef, SubmitAnswerRequest,
    },
    services::{
        answer_service::AnswerGrader,
        question_pool::MongoQuestionBank,
        session_service::SessionGenerator,
        session_store::{MongoSessionStore, SessionStore},
        session_view::SessionView,
        AppState,
    },
};

fn parse_mode(mode: &str) -> Result<QuizMode, AppError> {
    mode.parse()
}

fn parse_object_id(id: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(id).map_err(|_| AppError::Validation(format!("Invalid id: {}", id)))
}

fn generator(state: &AppState) -> SessionGenerator<MongoQuestionBank, MongoSessionStore> {
    SessionGenerator::new(
        MongoQuestionBank::new(state.mongo.clone()),
        MongoSessionStore::new(state.mongo.clone()),
    )
}

/// POST /api/v1/quiz/{mode}/sessions
pub async fn generate_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(mode): Path<String>,
    ValidatedJson(req): ValidatedJson<GenerateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mode = parse_mode(&mode)?;
    tracing::info!(user_id = %claims.sub, mode = mode.as_str(), "Session generation requested");

    let (session, resumed) = generator(&state).generate(&claims.sub, mode, req).await?;

    let status = if resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(GenerateSessionResponse {
            session_id: session.id.map(|id| id.to_hex()).unwrap_or_default(),
            resumed,
            total_questions: session.total_slots(),
            progress: session.progress.clone(),
            current: session.current,
        }),
    ))
}

/// GET /api/v1/quiz/{mode}/sessions: current session joined with full
/// question content.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(mode): Path<String>,
    Query(query): Query<SessionKeyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let mode = parse_mode(&mode)?;
    query
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let store = MongoSessionStore::new(state.mongo.clone());
    let key = query.into_key(&claims.sub, mode);
    let session = store
        .find_latest(&key)
        .await?
        .ok_or(AppError::NotFound("Session"))?;

    let view = SessionView::new(MongoQuestionBank::new(state.mongo.clone()));
    let presentable = view.materialize(&session).await?;
    Ok(Json(presentable))
}

/// POST /api/v1/quiz/{mode}/answers
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(mode): Path<String>,
    ValidatedJson(req): ValidatedJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mode = parse_mode(&mode)?;
    let key = req.key.clone().into_key(&claims.sub, mode);

    let question = match mode {
        QuizMode::PreviousYear => SlotRef::Paper {
            paper_id: parse_object_id(&req.question_id)?,
            question_index: req.question_index.ok_or_else(|| {
                AppError::Validation(
                    "question_index is required for previous-year sessions".into(),
                )
            })?,
        },
        _ => SlotRef::Bank {
            question_id: parse_object_id(&req.question_id)?,
        },
    };

    let grader = AnswerGrader::new(
        MongoQuestionBank::new(state.mongo.clone()),
        MongoSessionStore::new(state.mongo.clone()),
    );
    let result = grader.grade(&key, &question, &req.answer).await?;
    Ok(Json(result))
}

/// POST /api/v1/quiz/flags
pub async fn flag_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<FlagQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let question_id = parse_object_id(&req.question_id)?;
    let session = generator(&state)
        .flag_question(&claims.sub, question_id)
        .await?;

    Ok(Json(serde_json::json!({
        "message": "Question flagged",
        "total_flagged": session.total_slots(),
        "progress": session.progress,
    })))
}

/// DELETE /api/v1/quiz/flags/{question_id}
pub async fn unflag_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let question_id = parse_object_id(&question_id)?;
    let session = generator(&state)
        .unflag_question(&claims.sub, question_id)
        .await?;

    Ok(Json(serde_json::json!({
        "message": "Question unflagged",
        "total_flagged": session.total_slots(),
        "is_active": session.is_active,
    })))
}
