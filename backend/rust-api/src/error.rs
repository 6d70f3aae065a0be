use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error taxonomy, mapped to JSON HTTP responses.
///
/// Infrastructure failures (store or bank unavailable) are wrapped as
/// [`AppError::Infrastructure`] and surfaced as a generic 500 with no
/// partial-state guarantee.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed required field. Client-recoverable.
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// The pool could not satisfy the requested draw.
    #[error("Not enough questions available. Required {required}, found {found}")]
    InsufficientQuestions { required: usize, found: usize },

    /// Grading attempted on a finished or deactivated session.
    #[error("Session is no longer active")]
    SessionInactive,

    /// Submitted question is absent from every section of the session.
    #[error("Question not found in session")]
    SlotNotFound,

    /// A version-checked update lost a race with a concurrent writer.
    #[error("Session was modified concurrently, please retry")]
    Conflict,

    /// Unique-index rejection on session creation. Generators convert this
    /// into a soft resume of the existing session, so it rarely escapes.
    #[error("An active session already exists for this key")]
    DuplicateActiveSession,

    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::SlotNotFound => StatusCode::NOT_FOUND,
            AppError::InsufficientQuestions { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::SessionInactive => StatusCode::CONFLICT,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::DuplicateActiveSession => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            AppError::Infrastructure(err) => {
                tracing::error!("Internal error: {:#}", err);
                json!({ "message": "Internal server error" })
            }
            AppError::InsufficientQuestions { required, found } => json!({
                "message": self.to_string(),
                "required": required,
                "found": found,
            }),
            other => json!({ "message": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::Infrastructure(anyhow::Error::new(err))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Infrastructure(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_questions_carries_counts() {
        let err = AppError::InsufficientQuestions {
            required: 30,
            found: 25,
        };
        assert_eq!(
            err.to_string(),
            "Not enough questions available. Required 30, found 25"
        );
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn infrastructure_errors_map_to_500() {
        let err = AppError::Infrastructure(anyhow::anyhow!("mongo down"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
