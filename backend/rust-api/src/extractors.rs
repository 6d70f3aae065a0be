use axum::{
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use validator::Validate;

use crate::error::AppError;

/// JSON extractor that parses the body and runs field validation in one
/// step, turning both failure kinds into the JSON error shape instead of
/// axum's HTML rejection.
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: serde::de::DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|rejection| {
            let message = format!("Failed to parse JSON request body: {}", rejection);
            tracing::warn!("{}", message);
            AppError::Validation(message).into_response()
        })?;

        value.validate().map_err(|errors| {
            AppError::Validation(flatten_validation_errors(&errors)).into_response()
        })?;

        Ok(ValidatedJson(value))
    }
}

fn flatten_validation_errors(errors: &validator::ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(msg) => msg.to_string(),
                None => format!("{} is invalid", field),
            })
        })
        .collect();
    parts.sort();
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(serde::Deserialize, Validate)]
    struct Probe {
        #[validate(length(min = 1, message = "subject is required"))]
        subject: String,
    }

    #[test]
    fn flattens_messages() {
        let probe = Probe {
            subject: String::new(),
        };
        let errors = probe.validate().unwrap_err();
        assert_eq!(flatten_validation_errors(&errors), "subject is required");
    }
}
