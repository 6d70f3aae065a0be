use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use std::sync::Arc;

use crate::{
    error::AppError,
    extractors::ValidatedJson,
    middlewares::auth::{JwtClaims, JwtService},
    models::student::{
        AdminRegisterRequest, LoginRequest, RegisterRequest, UpdateProfileRequest,
        VerifyOtpRequest,
    },
    services::{auth_service::AuthService, email_service::EmailService, AppState},
};

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.mongo.clone(),
        state.redis.clone(),
        JwtService::new(&state.config.jwt_secret),
    )
}

/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email_service = state.config.smtp.clone().map(EmailService::new);
    let response = auth_service(&state)
        .register(req, email_service.as_ref())
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/auth/verify-otp
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let profile = auth_service(&state).verify_otp(req).await?;
    Ok(Json(profile))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = auth_service(&state).login(req).await?;
    Ok(Json(response))
}

/// POST /api/v1/auth/admin/register, gated by the provisioning code.
pub async fn admin_register(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<AdminRegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    if state.config.admin_signup_code.is_empty()
        || req.signup_code != state.config.admin_signup_code
    {
        return Err(AppError::Unauthorized("Invalid signup code".into()));
    }

    let response = auth_service(&state).register_admin(req.account).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/auth/me
pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, AppError> {
    let profile = auth_service(&state).get_profile(&claims.sub).await?;
    Ok(Json(profile))
}

/// PATCH /api/v1/auth/profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let profile = auth_service(&state).update_profile(&claims.sub, req).await?;
    Ok(Json(profile))
}
