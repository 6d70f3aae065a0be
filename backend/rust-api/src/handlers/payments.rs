use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    error::AppError,
    extractors::ValidatedJson,
    middlewares::auth::JwtClaims,
    models::payment::{CreateOrderRequest, VerifyPaymentRequest},
    services::{payment_service::PaymentService, AppState},
};

fn payment_service(state: &AppState) -> Result<PaymentService, AppError> {
    let settings = state
        .config
        .payment
        .clone()
        .ok_or_else(|| AppError::Infrastructure(anyhow::anyhow!("Payment gateway not configured")))?;
    Ok(PaymentService::new(state.mongo.clone(), settings))
}

/// POST /api/v1/payments/orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<CreateOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = payment_service(&state)?
        .create_order(&claims.sub, req)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/payments/verify
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let authentic = payment_service(&state)?.verify_payment(req).await?;

    if authentic {
        Ok((
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "Payment verified successfully",
            })),
        ))
    } else {
        Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "message": "Payment verification failed",
            })),
        ))
    }
}

/// GET /api/v1/payments/orders/{order_id}
pub async fn get_payment_status(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let payment = payment_service(&state)?.get_status(&order_id).await?;
    Ok(Json(payment))
}
