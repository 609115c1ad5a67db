use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::admin::check_auth;
use crate::errors::EngineError;
use crate::models::{NewPayment, Payment};
use crate::state::AppState;

// POST /api/payments
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewPayment>,
) -> Result<(StatusCode, Json<Payment>), EngineError> {
    let payment = state.payments.create_payment(req)?;
    Ok((StatusCode::CREATED, Json(payment)))
}

// POST /api/payments/upi
#[derive(Deserialize)]
pub struct UpiPaymentRequest {
    booking_code: String,
    amount_cents: i64,
    idempotency_key: Option<String>,
}

pub async fn create_upi_payment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpiPaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), EngineError> {
    let payment = state
        .payments
        .create_upi_payment(&req.booking_code, req.amount_cents, req.idempotency_key)?;
    Ok((StatusCode::CREATED, Json(payment)))
}

// GET /api/payments/:id
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, EngineError> {
    Ok(Json(state.payments.get_payment(&id)?))
}

// POST /api/payments/:id/verify (bearer admin token)
#[derive(Deserialize)]
pub struct VerifyRequest {
    transaction_id: String,
    #[serde(default)]
    verification: serde_json::Value,
}

pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<Payment>, Response> {
    check_auth(&headers, &state.config.admin_token)?;
    let payment = state
        .payments
        .verify_payment(&id, &req.transaction_id, req.verification)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(payment))
}

// POST /api/payments/:id/fail (bearer admin token)
#[derive(Deserialize)]
pub struct FailRequest {
    reason: Option<String>,
}

pub async fn fail_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<FailRequest>,
) -> Result<Json<Payment>, Response> {
    check_auth(&headers, &state.config.admin_token)?;
    let payment = state
        .payments
        .mark_payment_failed(&id, req.reason.as_deref())
        .map_err(IntoResponse::into_response)?;
    Ok(Json(payment))
}

// POST /api/payments/:id/refund (bearer admin token)
#[derive(Deserialize)]
pub struct RefundRequest {
    amount_cents: Option<i64>,
}

pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<Payment>, Response> {
    check_auth(&headers, &state.config.admin_token)?;
    let payment = state
        .payments
        .refund_payment(&id, req.amount_cents)
        .map_err(IntoResponse::into_response)?;
    Ok(Json(payment))
}
