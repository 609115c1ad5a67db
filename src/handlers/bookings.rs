use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::admin::check_auth;
use crate::errors::EngineError;
use crate::models::{Actor, Booking, CustomerInfo};
use crate::state::AppState;

// POST /api/bookings
#[derive(Deserialize)]
pub struct CreateBookingRequest {
    business_id: String,
    slot_id: String,
    customer_name: String,
    customer_phone: String,
    #[serde(default)]
    service_ids: Vec<String>,
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), EngineError> {
    let booking = state
        .bookings
        .create_booking(
            &req.business_id,
            &req.slot_id,
            CustomerInfo {
                name: req.customer_name,
                phone: req.customer_phone,
            },
            req.service_ids,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings/:code
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Booking>, EngineError> {
    Ok(Json(state.bookings.get_booking(&code).await?))
}

/// Only admin callers may act as the system.
#[allow(clippy::result_large_err)]
fn check_actor(headers: &HeaderMap, state: &AppState, actor: &Actor) -> Result<(), Response> {
    if *actor == Actor::System {
        check_auth(headers, &state.config.admin_token)?;
    }
    Ok(())
}

/// Body shared by the transition endpoints.
#[derive(Deserialize)]
pub struct TransitionRequest {
    actor: Actor,
    reason: Option<String>,
}

// POST /api/bookings/:code/confirm
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Booking>, Response> {
    check_actor(&headers, &state, &req.actor)?;
    let booking = state
        .bookings
        .confirm_booking(&code, &req.actor)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(booking))
}

// POST /api/bookings/:code/reject
pub async fn reject_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Booking>, Response> {
    check_actor(&headers, &state, &req.actor)?;
    let booking = state
        .bookings
        .reject_booking(&code, &req.actor, req.reason.as_deref())
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(booking))
}

// POST /api/bookings/:code/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Booking>, Response> {
    check_actor(&headers, &state, &req.actor)?;
    let booking = state
        .bookings
        .cancel_booking_by_customer(&code, &req.actor, req.reason.as_deref())
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(booking))
}

// POST /api/bookings/:code/owner-cancel
pub async fn owner_cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Booking>, Response> {
    check_actor(&headers, &state, &req.actor)?;
    let booking = state
        .bookings
        .cancel_booking_by_owner(&code, &req.actor, req.reason.as_deref())
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(booking))
}

// POST /api/bookings/:code/reschedule
#[derive(Deserialize)]
pub struct RescheduleRequest {
    actor: Actor,
    new_slot_id: String,
    reason: Option<String>,
}

pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<Booking>, Response> {
    check_actor(&headers, &state, &req.actor)?;
    let booking = state
        .bookings
        .reschedule_booking(&code, &req.new_slot_id, &req.actor, req.reason.as_deref())
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(booking))
}

// POST /api/bookings/:code/no-show
pub async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Booking>, Response> {
    check_actor(&headers, &state, &req.actor)?;
    let booking = state
        .bookings
        .mark_no_show(&code, &req.actor)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(booking))
}
