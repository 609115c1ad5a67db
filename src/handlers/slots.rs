use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::admin::check_auth;
use crate::db;
use crate::errors::EngineError;
use crate::models::{Slot, SlotConfig};
use crate::state::AppState;

// POST /api/businesses/:id/slots/generate
#[derive(Deserialize)]
pub struct GenerateSlotsRequest {
    date: String,
    opening_time: String,
    closing_time: String,
    slot_duration_minutes: i64,
}

fn bad_request(msg: String) -> Response {
    EngineError::Policy(msg).into_response()
}

pub async fn generate_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(business_id): Path<String>,
    Json(req): Json<GenerateSlotsRequest>,
) -> Result<(StatusCode, Json<Vec<Slot>>), Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let date = db::parse_date(&req.date).map_err(|e| bad_request(e.to_string()))?;
    let config = SlotConfig {
        opening_time: db::parse_time(&req.opening_time).map_err(|e| bad_request(e.to_string()))?,
        closing_time: db::parse_time(&req.closing_time).map_err(|e| bad_request(e.to_string()))?,
        slot_duration_minutes: req.slot_duration_minutes,
    };

    let created = state
        .slots
        .generate_slots(&business_id, date, &config)
        .map_err(IntoResponse::into_response)?;

    let status = if created.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(created)))
}

// GET /api/businesses/:id/slots?date=YYYY-MM-DD
#[derive(Deserialize)]
pub struct SlotsQuery {
    date: String,
}

pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Vec<Slot>>, Response> {
    let date = db::parse_date(&query.date).map_err(|e| bad_request(e.to_string()))?;
    let slots = state
        .slots
        .list_available(&business_id, date)
        .map_err(IntoResponse::into_response)?;
    Ok(Json(slots))
}
