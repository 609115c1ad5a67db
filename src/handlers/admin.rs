use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::db::{self, queries};
use crate::errors::EngineError;
use crate::models::Business;
use crate::services::expiry::ExpirySource;
use crate::state::AppState;

#[allow(clippy::result_large_err)]
pub(crate) fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), Response> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response());
    }
    Ok(())
}

// PUT /api/businesses/:id
#[derive(Deserialize)]
pub struct BusinessRequest {
    name: String,
    owner_id: String,
    owner_phone: Option<String>,
    upi_id: Option<String>,
    #[serde(default)]
    suspended: bool,
}

pub async fn upsert_business(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<BusinessRequest>,
) -> Result<Json<Business>, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let business = Business {
        id,
        name: req.name,
        owner_id: req.owner_id,
        owner_phone: req.owner_phone,
        upi_id: req.upi_id,
        suspended: req.suspended,
    };
    {
        let conn = db::lock(&state.db);
        queries::upsert_business(&conn, &business)
            .map_err(|e| EngineError::from(e).into_response())?;
    }
    tracing::info!(business_id = %business.id, suspended = business.suspended, "business saved");
    Ok(Json(business))
}

// POST /api/cron/expire
pub async fn run_expiry(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let bookings = state
        .bookings
        .expire_old_bookings(ExpirySource::Cron)
        .await
        .map_err(IntoResponse::into_response)?;
    let payments = state
        .payments
        .expire_payments()
        .map_err(IntoResponse::into_response)?;

    Ok(Json(serde_json::json!({
        "bookings": bookings,
        "payments": payments,
    })))
}
