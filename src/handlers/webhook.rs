use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Success,
    Failed,
}

#[derive(Deserialize)]
pub struct PaymentWebhook {
    pub payment_id: String,
    pub status: PaymentOutcome,
    pub transaction_id: Option<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Base64 HMAC-SHA1 of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn validate_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn reject(status: StatusCode, msg: &str) -> Response {
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
}

pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Validate provider signature (skip if secret is empty, dev mode)
    if !state.config.payment_webhook_secret.is_empty() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature.is_empty() {
            tracing::warn!("missing X-Payment-Signature header");
            return reject(StatusCode::FORBIDDEN, "missing signature");
        }
        if !validate_signature(&state.config.payment_webhook_secret, signature, &body) {
            tracing::warn!("invalid payment webhook signature");
            return reject(StatusCode::FORBIDDEN, "invalid signature");
        }
    }

    let event: PaymentWebhook = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "malformed payment webhook");
            return reject(StatusCode::BAD_REQUEST, "malformed payload");
        }
    };

    tracing::info!(payment_id = %event.payment_id, status = ?event.status, "payment webhook");

    let result = match event.status {
        PaymentOutcome::Success => {
            let Some(transaction_id) = event.transaction_id.as_deref() else {
                return reject(StatusCode::BAD_REQUEST, "transaction_id is required");
            };
            state
                .payments
                .verify_payment(&event.payment_id, transaction_id, event.payload.clone())
                .await
        }
        PaymentOutcome::Failed => state
            .payments
            .mark_payment_failed(&event.payment_id, event.reason.as_deref()),
    };

    match result {
        Ok(payment) => Json(serde_json::json!({
            "ok": true,
            "payment_id": payment.id,
            "status": payment.status,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}
