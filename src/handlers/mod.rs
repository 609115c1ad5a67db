pub mod admin;
pub mod bookings;
pub mod health;
pub mod payments;
pub mod slots;
pub mod webhook;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/businesses/:id", put(admin::upsert_business))
        .route("/api/businesses/:id/slots/generate", post(slots::generate_slots))
        .route("/api/businesses/:id/slots", get(slots::list_slots))
        .route("/api/bookings", post(bookings::create_booking))
        .route("/api/bookings/:code", get(bookings::get_booking))
        .route("/api/bookings/:code/confirm", post(bookings::confirm_booking))
        .route("/api/bookings/:code/reject", post(bookings::reject_booking))
        .route("/api/bookings/:code/cancel", post(bookings::cancel_booking))
        .route("/api/bookings/:code/owner-cancel", post(bookings::owner_cancel_booking))
        .route("/api/bookings/:code/reschedule", post(bookings::reschedule_booking))
        .route("/api/bookings/:code/no-show", post(bookings::mark_no_show))
        .route("/api/payments", post(payments::create_payment))
        .route("/api/payments/upi", post(payments::create_upi_payment))
        .route("/api/payments/:id", get(payments::get_payment))
        .route("/api/payments/:id/verify", post(payments::verify_payment))
        .route("/api/payments/:id/fail", post(payments::fail_payment))
        .route("/api/payments/:id/refund", post(payments::refund_payment))
        .route("/api/cron/expire", post(admin::run_expiry))
        .route("/webhook/payments", post(webhook::payment_webhook))
        .with_state(state)
}
