//! Post-commit side channels: customer/owner notifications, the audit
//! trail, and transition metrics. Nothing here may fail the operation that
//! triggered it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;

use crate::models::{Booking, Business, CancelledBy, Slot};

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHandle(pub String);

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Accepts a fully rendered message for one recipient.
    async fn dispatch(&self, to: &str, body: &str) -> anyhow::Result<DeliveryHandle>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, to: &str, body: &str) -> anyhow::Result<DeliveryHandle> {
        let handle = DeliveryHandle(uuid::Uuid::new_v4().to_string());
        tracing::info!(to = %to, handle = %handle.0, body = %body, "notification");
        Ok(handle)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub entity: &'static str,
    pub entity_id: String,
    pub event: String,
    pub from: String,
    pub to: String,
    pub actor: String,
    pub at: NaiveDateTime,
}

/// Append-only audit trail. Implementations must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "audit",
            entity = entry.entity,
            entity_id = %entry.entity_id,
            event = %entry.event,
            from = %entry.from,
            to = %entry.to,
            actor = %entry.actor,
            "transition"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingNotice {
    Created,
    Confirmed,
    Rejected,
    Cancelled,
    Rescheduled,
    Expired,
}

pub fn render_notice(
    notice: BookingNotice,
    booking: &Booking,
    slot: &Slot,
    business: &Business,
) -> String {
    let when = format!(
        "{} at {}",
        slot.date.format("%a %d %b %Y"),
        slot.start_time.format("%H:%M")
    );
    let code = &booking.booking_code;
    let name = &business.name;

    match notice {
        BookingNotice::Created => format!(
            "Hi {}, your booking request {code} with {name} for {when} is received and awaiting confirmation.",
            booking.customer_name
        ),
        BookingNotice::Confirmed => {
            format!("Your booking {code} with {name} for {when} is confirmed. See you then!")
        }
        BookingNotice::Rejected => format!(
            "Sorry, {name} could not accept booking {code} for {when}.{}",
            reason_suffix(booking)
        ),
        BookingNotice::Cancelled => match booking.cancelled_by {
            Some(CancelledBy::Customer) => format!(
                "Booking {code} ({}, {}) for {when} was cancelled by the customer.{}",
                booking.customer_name,
                booking.customer_phone,
                reason_suffix(booking)
            ),
            _ => format!(
                "Your booking {code} with {name} for {when} has been cancelled.{}",
                reason_suffix(booking)
            ),
        },
        BookingNotice::Rescheduled => {
            format!("Your booking {code} with {name} has been moved to {when}.")
        }
        BookingNotice::Expired => format!(
            "Your booking request {code} with {name} for {when} expired before it was confirmed."
        ),
    }
}

fn reason_suffix(booking: &Booking) -> String {
    booking
        .cancellation_reason
        .as_deref()
        .map(|r| format!(" Reason: {r}"))
        .unwrap_or_default()
}

fn owner_request_message(booking: &Booking, slot: &Slot) -> String {
    format!(
        "New booking request {}: {} ({}) for {} {}",
        booking.booking_code,
        booking.customer_name,
        booking.customer_phone,
        slot.date.format("%Y-%m-%d"),
        slot.start_time.format("%H:%M")
    )
}

#[derive(Clone)]
pub struct Hooks {
    dispatcher: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
}

impl Hooks {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, audit: Arc<dyn AuditSink>) -> Self {
        Self { dispatcher, audit }
    }

    pub fn transition(
        &self,
        entity: &'static str,
        entity_id: &str,
        from: impl ToString,
        to: impl ToString,
        event: impl ToString,
        actor: &str,
    ) {
        let event = event.to_string();
        metrics::counter!(
            "slotbook_transitions_total",
            "entity" => entity,
            "event" => event.clone()
        )
        .increment(1);

        self.audit.record(AuditEntry {
            entity,
            entity_id: entity_id.to_string(),
            event,
            from: from.to_string(),
            to: to.to_string(),
            actor: actor.to_string(),
            at: Utc::now().naive_utc(),
        });
    }

    pub async fn notify(&self, to: &str, body: &str) {
        if to.is_empty() {
            tracing::warn!("notification recipient missing, skipping");
            return;
        }

        match tokio::time::timeout(DISPATCH_TIMEOUT, self.dispatcher.dispatch(to, body)).await {
            Ok(Ok(handle)) => tracing::debug!(to = %to, handle = %handle.0, "notification dispatched"),
            Ok(Err(e)) => tracing::error!(error = %e, to = %to, "failed to dispatch notification"),
            Err(_) => tracing::error!(to = %to, "notification dispatch timed out"),
        }
    }

    pub async fn notify_customer(
        &self,
        notice: BookingNotice,
        booking: &Booking,
        slot: &Slot,
        business: &Business,
    ) {
        let body = render_notice(notice, booking, slot, business);
        self.notify(&booking.customer_phone, &body).await;
    }

    pub async fn notify_owner(
        &self,
        notice: BookingNotice,
        booking: &Booking,
        slot: &Slot,
        business: &Business,
    ) {
        let Some(owner_phone) = business.owner_phone.as_deref() else {
            tracing::warn!(business_id = %business.id, "owner_phone not configured, skipping notification");
            return;
        };
        let body = match notice {
            BookingNotice::Created => owner_request_message(booking, slot),
            other => render_notice(other, booking, slot, business),
        };
        self.notify(owner_phone, &body).await;
    }
}
