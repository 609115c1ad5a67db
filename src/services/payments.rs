use chrono::{Duration, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use super::atomically;
use super::bookings::confirm_and_book;
use super::notify::{BookingNotice, Hooks};
use crate::config::EngineConfig;
use crate::db::{self, queries, Db};
use crate::errors::EngineError;
use crate::lifecycle::{
    BookingEvent, BookingMachine, PaymentEvent, PaymentMachine, SlotEvent, SlotMachine, StateMachine,
};
use crate::models::{
    Booking, BookingStatus, Business, NewPayment, Payment, PaymentAttempt, PaymentStatus, Slot,
    SlotStatus,
};

/// Per-item outcome of a payment expiry sweep.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PaymentExpiryReport {
    pub expired: Vec<String>,
    /// Moved on by another writer between the scan and the update.
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

enum Verified {
    AlreadyCompleted(Payment),
    LateRefunded {
        from: PaymentStatus,
        payment: Payment,
    },
    Completed {
        from: PaymentStatus,
        payment: Payment,
        booking: Booking,
        slot: Slot,
        business: Business,
        booking_confirmed: bool,
    },
}

fn annotate(verification: &Value, key: &str, entry: Value) -> Value {
    let mut merged = match verification {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    merged.insert(key.to_string(), entry);
    Value::Object(merged)
}

fn encode_component(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace(' ', "%20")
        .replace('&', "%26")
        .replace('=', "%3D")
        .replace('+', "%2B")
        .replace('#', "%23")
        .replace('?', "%3F")
}

/// Provider reference: `prefix` followed by twelve uppercase hex digits.
fn generate_reference(prefix: &str) -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", simple[..12].to_uppercase())
}

/// `upi://pay` deep link understood by UPI apps.
pub fn upi_intent_uri(payee: &str, payee_name: &str, reference: &str, amount_cents: i64) -> String {
    format!(
        "upi://pay?pa={}&pn={}&tr={}&am={}.{:02}&cu=INR",
        encode_component(payee),
        encode_component(payee_name),
        encode_component(reference),
        amount_cents / 100,
        amount_cents % 100
    )
}

#[derive(Clone)]
pub struct PaymentService {
    db: Db,
    config: EngineConfig,
    hooks: Hooks,
}

impl PaymentService {
    pub fn new(db: Db, config: EngineConfig, hooks: Hooks) -> Self {
        Self { db, config, hooks }
    }

    pub fn get_payment(&self, payment_id: &str) -> Result<Payment, EngineError> {
        let conn = db::lock(&self.db);
        queries::get_payment(&conn, payment_id)?
            .ok_or_else(|| EngineError::PaymentNotFound(payment_id.to_string()))
    }

    /// Opens a payment intent for a pending booking. A repeated call with
    /// the same idempotency key returns the original payment untouched.
    /// Without a provider transaction id a `PAY` reference is generated;
    /// verification must present it.
    pub fn create_payment(&self, new: NewPayment) -> Result<Payment, EngineError> {
        self.create(new, json!({}))
    }

    /// Like `create_payment`, with a generated provider reference and a
    /// UPI intent link stored in the verification metadata.
    pub fn create_upi_payment(
        &self,
        booking_code: &str,
        amount_cents: i64,
        idempotency_key: Option<String>,
    ) -> Result<Payment, EngineError> {
        if let Some(key) = idempotency_key.as_deref() {
            let conn = db::lock(&self.db);
            if let Some(existing) = queries::get_payment_by_idempotency_key(&conn, key)? {
                return Ok(existing);
            }
        }

        let business = {
            let conn = db::lock(&self.db);
            let booking = queries::get_booking_by_code(&conn, booking_code)?
                .ok_or_else(|| EngineError::BookingNotFound(booking_code.to_string()))?;
            queries::get_business(&conn, &booking.business_id)?
                .ok_or_else(|| EngineError::BusinessNotFound(booking.business_id.clone()))?
        };
        let payee = business.upi_id.clone().ok_or_else(|| {
            EngineError::Policy(format!("business {} has no UPI id configured", business.id))
        })?;

        let reference = generate_reference("UPI");
        let intent = upi_intent_uri(&payee, &business.name, &reference, amount_cents);

        self.create(
            NewPayment {
                booking_code: booking_code.to_string(),
                provider: "upi".to_string(),
                amount_cents,
                currency: "INR".to_string(),
                idempotency_key,
                transaction_id: Some(reference),
            },
            json!({ "upi_intent": intent, "payee": payee }),
        )
    }

    fn create(&self, new: NewPayment, verification: Value) -> Result<Payment, EngineError> {
        if new.amount_cents <= 0 {
            return Err(EngineError::Policy("amount must be positive".to_string()));
        }
        let now = Utc::now().naive_utc();

        let (payment, created) = atomically(&self.db, |tx| {
            if let Some(key) = new.idempotency_key.as_deref() {
                if let Some(existing) = queries::get_payment_by_idempotency_key(tx, key)? {
                    return Ok((existing, false));
                }
            }

            let booking = queries::get_booking_by_code(tx, &new.booking_code)?
                .ok_or_else(|| EngineError::BookingNotFound(new.booking_code.clone()))?;
            if booking.status != BookingStatus::Pending {
                return Err(EngineError::Policy(format!(
                    "booking {} is {}; only pending bookings take payments",
                    booking.booking_code, booking.status
                )));
            }
            let slot = queries::get_slot(tx, &booking.slot_id)?
                .ok_or_else(|| EngineError::SlotNotFound(booking.slot_id.clone()))?;
            if slot.effective_status(now) != SlotStatus::Reserved {
                return Err(EngineError::Policy(format!(
                    "reservation on slot {} has lapsed",
                    slot.id
                )));
            }
            if let Some(active) = queries::active_payment_for_booking(tx, &booking.id)? {
                return Err(EngineError::Conflict(format!(
                    "booking {} already has active payment {}",
                    booking.booking_code, active.id
                )));
            }

            // never outlive the slot hold it pays for
            let ttl_end = now + Duration::minutes(self.config.payment_ttl_minutes);
            let expires_at = slot.reserved_until.map_or(ttl_end, |until| until.min(ttl_end));

            let payment = Payment {
                id: uuid::Uuid::new_v4().to_string(),
                booking_id: booking.id.clone(),
                provider: new.provider.clone(),
                amount_cents: new.amount_cents,
                refunded_cents: 0,
                currency: new.currency.clone(),
                status: PaymentStatus::Initiated,
                idempotency_key: new.idempotency_key.clone(),
                expires_at,
                transaction_id: Some(
                    new.transaction_id
                        .clone()
                        .unwrap_or_else(|| generate_reference("PAY")),
                ),
                attempt_count: 0,
                attempts: vec![],
                verification: verification.clone(),
                completed_at: None,
                created_at: now,
                updated_at: now,
            };

            match queries::insert_payment(tx, &payment) {
                Ok(()) => Ok((payment, true)),
                Err(e) if db::is_unique_violation(&e) => {
                    let key = new.idempotency_key.as_deref().unwrap_or_default();
                    queries::get_payment_by_idempotency_key(tx, key)?
                        .map(|existing| (existing, false))
                        .ok_or_else(|| EngineError::Conflict("duplicate payment".to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })?;

        if created {
            self.hooks.transition(
                PaymentMachine::ENTITY,
                &payment.id,
                "none",
                PaymentStatus::Initiated,
                "create",
                "system",
            );
            tracing::info!(payment_id = %payment.id, booking_id = %new.booking_code, provider = %payment.provider, "payment initiated");
        } else {
            tracing::debug!(payment_id = %payment.id, "idempotent payment replay");
        }
        Ok(payment)
    }

    /// Captures a payment and, in the same transaction, confirms its booking
    /// and books the slot. Verifying an already-completed payment with the
    /// same transaction id is a no-op.
    pub async fn verify_payment(
        &self,
        payment_id: &str,
        transaction_id: &str,
        verification: Value,
    ) -> Result<Payment, EngineError> {
        let now = Utc::now().naive_utc();

        let verified = atomically(&self.db, |tx| {
            let payment = queries::get_payment(tx, payment_id)?
                .ok_or_else(|| EngineError::PaymentNotFound(payment_id.to_string()))?;

            if payment.transaction_id.as_deref() != Some(transaction_id) {
                return Err(EngineError::TransactionMismatch(payment_id.to_string()));
            }
            if payment.status == PaymentStatus::Completed {
                return Ok(Verified::AlreadyCompleted(payment));
            }

            let from = payment.status;
            PaymentMachine::transition(from, PaymentEvent::Verify)?;

            let booking = queries::get_booking(tx, &payment.booking_id)?
                .ok_or_else(|| EngineError::BookingNotFound(payment.booking_id.clone()))?;
            let slot = queries::get_slot(tx, &booking.slot_id)?
                .ok_or_else(|| EngineError::SlotNotFound(booking.slot_id.clone()))?;

            let confirmable = booking.status == BookingStatus::Pending
                && slot.effective_status(now) == SlotStatus::Reserved;
            let already_confirmed = booking.status == BookingStatus::Confirmed && !booking.no_show;

            // keep what was stored at creation (UPI intent) next to the capture details
            let captured = annotate(&payment.verification, "capture", verification.clone());

            if now >= payment.expires_at || !(confirmable || already_confirmed) {
                if !self.config.auto_refund_late_payments {
                    return Err(EngineError::PaymentExpired(payment_id.to_string()));
                }
                return self.refund_late(tx, &payment, transaction_id, &captured, now);
            }

            if !queries::complete_payment(tx, payment_id, from, transaction_id, &captured, &now)? {
                return Err(EngineError::Conflict(format!("payment {payment_id} changed concurrently")));
            }
            if confirmable {
                confirm_and_book(tx, &booking, &slot, now)?;
            }

            let business = queries::get_business(tx, &booking.business_id)?
                .ok_or_else(|| EngineError::BusinessNotFound(booking.business_id.clone()))?;
            Ok(Verified::Completed {
                from,
                payment: self.reload(tx, payment_id)?,
                booking: queries::get_booking(tx, &booking.id)?
                    .ok_or_else(|| EngineError::BookingNotFound(booking.id.clone()))?,
                slot: queries::get_slot(tx, &slot.id)?
                    .ok_or_else(|| EngineError::SlotNotFound(slot.id.clone()))?,
                business,
                booking_confirmed: confirmable,
            })
        })?;

        match verified {
            Verified::AlreadyCompleted(payment) => {
                tracing::debug!(payment_id = %payment_id, "payment already verified");
                Ok(payment)
            }
            Verified::LateRefunded { from, payment } => {
                self.hooks.transition(
                    PaymentMachine::ENTITY,
                    payment_id,
                    from,
                    PaymentStatus::Completed,
                    PaymentEvent::Verify,
                    "system",
                );
                self.hooks.transition(
                    PaymentMachine::ENTITY,
                    payment_id,
                    PaymentStatus::Completed,
                    payment.status,
                    PaymentEvent::Refund,
                    "system",
                );
                tracing::warn!(payment_id = %payment_id, "late payment captured and refunded");
                Ok(payment)
            }
            Verified::Completed {
                from,
                payment,
                booking,
                slot,
                business,
                booking_confirmed,
            } => {
                self.hooks.transition(
                    PaymentMachine::ENTITY,
                    payment_id,
                    from,
                    PaymentStatus::Completed,
                    PaymentEvent::Verify,
                    "system",
                );
                tracing::info!(payment_id = %payment_id, booking_id = %booking.booking_code, "payment verified");

                if booking_confirmed {
                    self.hooks.transition(
                        SlotMachine::ENTITY,
                        &slot.id,
                        SlotStatus::Reserved,
                        SlotStatus::Booked,
                        SlotEvent::Book,
                        "system",
                    );
                    self.hooks.transition(
                        BookingMachine::ENTITY,
                        &booking.id,
                        BookingStatus::Pending,
                        BookingStatus::Confirmed,
                        BookingEvent::Confirm,
                        "system",
                    );
                    self.hooks
                        .notify_customer(BookingNotice::Confirmed, &booking, &slot, &business)
                        .await;
                }
                Ok(payment)
            }
        }
    }

    fn refund_late(
        &self,
        tx: &rusqlite::Connection,
        payment: &Payment,
        transaction_id: &str,
        verification: &Value,
        now: NaiveDateTime,
    ) -> Result<Verified, EngineError> {
        if !queries::complete_payment(tx, &payment.id, payment.status, transaction_id, verification, &now)? {
            return Err(EngineError::Conflict(format!("payment {} changed concurrently", payment.id)));
        }
        let to = PaymentMachine::transition(PaymentStatus::Completed, PaymentEvent::Refund)?;
        let verification = annotate(
            verification,
            "auto_refund",
            json!({ "reason": "payment arrived after the reservation lapsed", "at": db::fmt_ts(&now) }),
        );
        if !queries::record_refund(tx, &payment.id, to, payment.amount_cents, &verification, &now)? {
            return Err(EngineError::Conflict(format!("payment {} changed concurrently", payment.id)));
        }
        Ok(Verified::LateRefunded {
            from: payment.status,
            payment: self.reload(tx, &payment.id)?,
        })
    }

    fn reload(&self, conn: &rusqlite::Connection, payment_id: &str) -> Result<Payment, EngineError> {
        queries::get_payment(conn, payment_id)?
            .ok_or_else(|| EngineError::PaymentNotFound(payment_id.to_string()))
    }

    /// Records a failed attempt. The booking stays pending so a new payment
    /// can be opened.
    pub fn mark_payment_failed(&self, payment_id: &str, reason: Option<&str>) -> Result<Payment, EngineError> {
        let now = Utc::now().naive_utc();

        let (from, payment) = atomically(&self.db, |tx| {
            let payment = self.reload(tx, payment_id)?;
            PaymentMachine::transition(payment.status, PaymentEvent::Fail)?;

            let mut attempts = payment.attempts.clone();
            attempts.push(PaymentAttempt {
                attempt: payment.attempt_count + 1,
                outcome: "failed".to_string(),
                reason: reason.map(str::to_string),
                at: now,
            });
            if !queries::record_payment_failure(tx, payment_id, payment.status, &attempts, &now)? {
                return Err(EngineError::Conflict(format!("payment {payment_id} changed concurrently")));
            }
            Ok((payment.status, self.reload(tx, payment_id)?))
        })?;

        self.hooks.transition(
            PaymentMachine::ENTITY,
            payment_id,
            from,
            PaymentStatus::Failed,
            PaymentEvent::Fail,
            "system",
        );
        tracing::info!(payment_id = %payment_id, attempts = payment.attempt_count, reason = ?reason, "payment failed");
        Ok(payment)
    }

    /// Expires every initiated payment past `expires_at`, one at a time.
    pub fn expire_payments(&self) -> Result<PaymentExpiryReport, EngineError> {
        let now = Utc::now().naive_utc();
        let to = PaymentMachine::transition(PaymentStatus::Initiated, PaymentEvent::Expire)?;
        let ids = {
            let conn = db::lock(&self.db);
            queries::find_expired_payment_ids(&conn, &now)?
        };

        let mut report = PaymentExpiryReport::default();
        for id in ids {
            let result = {
                let conn = db::lock(&self.db);
                queries::expire_payment(&conn, &id, &now)
            };
            match result {
                Ok(true) => {
                    self.hooks.transition(
                        PaymentMachine::ENTITY,
                        &id,
                        PaymentStatus::Initiated,
                        to,
                        PaymentEvent::Expire,
                        "system",
                    );
                    report.expired.push(id);
                }
                Ok(false) => report.skipped.push(id),
                Err(e) => {
                    tracing::error!(error = %e, payment_id = %id, "failed to expire payment");
                    report.failed.push(id);
                }
            }
        }

        if !report.expired.is_empty() {
            metrics::counter!("slotbook_payments_expired_total").increment(report.expired.len() as u64);
            tracing::info!(expired = report.expired.len(), failed = report.failed.len(), "expired payments");
        }
        Ok(report)
    }

    /// completed → refunded, or partially_refunded when `amount_cents` is
    /// below the captured amount.
    pub fn refund_payment(&self, payment_id: &str, amount_cents: Option<i64>) -> Result<Payment, EngineError> {
        let now = Utc::now().naive_utc();

        let (from, payment) = atomically(&self.db, |tx| {
            let payment = self.reload(tx, payment_id)?;
            PaymentMachine::transition(payment.status, PaymentEvent::Refund)?;

            let amount = amount_cents.unwrap_or(payment.amount_cents);
            if amount <= 0 || amount > payment.amount_cents {
                return Err(EngineError::Policy(format!(
                    "refund amount must be between 1 and {}",
                    payment.amount_cents
                )));
            }
            let target = if amount == payment.amount_cents {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            };
            PaymentMachine::transition_to(payment.status, target, PaymentEvent::Refund)?;

            let verification = annotate(
                &payment.verification,
                "refund",
                json!({ "amount_cents": amount, "at": db::fmt_ts(&now) }),
            );
            if !queries::record_refund(tx, payment_id, target, amount, &verification, &now)? {
                return Err(EngineError::Conflict(format!("payment {payment_id} changed concurrently")));
            }
            Ok((payment.status, self.reload(tx, payment_id)?))
        })?;

        self.hooks.transition(
            PaymentMachine::ENTITY,
            payment_id,
            from,
            payment.status,
            PaymentEvent::Refund,
            "system",
        );
        tracing::info!(payment_id = %payment_id, refunded_cents = payment.refunded_cents, "payment refunded");
        Ok(payment)
    }
}
