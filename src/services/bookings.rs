use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use rusqlite::Connection;

use super::access::{is_booking_customer, AccessPolicy};
use super::atomically;
use super::expiry::{ExpiryReport, ExpirySource, ExpirySweeper};
use super::notify::{BookingNotice, Hooks};
use super::slots::LAPSED_HOLD_REASON;
use crate::config::EngineConfig;
use crate::db::{self, queries, Db};
use crate::errors::EngineError;
use crate::lifecycle::{BookingEvent, BookingMachine, SlotEvent, SlotMachine, StateMachine};
use crate::models::{
    Actor, Booking, BookingStatus, Business, CancelledBy, CustomerInfo, Slot, SlotStatus,
};

/// Public booking code: `BK` followed by eight uppercase hex digits.
pub fn generate_booking_code() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("BK{}", id[..8].to_uppercase())
}

struct BookingContext {
    booking: Booking,
    slot: Slot,
    business: Business,
}

fn load_context(conn: &Connection, code: &str) -> Result<BookingContext, EngineError> {
    let booking = queries::get_booking_by_code(conn, code)?
        .ok_or_else(|| EngineError::BookingNotFound(code.to_string()))?;
    let slot = queries::get_slot(conn, &booking.slot_id)?
        .ok_or_else(|| EngineError::SlotNotFound(booking.slot_id.clone()))?;
    let business = queries::get_business(conn, &booking.business_id)?
        .ok_or_else(|| EngineError::BusinessNotFound(booking.business_id.clone()))?;
    Ok(BookingContext {
        booking,
        slot,
        business,
    })
}

fn reload_booking(conn: &Connection, id: &str) -> Result<Booking, EngineError> {
    queries::get_booking(conn, id)?.ok_or_else(|| EngineError::BookingNotFound(id.to_string()))
}

/// pending → confirmed together with reserved → booked. Both writes happen
/// on `conn`, which must be inside a transaction; an error leaves the
/// caller to roll back.
pub(crate) fn confirm_and_book(
    conn: &Connection,
    booking: &Booking,
    slot: &Slot,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    let to = BookingMachine::transition(booking.status, BookingEvent::Confirm)?;

    // a lapsed hold reads as available, and available─book is denied
    let slot_status = slot.effective_status(now);
    SlotMachine::transition(slot_status, SlotEvent::Book)?;
    if !queries::book_slot(conn, &slot.id, &now)? {
        return Err(EngineError::InvalidTransition {
            entity: SlotMachine::ENTITY,
            from: slot_status.to_string(),
            event: SlotEvent::Book.to_string(),
        });
    }

    if !queries::transition_booking(conn, &booking.id, booking.status, to, None, None, &now)? {
        return Err(EngineError::Conflict(format!(
            "booking {} changed concurrently",
            booking.booking_code
        )));
    }
    Ok(())
}

fn release_in_tx(conn: &Connection, slot: &Slot, now: NaiveDateTime) -> Result<bool, EngineError> {
    if slot.status == SlotStatus::Available {
        return Ok(false);
    }
    SlotMachine::transition(slot.status, SlotEvent::Release)?;
    Ok(queries::release_slot(conn, &slot.id, &now)?)
}

/// Cancels a pending booking left on a slot whose hold lapsed, so the slot
/// can be taken over.
fn displace_stale_booking(
    conn: &Connection,
    slot_id: &str,
    now: NaiveDateTime,
) -> Result<Option<Booking>, EngineError> {
    let Some(stale) = queries::pending_booking_for_slot(conn, slot_id)? else {
        return Ok(None);
    };
    let to = BookingMachine::transition(stale.status, BookingEvent::Expire)?;
    if !queries::transition_booking(
        conn,
        &stale.id,
        stale.status,
        to,
        Some(CancelledBy::System),
        Some(LAPSED_HOLD_REASON),
        &now,
    )? {
        return Ok(None);
    }
    Ok(Some(stale))
}

#[derive(Clone)]
pub struct BookingService {
    db: Db,
    config: EngineConfig,
    hooks: Hooks,
    sweeper: ExpirySweeper,
    policy: Arc<dyn AccessPolicy>,
    code_generator: fn() -> String,
}

impl BookingService {
    pub fn new(
        db: Db,
        config: EngineConfig,
        hooks: Hooks,
        sweeper: ExpirySweeper,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            db,
            config,
            hooks,
            sweeper,
            policy,
            code_generator: generate_booking_code,
        }
    }

    pub fn with_code_generator(mut self, generator: fn() -> String) -> Self {
        self.code_generator = generator;
        self
    }

    fn authorize_owner(&self, actor: &Actor, business: &Business) -> Result<(), EngineError> {
        if self.policy.can_manage(actor, business) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(business.id.clone()))
        }
    }

    fn authorize_party(&self, actor: &Actor, ctx: &BookingContext) -> Result<(), EngineError> {
        if is_booking_customer(actor, &ctx.booking) {
            return Ok(());
        }
        self.authorize_owner(actor, &ctx.business)
    }

    /// Inserts `booking` under a fresh code, retrying on code collisions.
    fn insert_with_code(&self, conn: &Connection, mut booking: Booking) -> Result<Booking, EngineError> {
        for attempt in 1..=self.config.booking_code_attempts {
            booking.booking_code = (self.code_generator)();
            match queries::insert_booking(conn, &booking) {
                Ok(()) => return Ok(booking),
                Err(e) if db::is_unique_violation(&e) => {
                    if queries::get_booking_by_code(conn, &booking.booking_code)?.is_none() {
                        // not a code clash: the slot already hosts an active booking
                        return Err(EngineError::SlotAlreadyReserved(booking.slot_id.clone()));
                    }
                    tracing::warn!(attempt, code = %booking.booking_code, "booking code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Internal(anyhow::anyhow!(
            "could not allocate a unique booking code after {} attempts",
            self.config.booking_code_attempts
        )))
    }

    /// Reserves the slot and records a pending booking in one transaction.
    /// Concurrent callers on the same slot are serialized by the write lock;
    /// exactly one of them sees the slot free.
    pub async fn create_booking(
        &self,
        business_id: &str,
        slot_id: &str,
        customer: CustomerInfo,
        service_ids: Vec<String>,
    ) -> Result<Booking, EngineError> {
        self.sweeper.lazy_heal().await;

        if customer.name.trim().is_empty() || customer.phone.trim().is_empty() {
            return Err(EngineError::Policy(
                "customer name and phone are required".to_string(),
            ));
        }

        let now = Utc::now().naive_utc();
        let until = now + Duration::minutes(self.config.reservation_timeout_minutes);

        let (ctx, displaced) = atomically(&self.db, |tx| {
            let slot = queries::get_slot(tx, slot_id)?
                .ok_or_else(|| EngineError::SlotNotFound(slot_id.to_string()))?;
            if slot.business_id != business_id {
                return Err(EngineError::BusinessMismatch {
                    slot_id: slot_id.to_string(),
                    business_id: business_id.to_string(),
                });
            }
            let business = queries::get_business(tx, business_id)?
                .ok_or_else(|| EngineError::BusinessNotFound(business_id.to_string()))?;
            if business.suspended {
                return Err(EngineError::BusinessSuspended(business_id.to_string()));
            }

            match slot.effective_status(now) {
                SlotStatus::Booked => return Err(EngineError::SlotAlreadyBooked(slot_id.to_string())),
                SlotStatus::Reserved => return Err(EngineError::SlotAlreadyReserved(slot_id.to_string())),
                SlotStatus::Available => {}
            }

            let displaced = if slot.status == SlotStatus::Reserved {
                displace_stale_booking(tx, slot_id, now)?
            } else {
                None
            };

            SlotMachine::transition(SlotStatus::Available, SlotEvent::Reserve)?;
            if !queries::reserve_free_slot(tx, slot_id, &until, &now)? {
                return Err(EngineError::SlotAlreadyReserved(slot_id.to_string()));
            }

            let booking = self.insert_with_code(
                tx,
                Booking {
                    id: uuid::Uuid::new_v4().to_string(),
                    booking_code: String::new(),
                    business_id: business_id.to_string(),
                    slot_id: slot_id.to_string(),
                    customer_name: customer.name.trim().to_string(),
                    customer_phone: customer.phone.trim().to_string(),
                    service_ids: service_ids.clone(),
                    status: BookingStatus::Pending,
                    cancelled_by: None,
                    cancellation_reason: None,
                    no_show: false,
                    no_show_marked_by: None,
                    no_show_marked_at: None,
                    rescheduled_from_slot_id: None,
                    rescheduled_at: None,
                    rescheduled_by: None,
                    reschedule_reason: None,
                    confirmed_at: None,
                    created_at: now,
                    updated_at: now,
                },
            )?;
            let slot = queries::get_slot(tx, slot_id)?
                .ok_or_else(|| EngineError::SlotNotFound(slot_id.to_string()))?;

            Ok((
                BookingContext {
                    booking,
                    slot,
                    business,
                },
                displaced,
            ))
        })?;

        if let Some(stale) = &displaced {
            tracing::info!(booking_id = %stale.booking_code, slot_id = %slot_id, "expired stale booking on lapsed hold");
            self.hooks.transition(
                BookingMachine::ENTITY,
                &stale.id,
                BookingStatus::Pending,
                BookingStatus::Cancelled,
                BookingEvent::Expire,
                "system",
            );
        }
        let actor = Actor::Customer(ctx.booking.customer_phone.clone()).label();
        self.hooks.transition(
            SlotMachine::ENTITY,
            slot_id,
            SlotStatus::Available,
            SlotStatus::Reserved,
            SlotEvent::Reserve,
            &actor,
        );
        self.hooks
            .transition(BookingMachine::ENTITY, &ctx.booking.id, "none", BookingStatus::Pending, "create", &actor);
        tracing::info!(booking_id = %ctx.booking.booking_code, slot_id = %slot_id, "booking created");

        self.hooks
            .notify_customer(BookingNotice::Created, &ctx.booking, &ctx.slot, &ctx.business)
            .await;
        self.hooks
            .notify_owner(BookingNotice::Created, &ctx.booking, &ctx.slot, &ctx.business)
            .await;

        Ok(ctx.booking)
    }

    /// pending → confirmed and reserved → booked, atomically.
    pub async fn confirm_booking(&self, booking_code: &str, actor: &Actor) -> Result<Booking, EngineError> {
        self.sweeper.lazy_heal().await;
        let now = Utc::now().naive_utc();

        let ctx = atomically(&self.db, |tx| {
            let ctx = load_context(tx, booking_code)?;
            self.authorize_owner(actor, &ctx.business)?;
            confirm_and_book(tx, &ctx.booking, &ctx.slot, now)?;
            Ok(BookingContext {
                booking: reload_booking(tx, &ctx.booking.id)?,
                ..ctx
            })
        })?;

        let label = actor.label();
        self.hooks.transition(
            SlotMachine::ENTITY,
            &ctx.slot.id,
            SlotStatus::Reserved,
            SlotStatus::Booked,
            SlotEvent::Book,
            &label,
        );
        self.hooks.transition(
            BookingMachine::ENTITY,
            &ctx.booking.id,
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingEvent::Confirm,
            &label,
        );
        tracing::info!(booking_id = %booking_code, slot_id = %ctx.slot.id, "booking confirmed");

        self.hooks
            .notify_customer(BookingNotice::Confirmed, &ctx.booking, &ctx.slot, &ctx.business)
            .await;
        Ok(ctx.booking)
    }

    pub async fn reject_booking(
        &self,
        booking_code: &str,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<Booking, EngineError> {
        self.sweeper.lazy_heal().await;
        let now = Utc::now().naive_utc();

        let (ctx, released) = atomically(&self.db, |tx| {
            let ctx = load_context(tx, booking_code)?;
            self.authorize_owner(actor, &ctx.business)?;

            let to = BookingMachine::transition(ctx.booking.status, BookingEvent::Reject)?;
            if !queries::transition_booking(tx, &ctx.booking.id, ctx.booking.status, to, None, reason, &now)? {
                return Err(EngineError::Conflict(format!("booking {booking_code} changed concurrently")));
            }
            let released = release_in_tx(tx, &ctx.slot, now)?;
            Ok((
                BookingContext {
                    booking: reload_booking(tx, &ctx.booking.id)?,
                    ..ctx
                },
                released,
            ))
        })?;

        let label = actor.label();
        if released {
            self.hooks.transition(
                SlotMachine::ENTITY,
                &ctx.slot.id,
                ctx.slot.status,
                SlotStatus::Available,
                SlotEvent::Release,
                &label,
            );
        }
        self.hooks.transition(
            BookingMachine::ENTITY,
            &ctx.booking.id,
            BookingStatus::Pending,
            BookingStatus::Rejected,
            BookingEvent::Reject,
            &label,
        );
        tracing::info!(booking_id = %booking_code, "booking rejected");

        self.hooks
            .notify_customer(BookingNotice::Rejected, &ctx.booking, &ctx.slot, &ctx.business)
            .await;
        Ok(ctx.booking)
    }

    /// Customer-side cancellation. Confirmed bookings cannot be cancelled
    /// inside the customer cutoff window.
    pub async fn cancel_booking_by_customer(
        &self,
        booking_code: &str,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<Booking, EngineError> {
        self.cancel(booking_code, actor, CancelledBy::Customer, reason).await
    }

    pub async fn cancel_booking_by_owner(
        &self,
        booking_code: &str,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<Booking, EngineError> {
        self.cancel(booking_code, actor, CancelledBy::Owner, reason).await
    }

    async fn cancel(
        &self,
        booking_code: &str,
        actor: &Actor,
        by: CancelledBy,
        reason: Option<&str>,
    ) -> Result<Booking, EngineError> {
        self.sweeper.lazy_heal().await;
        let now = Utc::now().naive_utc();

        let (from, ctx, released) = atomically(&self.db, |tx| {
            let ctx = load_context(tx, booking_code)?;
            match by {
                CancelledBy::Customer => {
                    if !is_booking_customer(actor, &ctx.booking) && *actor != Actor::System {
                        return Err(EngineError::Forbidden(ctx.business.id.clone()));
                    }
                }
                _ => self.authorize_owner(actor, &ctx.business)?,
            }
            if ctx.booking.no_show {
                return Err(EngineError::Policy(format!(
                    "booking {booking_code} was marked as a no-show"
                )));
            }

            let from = ctx.booking.status;
            let to = BookingMachine::transition(from, BookingEvent::Cancel)?;

            if from == BookingStatus::Confirmed {
                let hours = match by {
                    CancelledBy::Customer => self.config.customer_cancellation_cutoff_hours,
                    _ => self.config.owner_cancellation_cutoff_hours,
                };
                if ctx.slot.starts_at() - now < Duration::hours(hours) {
                    return Err(EngineError::CancellationWindow { hours });
                }
            }

            if !queries::transition_booking(tx, &ctx.booking.id, from, to, Some(by), reason, &now)? {
                return Err(EngineError::Conflict(format!("booking {booking_code} changed concurrently")));
            }
            let released = release_in_tx(tx, &ctx.slot, now)?;
            Ok((
                from,
                BookingContext {
                    booking: reload_booking(tx, &ctx.booking.id)?,
                    ..ctx
                },
                released,
            ))
        })?;

        let label = actor.label();
        if released {
            self.hooks.transition(
                SlotMachine::ENTITY,
                &ctx.slot.id,
                ctx.slot.status,
                SlotStatus::Available,
                SlotEvent::Release,
                &label,
            );
        }
        self.hooks.transition(
            BookingMachine::ENTITY,
            &ctx.booking.id,
            from,
            BookingStatus::Cancelled,
            BookingEvent::Cancel,
            &label,
        );
        tracing::info!(booking_id = %booking_code, cancelled_by = by.as_str(), "booking cancelled");

        match by {
            CancelledBy::Customer => {
                self.hooks
                    .notify_owner(BookingNotice::Cancelled, &ctx.booking, &ctx.slot, &ctx.business)
                    .await
            }
            _ => {
                self.hooks
                    .notify_customer(BookingNotice::Cancelled, &ctx.booking, &ctx.slot, &ctx.business)
                    .await
            }
        }
        Ok(ctx.booking)
    }

    /// Moves an active booking to another slot of the same business.
    ///
    /// Runs as separate steps: reserve the new slot (expiring any pending
    /// booking left on a lapsed hold), book it if the booking is already
    /// confirmed, repoint the booking, release the old slot. If repointing
    /// fails the new slot is released again. Moving a pending booking
    /// restarts its reservation TTL.
    pub async fn reschedule_booking(
        &self,
        booking_code: &str,
        new_slot_id: &str,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<Booking, EngineError> {
        self.sweeper.lazy_heal().await;
        let now = Utc::now().naive_utc();
        let until = now + Duration::minutes(self.config.reservation_timeout_minutes);

        let (ctx, new_slot) = {
            let conn = db::lock(&self.db);
            let ctx = load_context(&conn, booking_code)?;
            let new_slot = queries::get_slot(&conn, new_slot_id)?
                .ok_or_else(|| EngineError::SlotNotFound(new_slot_id.to_string()))?;
            (ctx, new_slot)
        };

        self.authorize_party(actor, &ctx)?;
        if ctx.booking.no_show {
            return Err(EngineError::Policy(format!(
                "booking {booking_code} was marked as a no-show"
            )));
        }
        if !matches!(ctx.booking.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::InvalidTransition {
                entity: BookingMachine::ENTITY,
                from: ctx.booking.status.to_string(),
                event: "reschedule".to_string(),
            });
        }
        if new_slot.business_id != ctx.booking.business_id {
            return Err(EngineError::BusinessMismatch {
                slot_id: new_slot.id.clone(),
                business_id: ctx.booking.business_id.clone(),
            });
        }
        if new_slot.id == ctx.slot.id {
            return Err(EngineError::Policy(
                "new slot must differ from the current slot".to_string(),
            ));
        }
        match new_slot.effective_status(now) {
            SlotStatus::Booked => return Err(EngineError::SlotAlreadyBooked(new_slot.id.clone())),
            SlotStatus::Reserved => return Err(EngineError::SlotAlreadyReserved(new_slot.id.clone())),
            SlotStatus::Available => {}
        }

        let label = actor.label();
        let confirmed = ctx.booking.status == BookingStatus::Confirmed;

        let displaced = atomically(&self.db, |tx| {
            let slot = queries::get_slot(tx, &new_slot.id)?
                .ok_or_else(|| EngineError::SlotNotFound(new_slot.id.clone()))?;
            let displaced = if slot.status == SlotStatus::Reserved {
                displace_stale_booking(tx, &slot.id, now)?
            } else {
                None
            };
            SlotMachine::transition(SlotStatus::Available, SlotEvent::Reserve)?;
            if !queries::reserve_free_slot(tx, &slot.id, &until, &now)? {
                return Err(EngineError::SlotAlreadyReserved(slot.id.clone()));
            }
            Ok(displaced)
        })?;
        if let Some(stale) = &displaced {
            tracing::info!(booking_id = %stale.booking_code, slot_id = %new_slot.id, "expired stale booking on lapsed hold");
            self.hooks.transition(
                BookingMachine::ENTITY,
                &stale.id,
                BookingStatus::Pending,
                BookingStatus::Cancelled,
                BookingEvent::Expire,
                "system",
            );
        }

        if confirmed {
            let booked = {
                let conn = db::lock(&self.db);
                queries::book_slot(&conn, &new_slot.id, &now)
            };
            match booked {
                Ok(true) => {}
                Ok(false) => {
                    self.release_after_failed_move(&new_slot.id);
                    return Err(EngineError::Conflict(format!(
                        "slot {} changed while rescheduling",
                        new_slot.id
                    )));
                }
                Err(e) => {
                    self.release_after_failed_move(&new_slot.id);
                    return Err(e.into());
                }
            }
        }

        let moved = {
            let conn = db::lock(&self.db);
            queries::move_booking(
                &conn,
                &ctx.booking.id,
                &ctx.slot.id,
                &new_slot.id,
                &label,
                reason,
                &now,
            )
        };
        match moved {
            Ok(true) => {}
            Ok(false) => {
                self.release_after_failed_move(&new_slot.id);
                return Err(EngineError::Conflict(format!(
                    "booking {booking_code} changed while rescheduling"
                )));
            }
            Err(e) => {
                self.release_after_failed_move(&new_slot.id);
                return Err(e.into());
            }
        }

        let released_old = {
            let conn = db::lock(&self.db);
            queries::release_slot(&conn, &ctx.slot.id, &now)
        };
        let released_old = released_old.unwrap_or_else(|e| {
            tracing::error!(error = %e, slot_id = %ctx.slot.id, "failed to release previous slot after reschedule");
            false
        });

        self.hooks.transition(
            SlotMachine::ENTITY,
            &new_slot.id,
            SlotStatus::Available,
            SlotStatus::Reserved,
            SlotEvent::Reserve,
            &label,
        );
        if confirmed {
            self.hooks.transition(
                SlotMachine::ENTITY,
                &new_slot.id,
                SlotStatus::Reserved,
                SlotStatus::Booked,
                SlotEvent::Book,
                &label,
            );
        }
        if released_old {
            self.hooks.transition(
                SlotMachine::ENTITY,
                &ctx.slot.id,
                ctx.slot.status,
                SlotStatus::Available,
                SlotEvent::Release,
                &label,
            );
        }
        self.hooks.transition(
            BookingMachine::ENTITY,
            &ctx.booking.id,
            ctx.booking.status,
            ctx.booking.status,
            "reschedule",
            &label,
        );
        tracing::info!(
            booking_id = %booking_code,
            from_slot = %ctx.slot.id,
            to_slot = %new_slot.id,
            "booking rescheduled"
        );

        let (booking, slot) = {
            let conn = db::lock(&self.db);
            let booking = reload_booking(&conn, &ctx.booking.id)?;
            let slot = queries::get_slot(&conn, &new_slot.id)?
                .ok_or_else(|| EngineError::SlotNotFound(new_slot.id.clone()))?;
            (booking, slot)
        };
        self.hooks
            .notify_customer(BookingNotice::Rescheduled, &booking, &slot, &ctx.business)
            .await;
        Ok(booking)
    }

    fn release_after_failed_move(&self, slot_id: &str) {
        let now = Utc::now().naive_utc();
        let conn = db::lock(&self.db);
        match queries::release_slot(&conn, slot_id, &now) {
            Ok(_) => tracing::warn!(slot_id = %slot_id, "rolled back new slot after failed reschedule"),
            Err(e) => tracing::error!(error = %e, slot_id = %slot_id, "failed to roll back new slot"),
        }
    }

    /// Flags a confirmed booking whose appointment has started as a no-show
    /// and frees the slot. Allowed once.
    pub async fn mark_no_show(&self, booking_code: &str, actor: &Actor) -> Result<Booking, EngineError> {
        self.sweeper.lazy_heal().await;
        let now = Utc::now().naive_utc();
        let label = actor.label();

        let (ctx, released) = atomically(&self.db, |tx| {
            let ctx = load_context(tx, booking_code)?;
            self.authorize_owner(actor, &ctx.business)?;

            if ctx.booking.status != BookingStatus::Confirmed {
                return Err(EngineError::InvalidTransition {
                    entity: BookingMachine::ENTITY,
                    from: ctx.booking.status.to_string(),
                    event: "no_show".to_string(),
                });
            }
            if ctx.booking.no_show {
                return Err(EngineError::Conflict(format!(
                    "booking {booking_code} is already marked as a no-show"
                )));
            }
            if now < ctx.slot.starts_at() {
                return Err(EngineError::Policy(
                    "appointment has not started yet".to_string(),
                ));
            }

            if !queries::mark_no_show(tx, &ctx.booking.id, &label, &now)? {
                return Err(EngineError::Conflict(format!("booking {booking_code} changed concurrently")));
            }
            let released = release_in_tx(tx, &ctx.slot, now)?;
            Ok((
                BookingContext {
                    booking: reload_booking(tx, &ctx.booking.id)?,
                    ..ctx
                },
                released,
            ))
        })?;

        if released {
            self.hooks.transition(
                SlotMachine::ENTITY,
                &ctx.slot.id,
                ctx.slot.status,
                SlotStatus::Available,
                SlotEvent::Release,
                &label,
            );
        }
        self.hooks.transition(
            BookingMachine::ENTITY,
            &ctx.booking.id,
            BookingStatus::Confirmed,
            BookingStatus::Confirmed,
            "no_show",
            &label,
        );
        tracing::info!(booking_id = %booking_code, "booking marked as no-show");
        Ok(ctx.booking)
    }

    pub async fn get_booking(&self, booking_code: &str) -> Result<Booking, EngineError> {
        self.sweeper.lazy_heal().await;
        let conn = db::lock(&self.db);
        queries::get_booking_by_code(&conn, booking_code)?
            .ok_or_else(|| EngineError::BookingNotFound(booking_code.to_string()))
    }

    pub fn list_bookings_for_slot(&self, slot_id: &str) -> Result<Vec<Booking>, EngineError> {
        let conn = db::lock(&self.db);
        Ok(queries::list_bookings_for_slot(&conn, slot_id)?)
    }

    pub async fn expire_old_bookings(&self, source: ExpirySource) -> Result<ExpiryReport, EngineError> {
        self.sweeper.expire_old_bookings(source).await
    }
}
