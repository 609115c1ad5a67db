//! Expiry of abandoned pending bookings and lapsed slot holds.
//!
//! Two call sites share one operation: the scheduled task (`Cron`) and the
//! opportunistic heal at the start of booking reads and writes (`LazyHeal`).
//! They differ only in the `source` label on the emitted metrics, so a
//! stalled scheduler shows up as lazy-heal volume rather than stale data.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::atomically;
use super::notify::{BookingNotice, Hooks};
use super::payments::PaymentService;
use super::slots::SlotManager;
use crate::config::EngineConfig;
use crate::db::{self, queries, Db};
use crate::errors::EngineError;
use crate::lifecycle::{BookingEvent, BookingMachine, SlotEvent, SlotMachine, StateMachine};
use crate::models::{Booking, BookingStatus, Business, CancelledBy, Slot, SlotStatus};

const EXPIRED_REASON: &str = "booking expired before confirmation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirySource {
    Cron,
    LazyHeal,
}

impl ExpirySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirySource::Cron => "expired_by_cron",
            ExpirySource::LazyHeal => "expired_by_lazy_heal",
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ExpiryReport {
    pub bookings_expired: Vec<String>,
    pub slots_released: usize,
    pub failures: usize,
}

struct ExpiredBooking {
    booking: Booking,
    slot: Slot,
    business: Business,
    slot_released: bool,
}

#[derive(Clone)]
pub struct ExpirySweeper {
    db: Db,
    config: EngineConfig,
    hooks: Hooks,
    slots: SlotManager,
}

impl ExpirySweeper {
    pub fn new(db: Db, config: EngineConfig, hooks: Hooks, slots: SlotManager) -> Self {
        Self {
            db,
            config,
            hooks,
            slots,
        }
    }

    /// Cancels pending bookings past the TTL or sitting on a lapsed hold,
    /// releasing their slots, then sweeps any remaining lapsed holds.
    /// Each booking is expired in its own transaction; one failure does not
    /// stop the rest.
    pub async fn expire_old_bookings(&self, source: ExpirySource) -> Result<ExpiryReport, EngineError> {
        let now = Utc::now().naive_utc();
        let candidates = self.candidates(now)?;

        let mut report = ExpiryReport::default();
        let mut expired = vec![];
        for booking_id in candidates {
            match self.expire_one(&booking_id, now) {
                Ok(Some(item)) => expired.push(item),
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    tracing::error!(error = %e, booking_id = %booking_id, source = source.as_str(), "failed to expire booking");
                }
            }
        }

        let swept = self.slots.sweep_expired()?;
        report.slots_released = swept + expired.iter().filter(|e| e.slot_released).count();

        for item in &expired {
            self.hooks.transition(
                BookingMachine::ENTITY,
                &item.booking.id,
                BookingStatus::Pending,
                BookingStatus::Cancelled,
                BookingEvent::Expire,
                "system",
            );
            if item.slot_released {
                self.hooks.transition(
                    SlotMachine::ENTITY,
                    &item.slot.id,
                    SlotStatus::Reserved,
                    SlotStatus::Available,
                    SlotEvent::Expire,
                    "system",
                );
            }
            report.bookings_expired.push(item.booking.booking_code.clone());
        }

        if !report.bookings_expired.is_empty() {
            metrics::counter!("slotbook_bookings_expired_total", "source" => source.as_str())
                .increment(report.bookings_expired.len() as u64);
        }
        if report.slots_released > 0 {
            metrics::counter!("slotbook_slots_released_total", "source" => source.as_str())
                .increment(report.slots_released as u64);
        }
        if !report.bookings_expired.is_empty() || report.slots_released > 0 {
            tracing::info!(
                source = source.as_str(),
                bookings = report.bookings_expired.len(),
                slots = report.slots_released,
                failures = report.failures,
                "expired stale reservations"
            );
        }

        for item in &expired {
            self.hooks
                .notify_customer(BookingNotice::Expired, &item.booking, &item.slot, &item.business)
                .await;
        }

        Ok(report)
    }

    /// Runs the expiry ahead of a booking operation. Never fails the caller.
    pub async fn lazy_heal(&self) {
        if !self.config.lazy_heal {
            return;
        }
        if let Err(e) = self.expire_old_bookings(ExpirySource::LazyHeal).await {
            metrics::counter!("slotbook_lazy_heal_failures_total").increment(1);
            tracing::error!(error = %e, "lazy heal failed");
        }
    }

    /// Starts the scheduled sweep. Payments past their expiry are swept on
    /// the same tick.
    pub fn spawn(self, payments: PaymentService, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = every.as_secs(), "expiry sweeper started");

            loop {
                ticker.tick().await;
                if let Err(e) = self.expire_old_bookings(ExpirySource::Cron).await {
                    tracing::error!(error = %e, "scheduled booking expiry failed");
                }
                if let Err(e) = payments.expire_payments() {
                    tracing::error!(error = %e, "scheduled payment expiry failed");
                }
            }
        })
    }

    fn candidates(&self, now: NaiveDateTime) -> Result<Vec<String>, EngineError> {
        let cutoff = now - ChronoDuration::minutes(self.config.pending_booking_ttl_minutes);
        let conn = db::lock(&self.db);
        let stale = queries::find_stale_pending_bookings(&conn, &cutoff)?;
        let lapsed = queries::find_pending_on_lapsed_slots(&conn, &now)?;

        let mut seen = HashSet::new();
        Ok(stale
            .into_iter()
            .chain(lapsed)
            .filter(|b| seen.insert(b.id.clone()))
            .map(|b| b.id)
            .collect())
    }

    fn expire_one(&self, booking_id: &str, now: NaiveDateTime) -> Result<Option<ExpiredBooking>, EngineError> {
        atomically(&self.db, |tx| {
            // re-read under the write lock; someone may have confirmed it since
            let Some(booking) = queries::get_booking(tx, booking_id)? else {
                return Ok(None);
            };
            if booking.status != BookingStatus::Pending {
                return Ok(None);
            }

            let to = BookingMachine::transition(booking.status, BookingEvent::Expire)?;
            if !queries::transition_booking(
                tx,
                &booking.id,
                BookingStatus::Pending,
                to,
                Some(CancelledBy::System),
                Some(EXPIRED_REASON),
                &now,
            )? {
                return Ok(None);
            }

            let slot = queries::get_slot(tx, &booking.slot_id)?
                .ok_or_else(|| EngineError::SlotNotFound(booking.slot_id.clone()))?;
            let slot_released = queries::unreserve_slot(tx, &slot.id, &now)?;
            let business = queries::get_business(tx, &booking.business_id)?
                .ok_or_else(|| EngineError::BusinessNotFound(booking.business_id.clone()))?;
            let booking = queries::get_booking(tx, &booking.id)?
                .ok_or_else(|| EngineError::BookingNotFound(booking.id.clone()))?;

            Ok(Some(ExpiredBooking {
                booking,
                slot,
                business,
                slot_released,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::services::notify::{LogDispatcher, TracingAuditSink};
    use chrono::{NaiveDate, NaiveTime};

    fn setup() -> (ExpirySweeper, Db) {
        let db = db::shared(db::init_db(":memory:").unwrap());
        queries::upsert_business(
            &db::lock(&db),
            &Business {
                id: "biz-1".to_string(),
                name: "Test Salon".to_string(),
                owner_id: "owner-1".to_string(),
                owner_phone: None,
                upi_id: None,
                suspended: false,
            },
        )
        .unwrap();
        let hooks = Hooks::new(Arc::new(LogDispatcher), Arc::new(TracingAuditSink));
        let config = EngineConfig::default();
        let slots = SlotManager::new(db.clone(), config.clone(), hooks.clone());
        (ExpirySweeper::new(db.clone(), config, hooks, slots), db)
    }

    /// Inserts a reserved slot plus a pending booking created `age` ago with
    /// the hold ending at `hold_until`.
    fn seed_pending(db: &Db, id: &str, start: &str, age: ChronoDuration, hold_until: NaiveDateTime) {
        let now = Utc::now().naive_utc();
        let start_time = NaiveTime::parse_from_str(start, "%H:%M").unwrap();
        let conn = db::lock(db);
        queries::insert_slot(
            &conn,
            &Slot {
                id: format!("slot-{id}"),
                business_id: "biz-1".to_string(),
                date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
                start_time,
                end_time: start_time + ChronoDuration::minutes(30),
                status: SlotStatus::Reserved,
                reserved_until: Some(hold_until),
                created_at: now,
                updated_at: now,
            },
        )
        .unwrap();
        queries::insert_booking(
            &conn,
            &Booking {
                id: format!("bk-{id}"),
                booking_code: format!("BK{id}"),
                business_id: "biz-1".to_string(),
                slot_id: format!("slot-{id}"),
                customer_name: "Asha".to_string(),
                customer_phone: "+919800000001".to_string(),
                service_ids: vec![],
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
                created_at: now - age,
                updated_at: now - age,
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_expires_old_pending_booking_and_releases_slot() {
        let (sweeper, db) = setup();
        let now = Utc::now().naive_utc();
        seed_pending(&db, "old", "09:00", ChronoDuration::minutes(30), now + ChronoDuration::minutes(5));
        seed_pending(&db, "new", "09:30", ChronoDuration::minutes(1), now + ChronoDuration::minutes(9));

        let report = sweeper.expire_old_bookings(ExpirySource::Cron).await.unwrap();
        assert_eq!(report.bookings_expired, vec!["BKold".to_string()]);
        assert_eq!(report.slots_released, 1);
        assert_eq!(report.failures, 0);

        let conn = db::lock(&db);
        let old = queries::get_booking(&conn, "bk-old").unwrap().unwrap();
        assert_eq!(old.status, BookingStatus::Cancelled);
        assert_eq!(old.cancelled_by, Some(CancelledBy::System));
        let slot = queries::get_slot(&conn, "slot-old").unwrap().unwrap();
        assert_eq!(slot.status, SlotStatus::Available);
        assert!(slot.reserved_until.is_none());

        let fresh = queries::get_booking(&conn, "bk-new").unwrap().unwrap();
        assert_eq!(fresh.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_lapsed_hold_expires_young_booking() {
        let (sweeper, db) = setup();
        let now = Utc::now().naive_utc();
        seed_pending(&db, "lapsed", "10:00", ChronoDuration::minutes(2), now - ChronoDuration::seconds(5));

        let report = sweeper.expire_old_bookings(ExpirySource::LazyHeal).await.unwrap();
        assert_eq!(report.bookings_expired.len(), 1);

        let conn = db::lock(&db);
        assert_eq!(
            queries::get_booking(&conn, "bk-lapsed").unwrap().unwrap().status,
            BookingStatus::Cancelled
        );
        assert_eq!(
            queries::get_slot(&conn, "slot-lapsed").unwrap().unwrap().status,
            SlotStatus::Available
        );
    }

    #[tokio::test]
    async fn test_expiry_is_idempotent() {
        let (sweeper, db) = setup();
        let now = Utc::now().naive_utc();
        seed_pending(&db, "old", "09:00", ChronoDuration::minutes(30), now + ChronoDuration::minutes(5));

        let first = sweeper.expire_old_bookings(ExpirySource::Cron).await.unwrap();
        let second = sweeper.expire_old_bookings(ExpirySource::LazyHeal).await.unwrap();
        assert_eq!(first.bookings_expired.len(), 1);
        assert!(second.bookings_expired.is_empty());
        assert_eq!(second.slots_released, 0);
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(ExpirySource::Cron.as_str(), "expired_by_cron");
        assert_eq!(ExpirySource::LazyHeal.as_str(), "expired_by_lazy_heal");
    }
}
