use chrono::{Duration, NaiveDate, Utc};

use super::atomically;
use super::notify::Hooks;
use crate::config::EngineConfig;
use crate::db::{self, queries, Db};
use crate::errors::EngineError;
use crate::lifecycle::{BookingEvent, BookingMachine, SlotEvent, SlotMachine, StateMachine};
use crate::models::{BookingStatus, CancelledBy, Slot, SlotConfig, SlotStatus};

pub const LAPSED_HOLD_REASON: &str = "reservation expired";

#[derive(Clone)]
pub struct SlotManager {
    db: Db,
    config: EngineConfig,
    hooks: Hooks,
}

impl SlotManager {
    pub fn new(db: Db, config: EngineConfig, hooks: Hooks) -> Self {
        Self { db, config, hooks }
    }

    /// Builds inventory for one business day. Skipped entirely when the date
    /// already has slots; returns what was created.
    pub fn generate_slots(
        &self,
        business_id: &str,
        date: NaiveDate,
        config: &SlotConfig,
    ) -> Result<Vec<Slot>, EngineError> {
        let intervals = config.intervals().map_err(|e| EngineError::Policy(e.to_string()))?;
        let now = Utc::now().naive_utc();

        let created = atomically(&self.db, |tx| {
            if queries::get_business(tx, business_id)?.is_none() {
                return Err(EngineError::BusinessNotFound(business_id.to_string()));
            }
            if queries::count_slots_for_date(tx, business_id, &date)? > 0 {
                return Ok(vec![]);
            }

            let mut created = Vec::with_capacity(intervals.len());
            for (start_time, end_time) in intervals {
                let slot = Slot {
                    id: uuid::Uuid::new_v4().to_string(),
                    business_id: business_id.to_string(),
                    date,
                    start_time,
                    end_time,
                    status: SlotStatus::Available,
                    reserved_until: None,
                    created_at: now,
                    updated_at: now,
                };
                queries::insert_slot(tx, &slot)?;
                created.push(slot);
            }
            Ok(created)
        })?;

        if created.is_empty() {
            tracing::debug!(business_id = %business_id, date = %date, "slots already generated, skipping");
        } else {
            tracing::info!(business_id = %business_id, date = %date, count = created.len(), "generated slots");
        }
        Ok(created)
    }

    pub fn get_slot(&self, slot_id: &str) -> Result<Slot, EngineError> {
        let conn = db::lock(&self.db);
        queries::get_slot(&conn, slot_id)?.ok_or_else(|| EngineError::SlotNotFound(slot_id.to_string()))
    }

    /// Slots a customer may pick. Lapsed holds count as available; nothing
    /// is written here.
    pub fn list_available(&self, business_id: &str, date: NaiveDate) -> Result<Vec<Slot>, EngineError> {
        let now = Utc::now().naive_utc();
        let slots = {
            let conn = db::lock(&self.db);
            queries::list_slots_for_date(&conn, business_id, &date)?
        };
        Ok(slots
            .into_iter()
            .filter(|s| s.effective_status(now) == SlotStatus::Available)
            .collect())
    }

    /// available → reserved. `Ok(false)` means another caller got there first.
    pub fn reserve(&self, slot_id: &str) -> Result<bool, EngineError> {
        let now = Utc::now().naive_utc();
        let until = now + Duration::minutes(self.config.reservation_timeout_minutes);

        let reserved = {
            let conn = db::lock(&self.db);
            if queries::get_slot(&conn, slot_id)?.is_none() {
                return Err(EngineError::SlotNotFound(slot_id.to_string()));
            }
            queries::reserve_slot(&conn, slot_id, &until, &now)?
        };

        if reserved {
            self.hooks
                .transition(SlotMachine::ENTITY, slot_id, SlotStatus::Available, SlotStatus::Reserved, SlotEvent::Reserve, "system");
        } else {
            tracing::debug!(slot_id = %slot_id, "reserve lost compare-and-swap");
        }
        Ok(reserved)
    }

    /// reserved → booked. Only a live reservation can be booked; anything
    /// else is reported as an invalid transition.
    pub fn book(&self, slot_id: &str) -> Result<(), EngineError> {
        let now = Utc::now().naive_utc();
        let conn = db::lock(&self.db);
        let slot = queries::get_slot(&conn, slot_id)?
            .ok_or_else(|| EngineError::SlotNotFound(slot_id.to_string()))?;

        SlotMachine::transition(slot.effective_status(now), SlotEvent::Book)?;
        if !queries::book_slot(&conn, slot_id, &now)? {
            return Err(EngineError::InvalidTransition {
                entity: SlotMachine::ENTITY,
                from: slot.effective_status(now).to_string(),
                event: SlotEvent::Book.to_string(),
            });
        }
        drop(conn);

        self.hooks
            .transition(SlotMachine::ENTITY, slot_id, slot.status, SlotStatus::Booked, SlotEvent::Book, "system");
        Ok(())
    }

    /// reserved | booked → available. `Ok(false)` when already available.
    pub fn release(&self, slot_id: &str) -> Result<bool, EngineError> {
        let now = Utc::now().naive_utc();
        let (from, released) = {
            let conn = db::lock(&self.db);
            let slot = queries::get_slot(&conn, slot_id)?
                .ok_or_else(|| EngineError::SlotNotFound(slot_id.to_string()))?;
            (slot.status, queries::release_slot(&conn, slot_id, &now)?)
        };

        if released {
            self.hooks
                .transition(SlotMachine::ENTITY, slot_id, from, SlotStatus::Available, SlotEvent::Release, "system");
        }
        Ok(released)
    }

    /// Returns every lapsed hold to `available`. Pending bookings still
    /// parked on those slots are expired in the same transaction so no
    /// reader sees a pending booking on an available slot.
    pub fn sweep_expired(&self) -> Result<usize, EngineError> {
        let now = Utc::now().naive_utc();

        let (orphaned, released) = atomically(&self.db, |tx| {
            let stale = queries::find_pending_on_lapsed_slots(tx, &now)?;
            let mut orphaned = vec![];
            for booking in stale {
                let to = BookingMachine::transition(booking.status, BookingEvent::Expire)?;
                if queries::transition_booking(
                    tx,
                    &booking.id,
                    BookingStatus::Pending,
                    to,
                    Some(CancelledBy::System),
                    Some(LAPSED_HOLD_REASON),
                    &now,
                )? {
                    orphaned.push(booking);
                }
            }
            let released = queries::expire_lapsed_slots(tx, &now)?;
            Ok((orphaned, released))
        })?;

        for booking in &orphaned {
            self.hooks.transition(
                SlotMachine::ENTITY,
                &booking.slot_id,
                SlotStatus::Reserved,
                SlotStatus::Available,
                SlotEvent::Expire,
                "system",
            );
            self.hooks.transition(
                BookingMachine::ENTITY,
                &booking.id,
                BookingStatus::Pending,
                BookingStatus::Cancelled,
                BookingEvent::Expire,
                "system",
            );
        }
        if released > 0 {
            tracing::info!(released, bookings_expired = orphaned.len(), "swept lapsed slot holds");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::Business;
    use crate::services::notify::{LogDispatcher, TracingAuditSink};
    use chrono::NaiveTime;

    fn setup() -> (SlotManager, Db) {
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
        (SlotManager::new(db.clone(), EngineConfig::default(), hooks), db)
    }

    fn hours(open: &str, close: &str, minutes: i64) -> SlotConfig {
        SlotConfig {
            opening_time: NaiveTime::parse_from_str(open, "%H:%M").unwrap(),
            closing_time: NaiveTime::parse_from_str(close, "%H:%M").unwrap(),
            slot_duration_minutes: minutes,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
    }

    #[test]
    fn test_generate_is_idempotent_per_date() {
        let (slots, _) = setup();
        let created = slots.generate_slots("biz-1", day(), &hours("09:00", "12:00", 30)).unwrap();
        assert_eq!(created.len(), 6);

        // a different config for the same date is not merged in
        let again = slots.generate_slots("biz-1", day(), &hours("09:00", "17:00", 60)).unwrap();
        assert!(again.is_empty());
        assert_eq!(slots.list_available("biz-1", day()).unwrap().len(), 6);
    }

    #[test]
    fn test_generate_unknown_business() {
        let (slots, _) = setup();
        let err = slots.generate_slots("nope", day(), &hours("09:00", "10:00", 30)).unwrap_err();
        assert_eq!(err.code(), "BUSINESS_NOT_FOUND");
    }

    #[test]
    fn test_reserve_book_release_cycle() {
        let (slots, _) = setup();
        let created = slots.generate_slots("biz-1", day(), &hours("09:00", "10:00", 30)).unwrap();
        let id = &created[0].id;

        assert!(slots.reserve(id).unwrap());
        assert!(!slots.reserve(id).unwrap());
        assert_eq!(slots.get_slot(id).unwrap().status, SlotStatus::Reserved);

        slots.book(id).unwrap();
        let booked = slots.get_slot(id).unwrap();
        assert_eq!(booked.status, SlotStatus::Booked);
        assert!(booked.reserved_until.is_none());

        let err = slots.book(id).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");

        assert!(slots.release(id).unwrap());
        assert!(!slots.release(id).unwrap());
        assert_eq!(slots.get_slot(id).unwrap().status, SlotStatus::Available);
    }

    #[test]
    fn test_book_rejects_available_slot() {
        let (slots, _) = setup();
        let created = slots.generate_slots("biz-1", day(), &hours("09:00", "10:00", 30)).unwrap();
        let err = slots.book(&created[0].id).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { entity: "slot", .. }));
    }

    #[test]
    fn test_reserve_unknown_slot_is_error() {
        let (slots, _) = setup();
        assert_eq!(slots.reserve("missing").unwrap_err().code(), "SLOT_NOT_FOUND");
    }

    #[test]
    fn test_sweep_expired_round_trip() {
        let (slots, db) = setup();
        let created = slots.generate_slots("biz-1", day(), &hours("09:00", "10:00", 30)).unwrap();
        let id = &created[0].id;
        assert!(slots.reserve(id).unwrap());

        // hold lapsed a minute ago; reads treat it as free before any sweep
        db::lock(&db)
            .execute(
                "UPDATE slots SET reserved_until = ?1 WHERE id = ?2",
                rusqlite::params![
                    db::fmt_ts(&(Utc::now().naive_utc() - Duration::minutes(1))),
                    id
                ],
            )
            .unwrap();
        assert_eq!(slots.list_available("biz-1", day()).unwrap().len(), 2);
        assert_eq!(slots.get_slot(id).unwrap().status, SlotStatus::Reserved);

        assert_eq!(slots.sweep_expired().unwrap(), 1);
        let swept = slots.get_slot(id).unwrap();
        assert_eq!(swept.status, SlotStatus::Available);
        assert!(swept.reserved_until.is_none());

        assert_eq!(slots.sweep_expired().unwrap(), 0);
    }
}
