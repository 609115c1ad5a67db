use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};

use super::{fmt_date, fmt_time, fmt_ts, parse_date, parse_opt_ts, parse_time, parse_ts};
use crate::models::{
    Booking, BookingStatus, Business, CancelledBy, Payment, PaymentAttempt, PaymentStatus, Slot,
    SlotStatus,
};

fn query_opt<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    parse: fn(&Row) -> anyhow::Result<T>,
) -> anyhow::Result<Option<T>> {
    conn.query_row(sql, params, |row| Ok(parse(row)))
        .optional()?
        .transpose()
}

fn query_all<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    parse: fn(&Row) -> anyhow::Result<T>,
) -> anyhow::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| Ok(parse(row)))?;

    let mut items = vec![];
    for row in rows {
        items.push(row??);
    }
    Ok(items)
}

// ── Businesses ──

pub fn upsert_business(conn: &Connection, business: &Business) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO businesses (id, name, owner_id, owner_phone, upi_id, suspended)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           owner_id = excluded.owner_id,
           owner_phone = excluded.owner_phone,
           upi_id = excluded.upi_id,
           suspended = excluded.suspended",
        params![
            business.id,
            business.name,
            business.owner_id,
            business.owner_phone,
            business.upi_id,
            business.suspended,
        ],
    )?;
    Ok(())
}

pub fn get_business(conn: &Connection, id: &str) -> anyhow::Result<Option<Business>> {
    query_opt(
        conn,
        "SELECT id, name, owner_id, owner_phone, upi_id, suspended FROM businesses WHERE id = ?1",
        params![id],
        |row| {
            Ok(Business {
                id: row.get(0)?,
                name: row.get(1)?,
                owner_id: row.get(2)?,
                owner_phone: row.get(3)?,
                upi_id: row.get(4)?,
                suspended: row.get(5)?,
            })
        },
    )
}

pub fn set_business_suspended(conn: &Connection, id: &str, suspended: bool) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE businesses SET suspended = ?1 WHERE id = ?2",
        params![suspended, id],
    )?;
    Ok(count > 0)
}

// ── Slots ──

const SLOT_COLUMNS: &str =
    "id, business_id, date, start_time, end_time, status, reserved_until, created_at, updated_at";

fn parse_slot_row(row: &Row) -> anyhow::Result<Slot> {
    let date: String = row.get(2)?;
    let start_time: String = row.get(3)?;
    let end_time: String = row.get(4)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(Slot {
        id: row.get(0)?,
        business_id: row.get(1)?,
        date: parse_date(&date)?,
        start_time: parse_time(&start_time)?,
        end_time: parse_time(&end_time)?,
        status: SlotStatus::parse(&status)?,
        reserved_until: parse_opt_ts(row.get(6)?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub fn insert_slot(conn: &Connection, slot: &Slot) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO slots (id, business_id, date, start_time, end_time, status, reserved_until, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            slot.id,
            slot.business_id,
            fmt_date(&slot.date),
            fmt_time(&slot.start_time),
            fmt_time(&slot.end_time),
            slot.status.as_str(),
            slot.reserved_until.as_ref().map(fmt_ts),
            fmt_ts(&slot.created_at),
            fmt_ts(&slot.updated_at),
        ],
    )?;
    Ok(())
}

pub fn count_slots_for_date(
    conn: &Connection,
    business_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM slots WHERE business_id = ?1 AND date = ?2",
        params![business_id, fmt_date(date)],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn get_slot(conn: &Connection, id: &str) -> anyhow::Result<Option<Slot>> {
    query_opt(
        conn,
        &format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = ?1"),
        params![id],
        parse_slot_row,
    )
}

pub fn list_slots_for_date(
    conn: &Connection,
    business_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<Vec<Slot>> {
    query_all(
        conn,
        &format!(
            "SELECT {SLOT_COLUMNS} FROM slots WHERE business_id = ?1 AND date = ?2 ORDER BY start_time ASC"
        ),
        params![business_id, fmt_date(date)],
        parse_slot_row,
    )
}

/// available → reserved. Zero rows means the caller lost the race.
pub fn reserve_slot(
    conn: &Connection,
    id: &str,
    until: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE slots SET status = 'reserved', reserved_until = ?1, updated_at = ?2
         WHERE id = ?3 AND status = 'available'",
        params![fmt_ts(until), fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

/// Like `reserve_slot`, but also takes over a reservation whose hold lapsed.
pub fn reserve_free_slot(
    conn: &Connection,
    id: &str,
    until: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let now = fmt_ts(now);
    let count = conn.execute(
        "UPDATE slots SET status = 'reserved', reserved_until = ?1, updated_at = ?2
         WHERE id = ?3
           AND (status = 'available' OR (status = 'reserved' AND reserved_until <= ?2))",
        params![fmt_ts(until), now, id],
    )?;
    Ok(count > 0)
}

/// reserved (with a live hold) → booked.
pub fn book_slot(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let now = fmt_ts(now);
    let count = conn.execute(
        "UPDATE slots SET status = 'booked', reserved_until = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'reserved' AND reserved_until > ?1",
        params![now, id],
    )?;
    Ok(count > 0)
}

/// reserved | booked → available.
pub fn release_slot(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE slots SET status = 'available', reserved_until = NULL, updated_at = ?1
         WHERE id = ?2 AND status IN ('reserved', 'booked')",
        params![fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

/// Reverts a reservation made moments ago; `booked` slots are left alone.
pub fn unreserve_slot(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE slots SET status = 'available', reserved_until = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'reserved'",
        params![fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

/// Bulk reserved → available for every lapsed hold.
pub fn expire_lapsed_slots(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let now = fmt_ts(now);
    let count = conn.execute(
        "UPDATE slots SET status = 'available', reserved_until = NULL, updated_at = ?1
         WHERE status = 'reserved' AND reserved_until <= ?1",
        params![now],
    )?;
    Ok(count)
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, booking_code, business_id, slot_id, customer_name, customer_phone, service_ids, status, \
     cancelled_by, cancellation_reason, no_show, no_show_marked_by, no_show_marked_at, \
     rescheduled_from_slot_id, rescheduled_at, rescheduled_by, reschedule_reason, confirmed_at, \
     created_at, updated_at";

fn parse_booking_row(row: &Row) -> anyhow::Result<Booking> {
    let service_ids: String = row.get(6)?;
    let status: String = row.get(7)?;
    let cancelled_by: Option<String> = row.get(8)?;
    let created_at: String = row.get(18)?;
    let updated_at: String = row.get(19)?;

    Ok(Booking {
        id: row.get(0)?,
        booking_code: row.get(1)?,
        business_id: row.get(2)?,
        slot_id: row.get(3)?,
        customer_name: row.get(4)?,
        customer_phone: row.get(5)?,
        service_ids: serde_json::from_str(&service_ids)?,
        status: BookingStatus::parse(&status)?,
        cancelled_by: cancelled_by.as_deref().map(CancelledBy::parse).transpose()?,
        cancellation_reason: row.get(9)?,
        no_show: row.get(10)?,
        no_show_marked_by: row.get(11)?,
        no_show_marked_at: parse_opt_ts(row.get(12)?)?,
        rescheduled_from_slot_id: row.get(13)?,
        rescheduled_at: parse_opt_ts(row.get(14)?)?,
        rescheduled_by: row.get(15)?,
        reschedule_reason: row.get(16)?,
        confirmed_at: parse_opt_ts(row.get(17)?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, booking_code, business_id, slot_id, customer_name, customer_phone, service_ids, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            booking.id,
            booking.booking_code,
            booking.business_id,
            booking.slot_id,
            booking.customer_name,
            booking.customer_phone,
            serde_json::to_string(&booking.service_ids)?,
            booking.status.as_str(),
            fmt_ts(&booking.created_at),
            fmt_ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    query_opt(
        conn,
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        parse_booking_row,
    )
}

pub fn get_booking_by_code(conn: &Connection, code: &str) -> anyhow::Result<Option<Booking>> {
    query_opt(
        conn,
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_code = ?1"),
        params![code],
        parse_booking_row,
    )
}

pub fn list_bookings_for_slot(conn: &Connection, slot_id: &str) -> anyhow::Result<Vec<Booking>> {
    query_all(
        conn,
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE slot_id = ?1 ORDER BY created_at ASC"),
        params![slot_id],
        parse_booking_row,
    )
}

pub fn pending_booking_for_slot(conn: &Connection, slot_id: &str) -> anyhow::Result<Option<Booking>> {
    query_opt(
        conn,
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE slot_id = ?1 AND status = 'pending'"),
        params![slot_id],
        parse_booking_row,
    )
}

/// Conditional status change; `from` guards against a concurrent writer.
pub fn transition_booking(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    to: BookingStatus,
    cancelled_by: Option<CancelledBy>,
    reason: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let now = fmt_ts(now);
    let confirmed_at = (to == BookingStatus::Confirmed).then(|| now.clone());
    let count = conn.execute(
        "UPDATE bookings SET
           status = ?1,
           cancelled_by = COALESCE(?2, cancelled_by),
           cancellation_reason = COALESCE(?3, cancellation_reason),
           confirmed_at = COALESCE(?4, confirmed_at),
           updated_at = ?5
         WHERE id = ?6 AND status = ?7",
        params![
            to.as_str(),
            cancelled_by.map(|c| c.as_str()),
            reason,
            confirmed_at,
            now,
            id,
            from.as_str(),
        ],
    )?;
    Ok(count > 0)
}

pub fn mark_no_show(
    conn: &Connection,
    id: &str,
    marked_by: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let now = fmt_ts(now);
    let count = conn.execute(
        "UPDATE bookings SET no_show = 1, no_show_marked_by = ?1, no_show_marked_at = ?2, updated_at = ?2
         WHERE id = ?3 AND status = 'confirmed' AND no_show = 0",
        params![marked_by, now, id],
    )?;
    Ok(count > 0)
}

/// Points an active booking at a new slot and stamps reschedule lineage.
pub fn move_booking(
    conn: &Connection,
    id: &str,
    from_slot_id: &str,
    to_slot_id: &str,
    rescheduled_by: &str,
    reason: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let now = fmt_ts(now);
    let count = conn.execute(
        "UPDATE bookings SET
           slot_id = ?1,
           rescheduled_from_slot_id = ?2,
           rescheduled_at = ?3,
           rescheduled_by = ?4,
           reschedule_reason = ?5,
           updated_at = ?3
         WHERE id = ?6 AND slot_id = ?2 AND status IN ('pending', 'confirmed') AND no_show = 0",
        params![to_slot_id, from_slot_id, now, rescheduled_by, reason, id],
    )?;
    Ok(count > 0)
}

/// Pending bookings held since before `held_before`. A reschedule restarts
/// the clock.
pub fn find_stale_pending_bookings(
    conn: &Connection,
    held_before: &NaiveDateTime,
) -> anyhow::Result<Vec<Booking>> {
    query_all(
        conn,
        &format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE status = 'pending' AND COALESCE(rescheduled_at, created_at) <= ?1
             ORDER BY COALESCE(rescheduled_at, created_at) ASC"
        ),
        params![fmt_ts(held_before)],
        parse_booking_row,
    )
}

/// Pending bookings whose slot hold has lapsed.
pub fn find_pending_on_lapsed_slots(
    conn: &Connection,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<Booking>> {
    let columns = BOOKING_COLUMNS
        .split(", ")
        .map(|c| format!("b.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    query_all(
        conn,
        &format!(
            "SELECT {columns} FROM bookings b JOIN slots s ON s.id = b.slot_id
             WHERE b.status = 'pending' AND s.status = 'reserved' AND s.reserved_until <= ?1
             ORDER BY b.created_at ASC"
        ),
        params![fmt_ts(now)],
        parse_booking_row,
    )
}

// ── Payments ──

const PAYMENT_COLUMNS: &str = "id, booking_id, provider, amount_cents, refunded_cents, currency, status, idempotency_key, \
     expires_at, transaction_id, attempt_count, attempts, verification, completed_at, created_at, updated_at";

fn parse_payment_row(row: &Row) -> anyhow::Result<Payment> {
    let status: String = row.get(6)?;
    let expires_at: String = row.get(8)?;
    let attempts: String = row.get(11)?;
    let verification: String = row.get(12)?;
    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;

    Ok(Payment {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        provider: row.get(2)?,
        amount_cents: row.get(3)?,
        refunded_cents: row.get(4)?,
        currency: row.get(5)?,
        status: PaymentStatus::parse(&status)?,
        idempotency_key: row.get(7)?,
        expires_at: parse_ts(&expires_at)?,
        transaction_id: row.get(9)?,
        attempt_count: row.get(10)?,
        attempts: serde_json::from_str(&attempts)?,
        verification: serde_json::from_str(&verification)?,
        completed_at: parse_opt_ts(row.get(13)?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub fn insert_payment(conn: &Connection, payment: &Payment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO payments (id, booking_id, provider, amount_cents, currency, status, idempotency_key, expires_at, transaction_id, verification, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            payment.id,
            payment.booking_id,
            payment.provider,
            payment.amount_cents,
            payment.currency,
            payment.status.as_str(),
            payment.idempotency_key,
            fmt_ts(&payment.expires_at),
            payment.transaction_id,
            payment.verification.to_string(),
            fmt_ts(&payment.created_at),
            fmt_ts(&payment.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_payment(conn: &Connection, id: &str) -> anyhow::Result<Option<Payment>> {
    query_opt(
        conn,
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
        params![id],
        parse_payment_row,
    )
}

pub fn get_payment_by_idempotency_key(conn: &Connection, key: &str) -> anyhow::Result<Option<Payment>> {
    query_opt(
        conn,
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE idempotency_key = ?1"),
        params![key],
        parse_payment_row,
    )
}

pub fn active_payment_for_booking(conn: &Connection, booking_id: &str) -> anyhow::Result<Option<Payment>> {
    query_opt(
        conn,
        &format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE booking_id = ?1 AND status IN ('initiated', 'pending', 'processing')
             ORDER BY created_at DESC LIMIT 1"
        ),
        params![booking_id],
        parse_payment_row,
    )
}

pub fn complete_payment(
    conn: &Connection,
    id: &str,
    from: PaymentStatus,
    transaction_id: &str,
    verification: &serde_json::Value,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let now = fmt_ts(now);
    let count = conn.execute(
        "UPDATE payments SET status = 'completed', transaction_id = ?1, verification = ?2,
           completed_at = ?3, updated_at = ?3
         WHERE id = ?4 AND status = ?5",
        params![transaction_id, verification.to_string(), now, id, from.as_str()],
    )?;
    Ok(count > 0)
}

pub fn record_payment_failure(
    conn: &Connection,
    id: &str,
    from: PaymentStatus,
    attempts: &[PaymentAttempt],
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE payments SET status = 'failed', attempt_count = attempt_count + 1, attempts = ?1, updated_at = ?2
         WHERE id = ?3 AND status = ?4",
        params![
            serde_json::to_string(attempts)?,
            fmt_ts(now),
            id,
            from.as_str()
        ],
    )?;
    Ok(count > 0)
}

pub fn record_refund(
    conn: &Connection,
    id: &str,
    to: PaymentStatus,
    refunded_cents: i64,
    verification: &serde_json::Value,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE payments SET status = ?1, refunded_cents = ?2, verification = ?3, updated_at = ?4
         WHERE id = ?5 AND status = 'completed'",
        params![
            to.as_str(),
            refunded_cents,
            verification.to_string(),
            fmt_ts(now),
            id
        ],
    )?;
    Ok(count > 0)
}

pub fn expire_payment(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let now = fmt_ts(now);
    let count = conn.execute(
        "UPDATE payments SET status = 'expired', updated_at = ?1
         WHERE id = ?2 AND status = 'initiated' AND expires_at <= ?1",
        params![now, id],
    )?;
    Ok(count > 0)
}

pub fn find_expired_payment_ids(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM payments WHERE status = 'initiated' AND expires_at <= ?1 ORDER BY expires_at ASC",
    )?;
    let rows = stmt.query_map(params![fmt_ts(now)], |row| row.get(0))?;

    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}
