//! Transition tables for the three coupled lifecycles.
//!
//! Each machine is a zero-sized type over a static table of
//! `(from, event) -> to` rules. A pair missing from the table and a pair
//! present but flagged `allowed: false` are indistinguishable to callers.

use std::fmt::{Debug, Display};

use crate::errors::EngineError;
use crate::models::{BookingStatus, PaymentStatus, SlotStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule<S, E> {
    pub from: S,
    pub event: E,
    pub to: S,
    pub allowed: bool,
}

const fn allow<S, E>(from: S, event: E, to: S) -> Rule<S, E> {
    Rule {
        from,
        event,
        to,
        allowed: true,
    }
}

const fn deny<S, E>(from: S, event: E, to: S) -> Rule<S, E> {
    Rule {
        from,
        event,
        to,
        allowed: false,
    }
}

pub trait StateMachine {
    type State: Copy + Eq + Debug + Display + 'static;
    type Event: Copy + Eq + Debug + Display + 'static;

    /// Name used in error messages and metrics labels.
    const ENTITY: &'static str;

    fn table() -> &'static [Rule<Self::State, Self::Event>];

    fn can_transition(from: Self::State, event: Self::Event) -> bool {
        Self::next_state(from, event).is_some()
    }

    /// First allowed target for `(from, event)`. Payment refunds have two
    /// targets; the first listed one is the default.
    fn next_state(from: Self::State, event: Self::Event) -> Option<Self::State> {
        Self::table()
            .iter()
            .find(|r| r.from == from && r.event == event && r.allowed)
            .map(|r| r.to)
    }

    fn validate(from: Self::State, to: Self::State, event: Self::Event) -> bool {
        Self::table()
            .iter()
            .any(|r| r.from == from && r.event == event && r.to == to && r.allowed)
    }

    fn transition(from: Self::State, event: Self::Event) -> Result<Self::State, EngineError> {
        Self::next_state(from, event).ok_or_else(|| EngineError::InvalidTransition {
            entity: Self::ENTITY,
            from: from.to_string(),
            event: event.to_string(),
        })
    }

    /// Like `transition`, for events with more than one permitted target.
    fn transition_to(
        from: Self::State,
        to: Self::State,
        event: Self::Event,
    ) -> Result<Self::State, EngineError> {
        if Self::validate(from, to, event) {
            Ok(to)
        } else {
            Err(EngineError::InvalidTransition {
                entity: Self::ENTITY,
                from: from.to_string(),
                event: event.to_string(),
            })
        }
    }
}

// ── Slot ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    Reserve,
    Book,
    Release,
    Expire,
}

impl Display for SlotEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SlotEvent {
    pub const ALL: [SlotEvent; 4] = [
        SlotEvent::Reserve,
        SlotEvent::Book,
        SlotEvent::Release,
        SlotEvent::Expire,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotEvent::Reserve => "reserve",
            SlotEvent::Book => "book",
            SlotEvent::Release => "release",
            SlotEvent::Expire => "expire",
        }
    }
}

static SLOT_TABLE: [Rule<SlotStatus, SlotEvent>; 8] = [
    allow(SlotStatus::Available, SlotEvent::Reserve, SlotStatus::Reserved),
    allow(SlotStatus::Reserved, SlotEvent::Book, SlotStatus::Booked),
    allow(SlotStatus::Reserved, SlotEvent::Release, SlotStatus::Available),
    allow(SlotStatus::Reserved, SlotEvent::Expire, SlotStatus::Available),
    allow(SlotStatus::Booked, SlotEvent::Release, SlotStatus::Available),
    deny(SlotStatus::Available, SlotEvent::Book, SlotStatus::Booked),
    deny(SlotStatus::Booked, SlotEvent::Reserve, SlotStatus::Reserved),
    deny(SlotStatus::Booked, SlotEvent::Expire, SlotStatus::Available),
];

pub struct SlotMachine;

impl StateMachine for SlotMachine {
    type State = SlotStatus;
    type Event = SlotEvent;
    const ENTITY: &'static str = "slot";

    fn table() -> &'static [Rule<SlotStatus, SlotEvent>] {
        &SLOT_TABLE
    }
}

// ── Booking ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingEvent {
    Confirm,
    Reject,
    Cancel,
    Expire,
}

impl Display for BookingEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BookingEvent {
    pub const ALL: [BookingEvent; 4] = [
        BookingEvent::Confirm,
        BookingEvent::Reject,
        BookingEvent::Cancel,
        BookingEvent::Expire,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingEvent::Confirm => "confirm",
            BookingEvent::Reject => "reject",
            BookingEvent::Cancel => "cancel",
            BookingEvent::Expire => "expire",
        }
    }
}

// rejected and cancelled are terminal; rejected─cancel stays denied.
static BOOKING_TABLE: [Rule<BookingStatus, BookingEvent>; 6] = [
    allow(BookingStatus::Pending, BookingEvent::Confirm, BookingStatus::Confirmed),
    allow(BookingStatus::Pending, BookingEvent::Reject, BookingStatus::Rejected),
    allow(BookingStatus::Pending, BookingEvent::Cancel, BookingStatus::Cancelled),
    allow(BookingStatus::Pending, BookingEvent::Expire, BookingStatus::Cancelled),
    allow(BookingStatus::Confirmed, BookingEvent::Cancel, BookingStatus::Cancelled),
    deny(BookingStatus::Rejected, BookingEvent::Cancel, BookingStatus::Cancelled),
];

pub struct BookingMachine;

impl StateMachine for BookingMachine {
    type State = BookingStatus;
    type Event = BookingEvent;
    const ENTITY: &'static str = "booking";

    fn table() -> &'static [Rule<BookingStatus, BookingEvent>] {
        &BOOKING_TABLE
    }
}

// ── Payment ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEvent {
    Verify,
    Fail,
    Expire,
    Refund,
}

impl Display for PaymentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PaymentEvent {
    pub const ALL: [PaymentEvent; 4] = [
        PaymentEvent::Verify,
        PaymentEvent::Fail,
        PaymentEvent::Expire,
        PaymentEvent::Refund,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEvent::Verify => "verify",
            PaymentEvent::Fail => "fail",
            PaymentEvent::Expire => "expire",
            PaymentEvent::Refund => "refund",
        }
    }
}

// failed─verify is denied on purpose: a retry is a new payment.
static PAYMENT_TABLE: [Rule<PaymentStatus, PaymentEvent>; 10] = [
    allow(PaymentStatus::Initiated, PaymentEvent::Verify, PaymentStatus::Completed),
    allow(PaymentStatus::Initiated, PaymentEvent::Fail, PaymentStatus::Failed),
    allow(PaymentStatus::Initiated, PaymentEvent::Expire, PaymentStatus::Expired),
    allow(PaymentStatus::Pending, PaymentEvent::Verify, PaymentStatus::Completed),
    allow(PaymentStatus::Pending, PaymentEvent::Fail, PaymentStatus::Failed),
    allow(PaymentStatus::Processing, PaymentEvent::Verify, PaymentStatus::Completed),
    allow(PaymentStatus::Processing, PaymentEvent::Fail, PaymentStatus::Failed),
    allow(PaymentStatus::Completed, PaymentEvent::Refund, PaymentStatus::Refunded),
    allow(
        PaymentStatus::Completed,
        PaymentEvent::Refund,
        PaymentStatus::PartiallyRefunded,
    ),
    deny(PaymentStatus::Failed, PaymentEvent::Verify, PaymentStatus::Completed),
];

pub struct PaymentMachine;

impl StateMachine for PaymentMachine {
    type State = PaymentStatus;
    type Event = PaymentEvent;
    const ENTITY: &'static str = "payment";

    fn table() -> &'static [Rule<PaymentStatus, PaymentEvent>] {
        &PAYMENT_TABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every (state, event) pair either appears as an allowed rule or is
    /// rejected by all three query functions.
    fn assert_complete<M: StateMachine>(states: &[M::State], events: &[M::Event]) {
        for &from in states {
            for &event in events {
                let allowed: Vec<M::State> = M::table()
                    .iter()
                    .filter(|r| r.from == from && r.event == event && r.allowed)
                    .map(|r| r.to)
                    .collect();

                if allowed.is_empty() {
                    assert!(!M::can_transition(from, event), "{from:?} -{event:?}");
                    assert_eq!(M::next_state(from, event), None);
                    for &to in states {
                        assert!(!M::validate(from, to, event));
                    }
                } else {
                    assert!(M::can_transition(from, event));
                    assert_eq!(M::next_state(from, event), Some(allowed[0]));
                    for &to in states {
                        assert_eq!(M::validate(from, to, event), allowed.contains(&to));
                    }
                }
            }
        }
    }

    #[test]
    fn test_slot_table_is_complete() {
        assert_complete::<SlotMachine>(&SlotStatus::ALL, &SlotEvent::ALL);
    }

    #[test]
    fn test_booking_table_is_complete() {
        assert_complete::<BookingMachine>(&BookingStatus::ALL, &BookingEvent::ALL);
    }

    #[test]
    fn test_payment_table_is_complete() {
        assert_complete::<PaymentMachine>(&PaymentStatus::ALL, &PaymentEvent::ALL);
    }

    #[test]
    fn test_slot_transitions() {
        use SlotStatus::*;
        assert_eq!(SlotMachine::next_state(Available, SlotEvent::Reserve), Some(Reserved));
        assert_eq!(SlotMachine::next_state(Reserved, SlotEvent::Book), Some(Booked));
        assert_eq!(SlotMachine::next_state(Reserved, SlotEvent::Expire), Some(Available));
        assert_eq!(SlotMachine::next_state(Booked, SlotEvent::Release), Some(Available));
        assert!(!SlotMachine::can_transition(Available, SlotEvent::Book));
        assert!(!SlotMachine::can_transition(Booked, SlotEvent::Reserve));
        assert!(!SlotMachine::can_transition(Booked, SlotEvent::Expire));
        assert!(!SlotMachine::can_transition(Available, SlotEvent::Release));
    }

    #[test]
    fn test_booking_terminal_states_reject_everything() {
        for event in BookingEvent::ALL {
            assert!(!BookingMachine::can_transition(BookingStatus::Rejected, event));
            assert!(!BookingMachine::can_transition(BookingStatus::Cancelled, event));
        }
        // explicitly listed as denied, must behave like a missing entry
        assert!(!BookingMachine::validate(
            BookingStatus::Rejected,
            BookingStatus::Cancelled,
            BookingEvent::Cancel
        ));
    }

    #[test]
    fn test_booking_confirm_only_from_pending() {
        assert!(BookingMachine::validate(
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingEvent::Confirm
        ));
        assert!(!BookingMachine::can_transition(BookingStatus::Confirmed, BookingEvent::Confirm));
        assert!(!BookingMachine::can_transition(BookingStatus::Confirmed, BookingEvent::Expire));
        assert_eq!(
            BookingMachine::next_state(BookingStatus::Pending, BookingEvent::Expire),
            Some(BookingStatus::Cancelled)
        );
    }

    #[test]
    fn test_payment_failed_cannot_verify() {
        assert!(!PaymentMachine::can_transition(PaymentStatus::Failed, PaymentEvent::Verify));
        assert!(!PaymentMachine::validate(
            PaymentStatus::Failed,
            PaymentStatus::Completed,
            PaymentEvent::Verify
        ));
    }

    #[test]
    fn test_payment_refund_targets() {
        use PaymentStatus::*;
        assert_eq!(PaymentMachine::next_state(Completed, PaymentEvent::Refund), Some(Refunded));
        assert!(PaymentMachine::validate(Completed, PartiallyRefunded, PaymentEvent::Refund));
        assert!(PaymentMachine::validate(Completed, Refunded, PaymentEvent::Refund));
        assert!(!PaymentMachine::validate(Completed, Failed, PaymentEvent::Refund));
        assert!(!PaymentMachine::can_transition(Pending, PaymentEvent::Expire));
        assert!(!PaymentMachine::can_transition(Expired, PaymentEvent::Verify));
    }
}
