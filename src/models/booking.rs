use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    /// Public short code handed to customers.
    pub booking_code: String,
    pub business_id: String,
    pub slot_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub service_ids: Vec<String>,
    pub status: BookingStatus,
    pub cancelled_by: Option<CancelledBy>,
    pub cancellation_reason: Option<String>,
    pub no_show: bool,
    pub no_show_marked_by: Option<String>,
    pub no_show_marked_at: Option<NaiveDateTime>,
    pub rescheduled_from_slot_id: Option<String>,
    pub rescheduled_at: Option<NaiveDateTime>,
    pub rescheduled_by: Option<String>,
    pub reschedule_reason: Option<String>,
    pub confirmed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        matches!(self.status, BookingStatus::Pending | BookingStatus::Confirmed) && !self.no_show
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Rejected,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "rejected" => Ok(BookingStatus::Rejected),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(anyhow::anyhow!("unknown booking status: {other}")),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    Customer,
    Owner,
    System,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelledBy::Customer => "customer",
            CancelledBy::Owner => "owner",
            CancelledBy::System => "system",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "customer" => Ok(CancelledBy::Customer),
            "owner" => Ok(CancelledBy::Owner),
            "system" => Ok(CancelledBy::System),
            other => Err(anyhow::anyhow!("unknown canceller: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub phone: String,
}

/// Who is driving an operation. Owner-side actions are checked against the
/// access policy; customer actions are matched on phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Actor {
    Customer(String),
    Owner(String),
    System,
}

impl Actor {
    pub fn label(&self) -> String {
        match self {
            Actor::Customer(phone) => format!("customer:{phone}"),
            Actor::Owner(id) => format!("owner:{id}"),
            Actor::System => "system".to_string(),
        }
    }
}
