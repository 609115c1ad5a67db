use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    pub business_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: SlotStatus,
    pub reserved_until: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Slot {
    /// A reservation whose hold has lapsed is dead even if no sweep has run.
    pub fn hold_expired(&self, now: NaiveDateTime) -> bool {
        self.status == SlotStatus::Reserved && self.reserved_until.map_or(true, |until| until <= now)
    }

    /// Status as readers should see it: a lapsed hold reads as available.
    pub fn effective_status(&self, now: NaiveDateTime) -> SlotStatus {
        if self.hold_expired(now) {
            SlotStatus::Available
        } else {
            self.status
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Reserved,
    Booked,
}

impl SlotStatus {
    pub const ALL: [SlotStatus; 3] = [SlotStatus::Available, SlotStatus::Reserved, SlotStatus::Booked];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Reserved => "reserved",
            SlotStatus::Booked => "booked",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "available" => Ok(SlotStatus::Available),
            "reserved" => Ok(SlotStatus::Reserved),
            "booked" => Ok(SlotStatus::Booked),
            other => Err(anyhow::anyhow!("unknown slot status: {other}")),
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating hours applied to one date when generating inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub slot_duration_minutes: i64,
}

impl SlotConfig {
    /// Partitions `[opening_time, closing_time)` into fixed intervals. A
    /// trailing interval that would run past closing is dropped.
    pub fn intervals(&self) -> anyhow::Result<Vec<(NaiveTime, NaiveTime)>> {
        anyhow::ensure!(
            self.slot_duration_minutes > 0,
            "slot duration must be positive, got {}",
            self.slot_duration_minutes
        );
        anyhow::ensure!(
            self.opening_time < self.closing_time,
            "opening time {} must be before closing time {}",
            self.opening_time,
            self.closing_time
        );

        let step = Duration::minutes(self.slot_duration_minutes);
        let mut intervals = vec![];
        let mut start = self.opening_time;
        loop {
            // overflowing_add_signed wraps past midnight; a non-zero wrap means
            // the interval cannot fit before closing.
            let (end, wrapped) = start.overflowing_add_signed(step);
            if wrapped != 0 || end > self.closing_time {
                break;
            }
            intervals.push((start, end));
            start = end;
        }
        Ok(intervals)
    }
}
