use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::booking::Booking;

/// A candidate window offered as an alternative, not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnavailableReason {
    InvalidWindow,
    DurationTooShort { minimum_minutes: i64 },
    DurationTooLong { maximum_minutes: i64 },
    InsufficientLeadTime { required_minutes: i64 },
    OutsideOpenHours,
    Conflicting,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::InvalidWindow => write!(f, "window must end after it starts"),
            UnavailableReason::DurationTooShort { minimum_minutes } => {
                write!(f, "duration is below the {minimum_minutes} minute minimum")
            }
            UnavailableReason::DurationTooLong { maximum_minutes } => {
                write!(f, "duration exceeds the {maximum_minutes} minute maximum")
            }
            UnavailableReason::InsufficientLeadTime { required_minutes } => {
                write!(f, "bookings require {required_minutes} minutes of lead time")
            }
            UnavailableReason::OutsideOpenHours => {
                write!(f, "window falls outside the resource's open hours")
            }
            UnavailableReason::Conflicting => write!(f, "window overlaps an existing booking"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityResult {
    pub available: bool,
    pub conflicts: Vec<Booking>,
    pub alternatives: Vec<TimeSlot>,
    pub reason: Option<UnavailableReason>,
}

impl AvailabilityResult {
    pub fn open() -> Self {
        Self {
            available: true,
            conflicts: Vec::new(),
            alternatives: Vec::new(),
            reason: None,
        }
    }

    pub fn rejected(reason: UnavailableReason) -> Self {
        Self {
            available: false,
            conflicts: Vec::new(),
            alternatives: Vec::new(),
            reason: Some(reason),
        }
    }

    pub fn conflicting(conflicts: Vec<Booking>, alternatives: Vec<TimeSlot>) -> Self {
        Self {
            available: false,
            conflicts,
            alternatives,
            reason: Some(UnavailableReason::Conflicting),
        }
    }
}

/// Cached availability snapshot for one resource-day. Ephemeral and fully
/// reconstructible from booking rows; the write path never trusts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaySnapshot {
    pub resource_id: Uuid,
    pub date: NaiveDate,
    pub bookings: Vec<Booking>,
    pub computed_at: DateTime<Utc>,
}

impl DaySnapshot {
    pub fn new(resource_id: Uuid, date: NaiveDate, bookings: Vec<Booking>) -> Self {
        Self {
            resource_id,
            date,
            bookings,
            computed_at: Utc::now(),
        }
    }

    pub fn conflicts_with(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|booking| booking.is_active() && booking.overlaps(start, end))
            .cloned()
            .collect()
    }
}
