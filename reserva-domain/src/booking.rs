use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::availability::TimeSlot;
use crate::payment::PaymentMethod;

/// Booking lifecycle states. Transitions are monotonic: terminal states are
/// never left and a booking never moves backwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(BookingStatus::Pending),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "COMPLETED" => Some(BookingStatus::Completed),
            "NO_SHOW" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }

    /// Whether the booking counts towards the overlap invariant.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, NoShow)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("booking window must end after it starts")]
    InvalidWindow,

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub user_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub price_cents: i64,
    /// Bumped on every successful write; writers present the version they
    /// read and a mismatch means a concurrent writer won.
    pub version: i64,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        resource_id: Uuid,
        user_id: Uuid,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        price_cents: i64,
    ) -> Result<Self, BookingError> {
        if end_at <= start_at {
            return Err(BookingError::InvalidWindow);
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            resource_id,
            user_id,
            start_at,
            end_at,
            status: BookingStatus::Pending,
            price_cents,
            version: 0,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Half-open interval intersection: `[start, end)` against
    /// `[self.start_at, self.end_at)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_at < end && self.end_at > start
    }

    pub fn ensure_transition(&self, next: BookingStatus) -> Result<(), BookingError> {
        if !self.status.can_transition_to(next) {
            return Err(BookingError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub payment_method: PaymentMethod,
}

/// Outcome returned to the caller of `create_booking`. Payment failures are
/// absorbed here rather than surfaced as errors.
#[derive(Debug, Serialize)]
pub struct BookingResult {
    pub success: bool,
    pub booking: Option<Booking>,
    pub error_message: Option<String>,
    pub alternatives: Vec<TimeSlot>,
}

impl BookingResult {
    pub fn accepted(booking: Booking, message: Option<String>) -> Self {
        Self {
            success: true,
            booking: Some(booking),
            error_message: message,
            alternatives: Vec::new(),
        }
    }

    pub fn rejected(message: impl Into<String>, alternatives: Vec<TimeSlot>) -> Self {
        Self {
            success: false,
            booking: None,
            error_message: Some(message.into()),
            alternatives,
        }
    }

    pub fn rejected_with_booking(booking: Booking, message: impl Into<String>) -> Self {
        Self {
            success: false,
            booking: Some(booking),
            error_message: Some(message.into()),
            alternatives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn booking(start_offset_hours: i64, end_offset_hours: i64) -> Booking {
        let base = Utc::now();
        Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            base + Duration::hours(start_offset_hours),
            base + Duration::hours(end_offset_hours),
            5000,
        )
        .unwrap()
    }

    #[test]
    fn window_must_end_after_start() {
        let now = Utc::now();
        let result = Booking::new(Uuid::new_v4(), Uuid::new_v4(), now, now, 100);
        assert!(matches!(result, Err(BookingError::InvalidWindow)));
    }

    #[test]
    fn overlap_is_half_open() {
        let existing = booking(10, 11);

        // Touching boundaries do not overlap.
        assert!(!existing.overlaps(existing.end_at, existing.end_at + Duration::hours(1)));
        assert!(!existing.overlaps(existing.start_at - Duration::hours(1), existing.start_at));

        // Partial intersection does.
        assert!(existing.overlaps(
            existing.start_at + Duration::minutes(30),
            existing.end_at + Duration::minutes(30)
        ));
    }

    #[test]
    fn transitions_are_monotonic() {
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Confirmed));
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Cancelled));
        assert!(BookingStatus::Confirmed.can_transition_to(BookingStatus::Completed));

        // Terminal states stay terminal.
        assert!(!BookingStatus::Cancelled.can_transition_to(BookingStatus::Pending));
        assert!(!BookingStatus::Cancelled.can_transition_to(BookingStatus::Confirmed));
        assert!(!BookingStatus::Completed.can_transition_to(BookingStatus::Cancelled));

        // No moving backwards.
        assert!(!BookingStatus::Confirmed.can_transition_to(BookingStatus::Pending));
    }

    #[test]
    fn status_strings_round_trip_for_storage() {
        assert_eq!(BookingStatus::parse("NO_SHOW"), Some(BookingStatus::NoShow));
        assert_eq!(BookingStatus::NoShow.as_str(), "NO_SHOW");
        assert_eq!(BookingStatus::parse("UNKNOWN"), None);
    }
}
