use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle events emitted after a booking changes state. Serialized as-is
/// onto the notification and analytics channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingEvent {
    Confirmed {
        booking_id: Uuid,
        resource_id: Uuid,
        user_id: Uuid,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        price_cents: i64,
        at: DateTime<Utc>,
    },
    Cancelled {
        booking_id: Uuid,
        resource_id: Uuid,
        user_id: Uuid,
        reason: String,
        refunded: bool,
        at: DateTime<Utc>,
    },
    PaymentPending {
        booking_id: Uuid,
        resource_id: Uuid,
        user_id: Uuid,
        note: Option<String>,
        at: DateTime<Utc>,
    },
    PaymentFailed {
        booking_id: Uuid,
        resource_id: Uuid,
        user_id: Uuid,
        message: String,
        at: DateTime<Utc>,
    },
}

impl BookingEvent {
    pub fn booking_id(&self) -> Uuid {
        match self {
            BookingEvent::Confirmed { booking_id, .. }
            | BookingEvent::Cancelled { booking_id, .. }
            | BookingEvent::PaymentPending { booking_id, .. }
            | BookingEvent::PaymentFailed { booking_id, .. } => *booking_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BookingEvent::Confirmed { .. } => "booking.confirmed",
            BookingEvent::Cancelled { .. } => "booking.cancelled",
            BookingEvent::PaymentPending { .. } => "booking.payment_pending",
            BookingEvent::PaymentFailed { .. } => "booking.payment_failed",
        }
    }
}
