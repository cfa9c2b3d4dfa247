use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::EngineResult;
use reserva_domain::booking::{Booking, BookingStatus};
use reserva_domain::payment::Payment;
use reserva_domain::resource::Resource;

/// Repository for booking rows and the payment rows they own. Booking and
/// Payment rows are the durable source of truth; everything cached is
/// reconstructible from them.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert_booking(&self, booking: &Booking) -> EngineResult<()>;

    async fn booking(&self, id: Uuid) -> EngineResult<Option<Booking>>;

    /// Bookings with status in {Pending, Confirmed} intersecting
    /// `[start, end)` for the resource, half-open semantics.
    async fn active_in_window(
        &self,
        resource_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<Booking>>;

    /// All active bookings whose start falls on the given UTC calendar day.
    async fn active_on_day(
        &self,
        resource_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Vec<Booking>>;

    /// Demand probe: active bookings of the resource starting inside
    /// `[from, to]` inclusive.
    async fn count_active_starting_between(
        &self,
        resource_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<u64>;

    /// Compare-and-swap status update. Fails with `StaleVersion` when the
    /// stored version differs from `expected_version`, with `Conflict` when
    /// the transition would move the lifecycle backwards. Returns the
    /// updated row (version bumped).
    async fn update_booking_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: BookingStatus,
        cancellation_reason: Option<String>,
    ) -> EngineResult<Booking>;

    async fn insert_payment(&self, payment: &Payment) -> EngineResult<()>;

    async fn update_payment(&self, payment: &Payment) -> EngineResult<()>;

    async fn payment_for_booking(&self, booking_id: Uuid) -> EngineResult<Option<Payment>>;
}

/// Source of resource and availability-rule records, read-only here.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn resource(&self, id: Uuid) -> EngineResult<Option<Resource>>;
}

/// Feeds the loyalty tier of the pricing engine.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn completed_booking_count(&self, user_id: Uuid) -> EngineResult<u64>;
}
