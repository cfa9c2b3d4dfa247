use async_trait::async_trait;

use reserva_domain::events::BookingEvent;

/// Fire-and-forget delivery of lifecycle events to the notification
/// pipeline. Implementations swallow and log their own transport errors;
/// a failed send never fails the booking flow.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, event: &BookingEvent);
}

/// Fire-and-forget recording of lifecycle events for downstream reporting.
#[async_trait]
pub trait AnalyticsRecorder: Send + Sync {
    async fn record(&self, event: &BookingEvent);
}
