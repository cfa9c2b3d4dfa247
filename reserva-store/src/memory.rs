use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use reserva_core::notify::{AnalyticsRecorder, NotificationDispatcher};
use reserva_core::repository::{BookingRepository, ResourceCatalog, UserDirectory};
use reserva_core::sync::{AvailabilityCache, DistributedLock, LockToken};
use reserva_core::{EngineError, EngineResult};
use reserva_domain::availability::DaySnapshot;
use reserva_domain::booking::{Booking, BookingStatus};
use reserva_domain::events::BookingEvent;
use reserva_domain::payment::Payment;
use reserva_domain::resource::Resource;

/// HashMap-backed repository for tests and single-process wiring. Honors
/// the same contract as the Postgres store, including version CAS.
#[derive(Default)]
pub struct InMemoryStore {
    bookings: RwLock<HashMap<Uuid, Booking>>,
    payments: RwLock<HashMap<Uuid, Payment>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn insert_booking(&self, booking: &Booking) -> EngineResult<()> {
        let mut bookings = self.bookings.write().await;
        if bookings.contains_key(&booking.id) {
            return Err(EngineError::Store(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn booking(&self, id: Uuid) -> EngineResult<Option<Booking>> {
        Ok(self.bookings.read().await.get(&id).cloned())
    }

    async fn active_in_window(
        &self,
        resource_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<Booking>> {
        let bookings = self.bookings.read().await;
        let mut hits: Vec<Booking> = bookings
            .values()
            .filter(|b| b.resource_id == resource_id && b.is_active() && b.overlaps(start, end))
            .cloned()
            .collect();
        hits.sort_by_key(|b| b.start_at);
        Ok(hits)
    }

    async fn active_on_day(
        &self,
        resource_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Vec<Booking>> {
        let bookings = self.bookings.read().await;
        let mut hits: Vec<Booking> = bookings
            .values()
            .filter(|b| {
                b.resource_id == resource_id && b.is_active() && b.start_at.date_naive() == date
            })
            .cloned()
            .collect();
        hits.sort_by_key(|b| b.start_at);
        Ok(hits)
    }

    async fn count_active_starting_between(
        &self,
        resource_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<u64> {
        let bookings = self.bookings.read().await;
        let count = bookings
            .values()
            .filter(|b| {
                b.resource_id == resource_id
                    && b.is_active()
                    && b.start_at >= from
                    && b.start_at <= to
            })
            .count();
        Ok(count as u64)
    }

    async fn update_booking_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: BookingStatus,
        cancellation_reason: Option<String>,
    ) -> EngineResult<Booking> {
        let mut bookings = self.bookings.write().await;
        let booking = bookings
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;

        if booking.version != expected_version {
            return Err(EngineError::StaleVersion(id));
        }
        booking
            .ensure_transition(status)
            .map_err(|err| EngineError::Conflict(err.to_string()))?;

        booking.status = status;
        if let Some(reason) = cancellation_reason {
            booking.cancellation_reason = Some(reason);
        }
        booking.version += 1;
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    async fn insert_payment(&self, payment: &Payment) -> EngineResult<()> {
        self.payments
            .write()
            .await
            .insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment(&self, payment: &Payment) -> EngineResult<()> {
        let mut payments = self.payments.write().await;
        if !payments.contains_key(&payment.id) {
            return Err(EngineError::NotFound(format!("payment {}", payment.id)));
        }
        payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn payment_for_booking(&self, booking_id: Uuid) -> EngineResult<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .find(|p| p.booking_id == booking_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCatalog {
    resources: RwLock<HashMap<Uuid, Resource>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, resource: Resource) {
        self.resources.write().await.insert(resource.id, resource);
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryCatalog {
    async fn resource(&self, id: Uuid) -> EngineResult<Option<Resource>> {
        Ok(self.resources.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryDirectory {
    counts: RwLock<HashMap<Uuid, u64>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_completed(&self, user_id: Uuid, count: u64) {
        self.counts.write().await.insert(user_id, count);
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn completed_booking_count(&self, user_id: Uuid) -> EngineResult<u64> {
        Ok(self.counts.read().await.get(&user_id).copied().unwrap_or(0))
    }
}

/// Single-process set-if-absent lock with expiry and token-checked release,
/// mirroring the Redis contract.
#[derive(Default)]
pub struct InMemoryLock {
    entries: Mutex<HashMap<String, (LockToken, Instant)>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> EngineResult<Option<LockToken>> {
        let mut entries = self.entries.lock().await;
        if let Some((_, deadline)) = entries.get(key) {
            if *deadline > Instant::now() {
                return Ok(None);
            }
        }
        let token = LockToken::generate();
        entries.insert(key.to_string(), (token.clone(), Instant::now() + ttl));
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> EngineResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((held, _)) if held == token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<(Uuid, NaiveDate), (DaySnapshot, Instant)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AvailabilityCache for InMemoryCache {
    async fn get(&self, resource_id: Uuid, date: NaiveDate) -> EngineResult<Option<DaySnapshot>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(resource_id, date)).and_then(|(snapshot, deadline)| {
            if *deadline > Instant::now() {
                Some(snapshot.clone())
            } else {
                None
            }
        }))
    }

    async fn put(&self, snapshot: &DaySnapshot, ttl: Duration) -> EngineResult<()> {
        self.entries.write().await.insert(
            (snapshot.resource_id, snapshot.date),
            (snapshot.clone(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn evict(&self, resource_id: Uuid, date: NaiveDate) -> EngineResult<()> {
        self.entries.write().await.remove(&(resource_id, date));
        Ok(())
    }
}

/// Captures lifecycle events for assertions; stands in for both the
/// notification and analytics channels in tests.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<BookingEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<BookingEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingEvents {
    async fn send(&self, event: &BookingEvent) {
        self.events.lock().await.push(event.clone());
    }
}

#[async_trait]
impl AnalyticsRecorder for RecordingEvents {
    async fn record(&self, event: &BookingEvent) {
        self.events.lock().await.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let lock = InMemoryLock::new();
        let ttl = Duration::from_secs(5);

        let token = lock.acquire("resource:a", ttl).await.unwrap().unwrap();
        assert!(lock.acquire("resource:a", ttl).await.unwrap().is_none());

        assert!(lock.release("resource:a", &token).await.unwrap());
        assert!(lock.acquire("resource:a", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_token_cannot_release_a_reacquired_lock() {
        let lock = InMemoryLock::new();

        let stale = lock
            .acquire("resource:a", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // TTL elapsed; a second worker takes the lock.
        let fresh = lock
            .acquire("resource:a", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        assert!(!lock.release("resource:a", &stale).await.unwrap());
        assert!(lock.release("resource:a", &fresh).await.unwrap());
    }

    #[tokio::test]
    async fn cache_entries_expire() {
        let cache = InMemoryCache::new();
        let resource_id = Uuid::new_v4();
        let date = Utc::now().date_naive();
        let snapshot = DaySnapshot::new(resource_id, date, Vec::new());

        cache.put(&snapshot, Duration::from_millis(10)).await.unwrap();
        assert!(cache.get(resource_id, date).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(resource_id, date).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_update_enforces_version_cas() {
        let store = InMemoryStore::new();
        let start = Utc::now() + ChronoDuration::days(2);
        let booking = Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            start,
            start + ChronoDuration::hours(1),
            5000,
        )
        .unwrap();
        store.insert_booking(&booking).await.unwrap();

        let updated = store
            .update_booking_status(booking.id, 0, BookingStatus::Confirmed, None)
            .await
            .unwrap();
        assert_eq!(updated.version, 1);

        // A writer holding the old version loses.
        let stale = store
            .update_booking_status(
                booking.id,
                0,
                BookingStatus::Cancelled,
                Some("late".to_string()),
            )
            .await;
        assert!(matches!(stale, Err(EngineError::StaleVersion(_))));
    }

    #[tokio::test]
    async fn backwards_transitions_are_rejected() {
        let store = InMemoryStore::new();
        let start = Utc::now() + ChronoDuration::days(2);
        let booking = Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            start,
            start + ChronoDuration::hours(1),
            5000,
        )
        .unwrap();
        store.insert_booking(&booking).await.unwrap();

        store
            .update_booking_status(
                booking.id,
                0,
                BookingStatus::Cancelled,
                Some("user cancelled".to_string()),
            )
            .await
            .unwrap();

        let result = store
            .update_booking_status(booking.id, 1, BookingStatus::Confirmed, None)
            .await;
        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }
}
