use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::warn;
use uuid::Uuid;

use crate::pricing::PricingEngine;
use reserva_core::repository::{BookingRepository, ResourceCatalog};
use reserva_core::sync::{snapshot_lock_key, AvailabilityCache, DistributedLock};
use reserva_core::{EngineError, EngineResult};
use reserva_domain::availability::{AvailabilityResult, DaySnapshot, TimeSlot, UnavailableReason};
use reserva_domain::resource::Resource;

#[derive(Debug, Clone)]
pub struct AvailabilityConfig {
    pub alternative_slot_limit: usize,
    pub alternative_step_minutes: i64,
    /// How many days past the requested one the alternative search may
    /// extend; 0 keeps it on the same calendar day.
    pub alternative_horizon_days: u64,
    pub cache_ttl: StdDuration,
    pub snapshot_lock_ttl: StdDuration,
    pub snapshot_lock_attempts: u32,
    pub snapshot_lock_retry_delay: StdDuration,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            alternative_slot_limit: 5,
            alternative_step_minutes: 30,
            alternative_horizon_days: 0,
            cache_ttl: StdDuration::from_secs(120),
            snapshot_lock_ttl: StdDuration::from_secs(5),
            snapshot_lock_attempts: 3,
            snapshot_lock_retry_delay: StdDuration::from_millis(50),
        }
    }
}

/// Answers "is this resource free for this window" and suggests nearby
/// alternatives when it is not.
///
/// The read path goes through the per-day snapshot cache; the write path
/// must use `confirm_window`, which always queries storage and is only
/// meaningful inside the resource critical section.
pub struct AvailabilityService {
    config: AvailabilityConfig,
    catalog: Arc<dyn ResourceCatalog>,
    bookings: Arc<dyn BookingRepository>,
    cache: Arc<dyn AvailabilityCache>,
    locks: Arc<dyn DistributedLock>,
    pricing: Arc<PricingEngine>,
}

impl AvailabilityService {
    pub fn new(
        config: AvailabilityConfig,
        catalog: Arc<dyn ResourceCatalog>,
        bookings: Arc<dyn BookingRepository>,
        cache: Arc<dyn AvailabilityCache>,
        locks: Arc<dyn DistributedLock>,
        pricing: Arc<PricingEngine>,
    ) -> Self {
        Self {
            config,
            catalog,
            bookings,
            cache,
            locks,
            pricing,
        }
    }

    pub async fn check_availability(
        &self,
        resource_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<AvailabilityResult> {
        let resource = self
            .catalog
            .resource(resource_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("resource {resource_id}")))?;

        if let Some(reason) = self.validate_window(&resource, start, end) {
            return Ok(AvailabilityResult::rejected(reason));
        }

        let snapshot = self.day_snapshot(&resource, start.date_naive()).await?;
        let conflicts = snapshot.conflicts_with(start, end);
        if conflicts.is_empty() {
            return Ok(AvailabilityResult::open());
        }

        let alternatives = self.alternatives(&resource, start, end, &snapshot).await?;
        Ok(AvailabilityResult::conflicting(conflicts, alternatives))
    }

    /// Authoritative check against storage, bypassing the cache. Callers
    /// must hold the resource lock for the answer to stay true until they
    /// commit.
    pub async fn confirm_window(
        &self,
        resource: &Resource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<AvailabilityResult> {
        if let Some(reason) = self.validate_window(resource, start, end) {
            return Ok(AvailabilityResult::rejected(reason));
        }

        let conflicts = self
            .bookings
            .active_in_window(resource.id, start, end)
            .await?;
        if conflicts.is_empty() {
            Ok(AvailabilityResult::open())
        } else {
            Ok(AvailabilityResult::conflicting(conflicts, Vec::new()))
        }
    }

    /// Alternative slots for a window that turned out to be taken. Separate
    /// entry point so the orchestrator can compute suggestions after it has
    /// already released the resource lock.
    pub async fn suggest_alternatives(
        &self,
        resource: &Resource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<TimeSlot>> {
        let snapshot = self.day_snapshot(resource, start.date_naive()).await?;
        self.alternatives(resource, start, end, &snapshot).await
    }

    fn validate_window(
        &self,
        resource: &Resource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<UnavailableReason> {
        if end <= start {
            return Some(UnavailableReason::InvalidWindow);
        }

        let minutes = (end - start).num_minutes();
        if minutes < resource.min_duration_minutes {
            return Some(UnavailableReason::DurationTooShort {
                minimum_minutes: resource.min_duration_minutes,
            });
        }
        if minutes > resource.max_duration_minutes {
            return Some(UnavailableReason::DurationTooLong {
                maximum_minutes: resource.max_duration_minutes,
            });
        }

        let earliest = Utc::now() + Duration::minutes(resource.min_lead_time_minutes);
        if start < earliest {
            return Some(UnavailableReason::InsufficientLeadTime {
                required_minutes: resource.min_lead_time_minutes,
            });
        }

        if !window_within_rules(resource, start, end) {
            return Some(UnavailableReason::OutsideOpenHours);
        }

        None
    }

    /// Up to `alternative_slot_limit` later slots of the same duration,
    /// sliding forward in fixed increments from the requested start. Each
    /// candidate is re-validated independently and priced without a loyalty
    /// tier (the probe has no requester).
    async fn alternatives(
        &self,
        resource: &Resource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        snapshot: &DaySnapshot,
    ) -> EngineResult<Vec<TimeSlot>> {
        let duration = end - start;
        let step = Duration::minutes(self.config.alternative_step_minutes.max(1));
        let last_day = start
            .date_naive()
            .checked_add_days(Days::new(self.config.alternative_horizon_days))
            .unwrap_or_else(|| start.date_naive());

        let mut slots = Vec::new();
        let mut day = snapshot.clone();
        let mut candidate = start + step;

        while slots.len() < self.config.alternative_slot_limit && candidate.date_naive() <= last_day
        {
            let candidate_end = candidate + duration;
            if day.date != candidate.date_naive() {
                day = self.day_snapshot(resource, candidate.date_naive()).await?;
            }

            if self.validate_window(resource, candidate, candidate_end).is_none()
                && day.conflicts_with(candidate, candidate_end).is_empty()
            {
                let price_cents = self
                    .pricing
                    .calculate_anonymous(resource, candidate, candidate_end)
                    .await?;
                slots.push(TimeSlot {
                    start_at: candidate,
                    end_at: candidate_end,
                    price_cents,
                });
            }

            candidate = candidate + step;
        }

        Ok(slots)
    }

    /// Read-through snapshot lookup. Misses recompute under a per-key lock
    /// so concurrent readers do not stampede the store; a reader that cannot
    /// get the lock falls back to an uncached query rather than failing.
    async fn day_snapshot(&self, resource: &Resource, date: NaiveDate) -> EngineResult<DaySnapshot> {
        if let Some(snapshot) = self.cache.get(resource.id, date).await? {
            return Ok(snapshot);
        }

        let key = snapshot_lock_key(resource.id, date);
        for _ in 0..self.config.snapshot_lock_attempts {
            match self.locks.acquire(&key, self.config.snapshot_lock_ttl).await? {
                Some(token) => {
                    // Another worker may have filled the cache while we
                    // waited on the lock.
                    let result = match self.cache.get(resource.id, date).await? {
                        Some(snapshot) => Ok(snapshot),
                        None => self.rebuild_snapshot(resource.id, date).await,
                    };
                    if let Err(err) = self.locks.release(&key, &token).await {
                        warn!(%key, %err, "failed to release snapshot rebuild lock");
                    }
                    return result;
                }
                None => {
                    tokio::time::sleep(self.config.snapshot_lock_retry_delay).await;
                    if let Some(snapshot) = self.cache.get(resource.id, date).await? {
                        return Ok(snapshot);
                    }
                }
            }
        }

        warn!(
            resource_id = %resource.id,
            %date,
            "snapshot rebuild lock contended, serving uncached query"
        );
        let bookings = self.bookings.active_on_day(resource.id, date).await?;
        Ok(DaySnapshot::new(resource.id, date, bookings))
    }

    async fn rebuild_snapshot(&self, resource_id: Uuid, date: NaiveDate) -> EngineResult<DaySnapshot> {
        let bookings = self.bookings.active_on_day(resource_id, date).await?;
        let snapshot = DaySnapshot::new(resource_id, date, bookings);
        if let Err(err) = self.cache.put(&snapshot, self.config.cache_ttl).await {
            warn!(%resource_id, %date, %err, "failed to cache availability snapshot");
        }
        Ok(snapshot)
    }
}

/// The window must lie fully inside a single rule's `[opens_at, closes_at)`
/// on the start's weekday, which also pins it to one calendar day.
fn window_within_rules(resource: &Resource, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    if end.date_naive() != start.date_naive() {
        return false;
    }
    let start_time = start.time();
    let end_time = end.time();
    resource
        .open_rules(start.weekday())
        .any(|rule| rule.contains(start_time, end_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};
    use reserva_core::repository::UserDirectory;
    use reserva_domain::booking::Booking;
    use reserva_domain::resource::AvailabilityRule;
    use reserva_store::memory::{InMemoryCache, InMemoryCatalog, InMemoryDirectory, InMemoryLock, InMemoryStore};
    use crate::pricing::PricingConfig;

    struct Fixture {
        service: AvailabilityService,
        store: Arc<InMemoryStore>,
        catalog: Arc<InMemoryCatalog>,
        cache: Arc<InMemoryCache>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let cache = Arc::new(InMemoryCache::new());
        let locks = Arc::new(InMemoryLock::new());
        let directory: Arc<dyn UserDirectory> = Arc::new(InMemoryDirectory::new());
        let pricing = Arc::new(PricingEngine::new(
            PricingConfig::default(),
            store.clone(),
            directory,
        ));
        let service = AvailabilityService::new(
            AvailabilityConfig::default(),
            catalog.clone(),
            store.clone(),
            cache.clone(),
            locks,
            pricing,
        );
        Fixture {
            service,
            store,
            catalog,
            cache,
        }
    }

    fn all_day_resource() -> Resource {
        let rules = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .map(|weekday| AvailabilityRule {
            weekday,
            opens_at: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            closes_at: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
            available: true,
        })
        .collect();

        Resource {
            id: Uuid::new_v4(),
            name: "Court 1".to_string(),
            capacity: 1,
            hourly_rate_cents: 5000,
            rules,
            min_duration_minutes: 30,
            max_duration_minutes: 480,
            min_lead_time_minutes: 0,
        }
    }

    /// Mid-day window a few days out, safely past any lead time and away
    /// from midnight so sliding alternatives stay on the same date.
    fn future_window(hours: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let date = (Utc::now() + Duration::days(3)).date_naive();
        let start = date
            .and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap())
            .and_utc();
        (start, start + Duration::hours(hours))
    }

    #[tokio::test]
    async fn rejects_inverted_window() {
        let fx = fixture();
        let resource = all_day_resource();
        fx.catalog.upsert(resource.clone()).await;

        let (start, _) = future_window(1);
        let result = fx
            .service
            .check_availability(resource.id, start, start)
            .await
            .unwrap();
        assert!(!result.available);
        assert_eq!(result.reason, Some(UnavailableReason::InvalidWindow));
    }

    #[tokio::test]
    async fn rejects_duration_out_of_bounds() {
        let fx = fixture();
        let resource = all_day_resource();
        fx.catalog.upsert(resource.clone()).await;

        let (start, _) = future_window(1);
        let short = fx
            .service
            .check_availability(resource.id, start, start + Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(
            short.reason,
            Some(UnavailableReason::DurationTooShort { minimum_minutes: 30 })
        );

        let long = fx
            .service
            .check_availability(resource.id, start, start + Duration::hours(9))
            .await
            .unwrap();
        assert_eq!(
            long.reason,
            Some(UnavailableReason::DurationTooLong { maximum_minutes: 480 })
        );
    }

    #[tokio::test]
    async fn rejects_start_inside_lead_time() {
        let fx = fixture();
        let mut resource = all_day_resource();
        resource.min_lead_time_minutes = 24 * 60;
        fx.catalog.upsert(resource.clone()).await;

        let start = Utc::now() + Duration::hours(2);
        let result = fx
            .service
            .check_availability(resource.id, start, start + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(
            result.reason,
            Some(UnavailableReason::InsufficientLeadTime {
                required_minutes: 24 * 60
            })
        );
    }

    #[tokio::test]
    async fn rejects_window_outside_open_hours() {
        let fx = fixture();
        let mut resource = all_day_resource();
        resource.rules = vec![AvailabilityRule {
            weekday: Weekday::Mon,
            opens_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            closes_at: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            available: true,
        }];
        fx.catalog.upsert(resource.clone()).await;

        // Next Monday at 13:00, outside the 09:00-12:00 rule.
        let mut date = (Utc::now() + Duration::days(2)).date_naive();
        while date.weekday() != Weekday::Mon {
            date = date.succ_opt().unwrap();
        }
        let start = date
            .and_time(NaiveTime::from_hms_opt(13, 0, 0).unwrap())
            .and_utc();
        let result = fx
            .service
            .check_availability(resource.id, start, start + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(result.reason, Some(UnavailableReason::OutsideOpenHours));
    }

    #[tokio::test]
    async fn overlapping_booking_is_reported_as_conflict() {
        let fx = fixture();
        let resource = all_day_resource();
        fx.catalog.upsert(resource.clone()).await;

        let (start, end) = future_window(1);
        let mut existing = Booking::new(resource.id, Uuid::new_v4(), start, end, 5000).unwrap();
        existing.status = reserva_domain::booking::BookingStatus::Confirmed;
        fx.store.insert_booking(&existing).await.unwrap();

        // Request 10:30-11:30 against the existing 10:00-11:00 booking.
        let shifted = start + Duration::minutes(30);
        let result = fx
            .service
            .check_availability(resource.id, shifted, shifted + Duration::hours(1))
            .await
            .unwrap();

        assert!(!result.available);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].id, existing.id);
    }

    #[tokio::test]
    async fn alternatives_slide_forward_within_the_day() {
        let fx = fixture();
        let resource = all_day_resource();
        fx.catalog.upsert(resource.clone()).await;

        let (start, end) = future_window(1);
        let existing = Booking::new(resource.id, Uuid::new_v4(), start, end, 5000).unwrap();
        fx.store.insert_booking(&existing).await.unwrap();

        let result = fx
            .service
            .check_availability(resource.id, start, end)
            .await
            .unwrap();

        assert!(!result.available);
        assert_eq!(result.alternatives.len(), 5);
        // First free slot starts 30 minutes past the conflicting hour's end
        // boundary candidate chain: 10:30 overlaps, 11:00 is free.
        assert_eq!(result.alternatives[0].start_at, start + Duration::hours(1));
        for slot in &result.alternatives {
            assert_eq!(slot.start_at.date_naive(), start.date_naive());
            assert_eq!(slot.end_at - slot.start_at, end - start);
            assert!(slot.price_cents > 0);
        }
    }

    #[tokio::test]
    async fn adjacent_booking_does_not_conflict() {
        let fx = fixture();
        let resource = all_day_resource();
        fx.catalog.upsert(resource.clone()).await;

        let (start, end) = future_window(1);
        let existing = Booking::new(resource.id, Uuid::new_v4(), start, end, 5000).unwrap();
        fx.store.insert_booking(&existing).await.unwrap();

        let result = fx
            .service
            .check_availability(resource.id, end, end + Duration::hours(1))
            .await
            .unwrap();
        assert!(result.available);
    }

    #[tokio::test]
    async fn cancelled_bookings_do_not_block_the_window() {
        let fx = fixture();
        let resource = all_day_resource();
        fx.catalog.upsert(resource.clone()).await;

        let (start, end) = future_window(1);
        let booking = Booking::new(resource.id, Uuid::new_v4(), start, end, 5000).unwrap();
        fx.store.insert_booking(&booking).await.unwrap();
        fx.store
            .update_booking_status(
                booking.id,
                0,
                reserva_domain::booking::BookingStatus::Cancelled,
                Some("user cancelled".to_string()),
            )
            .await
            .unwrap();
        fx.cache.evict(resource.id, start.date_naive()).await.unwrap();

        let result = fx
            .service
            .check_availability(resource.id, start, end)
            .await
            .unwrap();
        assert!(result.available);
    }

    #[tokio::test]
    async fn read_path_populates_the_snapshot_cache() {
        let fx = fixture();
        let resource = all_day_resource();
        fx.catalog.upsert(resource.clone()).await;

        let (start, end) = future_window(1);
        assert!(fx
            .cache
            .get(resource.id, start.date_naive())
            .await
            .unwrap()
            .is_none());

        fx.service
            .check_availability(resource.id, start, end)
            .await
            .unwrap();

        assert!(fx
            .cache
            .get(resource.id, start.date_naive())
            .await
            .unwrap()
            .is_some());
    }
}
