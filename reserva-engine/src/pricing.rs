use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use reserva_core::repository::{BookingRepository, UserDirectory};
use reserva_core::EngineResult;
use reserva_domain::resource::Resource;

/// Tunables for the pricing formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Applied when the window starts on a weekday inside the peak band.
    pub peak_multiplier: f64,
    pub peak_starts_at: NaiveTime,
    pub peak_ends_at: NaiveTime,

    /// Half-width of the demand probe around the requested start.
    pub demand_window_hours: i64,
    pub high_demand_threshold: u64,
    pub high_demand_multiplier: f64,
    pub elevated_demand_threshold: u64,
    pub elevated_demand_multiplier: f64,

    /// (completed-booking threshold, price factor), strictly-greater match,
    /// best tier wins.
    pub loyalty_tiers: Vec<(u64, f64)>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            peak_multiplier: 1.3,
            peak_starts_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            peak_ends_at: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            demand_window_hours: 2,
            high_demand_threshold: 10,
            high_demand_multiplier: 1.5,
            elevated_demand_threshold: 5,
            elevated_demand_multiplier: 1.2,
            loyalty_tiers: vec![(50, 0.85), (20, 0.90), (5, 0.95)],
        }
    }
}

/// Computes booking prices. `quote` is pure; `calculate` gathers the demand
/// and loyalty inputs from storage first, so two calls against identical
/// database state always price identically.
pub struct PricingEngine {
    config: PricingConfig,
    bookings: Arc<dyn BookingRepository>,
    users: Arc<dyn UserDirectory>,
}

impl PricingEngine {
    pub fn new(
        config: PricingConfig,
        bookings: Arc<dyn BookingRepository>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            config,
            bookings,
            users,
        }
    }

    pub async fn calculate(
        &self,
        resource: &Resource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Uuid,
    ) -> EngineResult<i64> {
        let nearby = self.nearby_demand(resource, start).await?;
        let completed = self.users.completed_booking_count(user_id).await?;
        Ok(self.quote(resource, start, end, nearby, completed))
    }

    /// Prices a window for an unknown requester (no loyalty tier), used for
    /// alternative-slot suggestions where the probe carries no user.
    pub async fn calculate_anonymous(
        &self,
        resource: &Resource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let nearby = self.nearby_demand(resource, start).await?;
        Ok(self.quote(resource, start, end, nearby, 0))
    }

    /// Pure pricing formula, rounded half-up to whole cents.
    pub fn quote(
        &self,
        resource: &Resource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        nearby_active: u64,
        completed_bookings: u64,
    ) -> i64 {
        let hours = (end - start).num_minutes() as f64 / 60.0;
        let mut price = resource.hourly_rate_cents as f64 * hours;

        if self.is_peak(start) {
            price *= self.config.peak_multiplier;
        }
        price *= self.demand_multiplier(nearby_active);
        price *= self.loyalty_factor(completed_bookings);

        round_half_up_cents(price)
    }

    async fn nearby_demand(&self, resource: &Resource, start: DateTime<Utc>) -> EngineResult<u64> {
        let window = Duration::hours(self.config.demand_window_hours);
        self.bookings
            .count_active_starting_between(resource.id, start - window, start + window)
            .await
    }

    fn is_peak(&self, start: DateTime<Utc>) -> bool {
        let weekday = !matches!(start.weekday(), Weekday::Sat | Weekday::Sun);
        let time = start.time();
        weekday && time >= self.config.peak_starts_at && time < self.config.peak_ends_at
    }

    /// Tiers are mutually exclusive; only the highest matching one applies.
    fn demand_multiplier(&self, nearby_active: u64) -> f64 {
        if nearby_active > self.config.high_demand_threshold {
            self.config.high_demand_multiplier
        } else if nearby_active > self.config.elevated_demand_threshold {
            self.config.elevated_demand_multiplier
        } else {
            1.0
        }
    }

    fn loyalty_factor(&self, completed_bookings: u64) -> f64 {
        self.config
            .loyalty_tiers
            .iter()
            .filter(|(threshold, _)| completed_bookings > *threshold)
            .map(|(_, factor)| *factor)
            .fold(1.0_f64, f64::min)
    }
}

fn round_half_up_cents(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}
