use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use reserva_core::repository::{ResourceCatalog, UserDirectory};
use reserva_core::{EngineError, EngineResult};
use reserva_domain::resource::{AvailabilityRule, Resource};

fn store_err(err: sqlx::Error) -> EngineError {
    EngineError::Store(err.to_string())
}

/// Read-only access to resource records. Weekly rules are stored as a JSONB
/// column and decoded into `AvailabilityRule`s.
pub struct PgResourceCatalog {
    pool: PgPool,
}

impl PgResourceCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceCatalog for PgResourceCatalog {
    async fn resource(&self, id: Uuid) -> EngineResult<Option<Resource>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, capacity, hourly_rate_cents, rules,
                   min_duration_minutes, max_duration_minutes, min_lead_time_minutes
            FROM resources
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rules: serde_json::Value = row.try_get("rules").map_err(store_err)?;
        let rules: Vec<AvailabilityRule> = serde_json::from_value(rules)
            .map_err(|err| EngineError::Store(format!("undecodable rules for resource {id}: {err}")))?;

        Ok(Some(Resource {
            id: row.try_get("id").map_err(store_err)?,
            name: row.try_get("name").map_err(store_err)?,
            capacity: row.try_get("capacity").map_err(store_err)?,
            hourly_rate_cents: row.try_get("hourly_rate_cents").map_err(store_err)?,
            rules,
            min_duration_minutes: row.try_get("min_duration_minutes").map_err(store_err)?,
            max_duration_minutes: row.try_get("max_duration_minutes").map_err(store_err)?,
            min_lead_time_minutes: row.try_get("min_lead_time_minutes").map_err(store_err)?,
        }))
    }
}

/// Loyalty lookup derived from the booking history itself.
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn completed_booking_count(&self, user_id: Uuid) -> EngineResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS completed FROM bookings WHERE user_id = $1 AND status = 'COMPLETED'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        let completed: i64 = row.try_get("completed").map_err(store_err)?;
        Ok(completed.max(0) as u64)
    }
}
