use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use reserva_core::repository::BookingRepository;
use reserva_core::{EngineError, EngineResult};
use reserva_domain::booking::{Booking, BookingStatus};
use reserva_domain::payment::{Payment, PaymentStatus};

/// Postgres-backed booking and payment store. Statuses are stored as the
/// SCREAMING_SNAKE strings the domain enums expose; the version column
/// backs the optimistic CAS.
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_err(err: sqlx::Error) -> EngineError {
    EngineError::Store(err.to_string())
}

fn map_booking(row: &PgRow) -> EngineResult<Booking> {
    let status: String = row.try_get("status").map_err(store_err)?;
    let status = BookingStatus::parse(&status)
        .ok_or_else(|| EngineError::Store(format!("unknown booking status `{status}`")))?;

    Ok(Booking {
        id: row.try_get("id").map_err(store_err)?,
        resource_id: row.try_get("resource_id").map_err(store_err)?,
        user_id: row.try_get("user_id").map_err(store_err)?,
        start_at: row.try_get("start_at").map_err(store_err)?,
        end_at: row.try_get("end_at").map_err(store_err)?,
        status,
        price_cents: row.try_get("price_cents").map_err(store_err)?,
        version: row.try_get("version").map_err(store_err)?,
        cancellation_reason: row.try_get("cancellation_reason").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        updated_at: row.try_get("updated_at").map_err(store_err)?,
    })
}

fn map_payment(row: &PgRow) -> EngineResult<Payment> {
    let status: String = row.try_get("status").map_err(store_err)?;
    let status = PaymentStatus::parse(&status)
        .ok_or_else(|| EngineError::Store(format!("unknown payment status `{status}`")))?;

    Ok(Payment {
        id: row.try_get("id").map_err(store_err)?,
        booking_id: row.try_get("booking_id").map_err(store_err)?,
        amount_cents: row.try_get("amount_cents").map_err(store_err)?,
        status,
        external_reference: row.try_get("external_reference").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        updated_at: row.try_get("updated_at").map_err(store_err)?,
    })
}

const BOOKING_COLUMNS: &str = "id, resource_id, user_id, start_at, end_at, status, price_cents, \
                               version, cancellation_reason, created_at, updated_at";

#[async_trait]
impl BookingRepository for PgBookingStore {
    async fn insert_booking(&self, booking: &Booking) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, resource_id, user_id, start_at, end_at, status,
                                  price_cents, version, cancellation_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(booking.id)
        .bind(booking.resource_id)
        .bind(booking.user_id)
        .bind(booking.start_at)
        .bind(booking.end_at)
        .bind(booking.status.as_str())
        .bind(booking.price_cents)
        .bind(booking.version)
        .bind(&booking.cancellation_reason)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn booking(&self, id: Uuid) -> EngineResult<Option<Booking>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(map_booking).transpose()
    }

    async fn active_in_window(
        &self,
        resource_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<Booking>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BOOKING_COLUMNS} FROM bookings
            WHERE resource_id = $1
              AND status IN ('PENDING', 'CONFIRMED')
              AND start_at < $3
              AND end_at > $2
            ORDER BY start_at
            "#
        ))
        .bind(resource_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(map_booking).collect()
    }

    async fn active_on_day(
        &self,
        resource_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Vec<Booking>> {
        let day_start = date.and_time(NaiveTime::MIN).and_utc();
        let day_end = day_start + chrono::Duration::days(1);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {BOOKING_COLUMNS} FROM bookings
            WHERE resource_id = $1
              AND status IN ('PENDING', 'CONFIRMED')
              AND start_at >= $2
              AND start_at < $3
            ORDER BY start_at
            "#
        ))
        .bind(resource_id)
        .bind(day_start)
        .bind(day_end)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(map_booking).collect()
    }

    async fn count_active_starting_between(
        &self,
        resource_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS demand FROM bookings
            WHERE resource_id = $1
              AND status IN ('PENDING', 'CONFIRMED')
              AND start_at BETWEEN $2 AND $3
            "#,
        )
        .bind(resource_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        let demand: i64 = row.try_get("demand").map_err(store_err)?;
        Ok(demand.max(0) as u64)
    }

    async fn update_booking_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: BookingStatus,
        cancellation_reason: Option<String>,
    ) -> EngineResult<Booking> {
        let current = self
            .booking(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;
        if current.version != expected_version {
            return Err(EngineError::StaleVersion(id));
        }
        current
            .ensure_transition(status)
            .map_err(|err| EngineError::Conflict(err.to_string()))?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE bookings
            SET status = $1,
                cancellation_reason = COALESCE($2, cancellation_reason),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $3 AND version = $4
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(status.as_str())
        .bind(&cancellation_reason)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => map_booking(&row),
            // The row moved between our read and the CAS write.
            None => Err(EngineError::StaleVersion(id)),
        }
    }

    async fn insert_payment(&self, payment: &Payment) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, booking_id, amount_cents, status,
                                  external_reference, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(payment.id)
        .bind(payment.booking_id)
        .bind(payment.amount_cents)
        .bind(payment.status.as_str())
        .bind(&payment.external_reference)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn update_payment(&self, payment: &Payment) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1, external_reference = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(payment.status.as_str())
        .bind(&payment.external_reference)
        .bind(payment.updated_at)
        .bind(payment.id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("payment {}", payment.id)));
        }
        Ok(())
    }

    async fn payment_for_booking(&self, booking_id: Uuid) -> EngineResult<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT id, booking_id, amount_cents, status, external_reference, created_at, updated_at
            FROM payments
            WHERE booking_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(map_payment).transpose()
    }
}
