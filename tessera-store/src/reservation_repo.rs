use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use tessera_core::error::{StoreError, StoreResult};
use tessera_core::models::{Event, Reservation, ReservationStatus};
use tessera_core::repository::{CapacityStore, ReservationTx};

const RESERVATION_COLUMNS: &str =
    "id, event_id, user_id, status, reserved_at, expires_at, canceled_at";
const EVENT_COLUMNS: &str = "id, name, total_seats, start_at, end_at";

/// Postgres-backed capacity store. Row locks are `SELECT ... FOR UPDATE`.
pub struct PgCapacityStore {
    pool: PgPool,
}

impl PgCapacityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    name: String,
    total_seats: i32,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            name: row.name,
            total_seats: row.total_seats,
            start_at: row.start_at,
            end_at: row.end_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    status: String,
    reserved_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            status: row.status.parse()?,
            reserved_at: row.reserved_at,
            expires_at: row.expires_at,
            canceled_at: row.canceled_at,
        })
    }
}

fn into_reservation(row: Option<ReservationRow>) -> StoreResult<Option<Reservation>> {
    row.map(Reservation::try_from).transpose()
}

#[async_trait]
impl CapacityStore for PgCapacityStore {
    async fn begin(&self) -> StoreResult<Box<dyn ReservationTx>> {
        let tx = self.pool.begin().await.map_err(StoreError::backend)?;
        Ok(Box::new(PgReservationTx { tx }))
    }

    async fn upsert_event(&self, event: &Event) -> StoreResult<Event> {
        let sql = format!(
            r#"
            INSERT INTO events (id, name, total_seats, start_at, end_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                total_seats = EXCLUDED.total_seats,
                start_at = EXCLUDED.start_at,
                end_at = EXCLUDED.end_at
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event.id)
            .bind(&event.name)
            .bind(event.total_seats)
            .bind(event.start_at)
            .bind(event.end_at)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.into())
    }
}

pub struct PgReservationTx {
    tx: Transaction<'static, Postgres>,
}

impl PgReservationTx {
    async fn fetch_event(
        &mut self,
        event_id: Uuid,
        for_update: bool,
    ) -> StoreResult<Option<Event>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.map(Event::from))
    }

    async fn fetch_reservation(
        &mut self,
        reservation_id: Uuid,
        for_update: bool,
    ) -> StoreResult<Option<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(reservation_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        into_reservation(row)
    }
}

#[async_trait]
impl ReservationTx for PgReservationTx {
    async fn lock_event(&mut self, event_id: Uuid) -> StoreResult<Option<Event>> {
        self.fetch_event(event_id, true).await
    }

    async fn get_event(&mut self, event_id: Uuid) -> StoreResult<Option<Event>> {
        self.fetch_event(event_id, false).await
    }

    async fn lock_reservation(&mut self, reservation_id: Uuid) -> StoreResult<Option<Reservation>> {
        self.fetch_reservation(reservation_id, true).await
    }

    async fn get_reservation(&mut self, reservation_id: Uuid) -> StoreResult<Option<Reservation>> {
        self.fetch_reservation(reservation_id, false).await
    }

    async fn find_user_reservation(
        &mut self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE event_id = $1 AND user_id = $2"
        );
        let row = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(event_id)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        into_reservation(row)
    }

    async fn count_active(
        &mut self,
        event_id: Uuid,
        now: DateTime<Utc>,
        excluding: Option<Uuid>,
    ) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM reservations
            WHERE event_id = $1
              AND ($2::uuid IS NULL OR id <> $2)
              AND (status = 'confirmed' OR (status = 'pending' AND expires_at > $3))
            "#,
        )
        .bind(event_id)
        .bind(excluding)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::backend)
    }

    async fn upsert_reservation(&mut self, reservation: &Reservation) -> StoreResult<Reservation> {
        let sql = format!(
            r#"
            INSERT INTO reservations
                (id, event_id, user_id, status, reserved_at, expires_at, canceled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id, user_id) DO UPDATE SET
                status = EXCLUDED.status,
                reserved_at = EXCLUDED.reserved_at,
                expires_at = EXCLUDED.expires_at,
                canceled_at = EXCLUDED.canceled_at,
                updated_at = NOW()
            RETURNING {RESERVATION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(reservation.id)
            .bind(reservation.event_id)
            .bind(reservation.user_id)
            .bind(reservation.status.as_str())
            .bind(reservation.reserved_at)
            .bind(reservation.expires_at)
            .bind(reservation.canceled_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        Reservation::try_from(row)
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE reservations
            SET status = $2, reserved_at = $3, expires_at = $4, canceled_at = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.status.as_str())
        .bind(reservation.reserved_at)
        .bind(reservation.expires_at)
        .bind(reservation.canceled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn expire_pending(&mut self, now: DateTime<Utc>) -> StoreResult<u64> {
        // Postgres re-evaluates the WHERE clause on rows it had to wait for,
        // so a row confirmed or re-held meanwhile is left alone.
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = $1, updated_at = NOW()
            WHERE status = $2 AND expires_at < $3
            "#,
        )
        .bind(ReservationStatus::Expired.as_str())
        .bind(ReservationStatus::Pending.as_str())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(StoreError::backend)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(StoreError::backend)
    }
}
