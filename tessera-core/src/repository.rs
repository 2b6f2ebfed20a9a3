use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{Event, Reservation};

/// Transactional capacity store: events plus their reservations.
#[async_trait]
pub trait CapacityStore: Send + Sync {
    /// Open a unit of work. Dropping the handle without committing rolls it back.
    async fn begin(&self) -> StoreResult<Box<dyn ReservationTx>>;

    /// Create an event, or overwrite the one with the same id.
    async fn upsert_event(&self, event: &Event) -> StoreResult<Event>;
}

/// Explicit transaction handle passed into every reservation operation.
///
/// `lock_*` methods take an exclusive row lock that is held until
/// [`commit`](ReservationTx::commit) or [`rollback`](ReservationTx::rollback).
#[async_trait]
pub trait ReservationTx: Send {
    async fn lock_event(&mut self, event_id: Uuid) -> StoreResult<Option<Event>>;

    async fn get_event(&mut self, event_id: Uuid) -> StoreResult<Option<Event>>;

    async fn lock_reservation(&mut self, reservation_id: Uuid) -> StoreResult<Option<Reservation>>;

    async fn get_reservation(&mut self, reservation_id: Uuid) -> StoreResult<Option<Reservation>>;

    /// The caller's row for an event; at most one exists.
    async fn find_user_reservation(
        &mut self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Reservation>>;

    /// Confirmed plus live pending reservations for the event, optionally
    /// leaving one row out of the count.
    async fn count_active(
        &mut self,
        event_id: Uuid,
        now: DateTime<Utc>,
        excluding: Option<Uuid>,
    ) -> StoreResult<i64>;

    /// Insert, or overwrite the existing row for `(event_id, user_id)`.
    /// Returns the row as stored, which keeps the existing id on conflict.
    async fn upsert_reservation(&mut self, reservation: &Reservation) -> StoreResult<Reservation>;

    async fn update_reservation(&mut self, reservation: &Reservation) -> StoreResult<()>;

    /// Set-based `Pending -> Expired` for every hold with `expires_at < now`.
    async fn expire_pending(&mut self, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
