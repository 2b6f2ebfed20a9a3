use chrono::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::ReservationError;
use crate::lifecycle::{self, Clock, HoldPlan};
use crate::models::Reservation;
use crate::repository::ReservationTx;

/// Acquire a pending hold on one seat of `event_id` for `user_id`.
///
/// The event row lock taken first serializes every hold for the event, so the
/// count and the upsert below see and produce a consistent seat total. Both
/// must stay inside the same transaction. `clock` is read once the event lock
/// is held.
pub async fn hold(
    tx: &mut dyn ReservationTx,
    event_id: Uuid,
    user_id: Uuid,
    clock: Clock,
    ttl: Duration,
) -> Result<Reservation, ReservationError> {
    let event = tx
        .lock_event(event_id)
        .await?
        .ok_or(ReservationError::NotFound)?;
    let now = clock();

    let existing = tx.find_user_reservation(event.id, user_id).await?;

    let excluded = match lifecycle::plan_hold(existing.as_ref(), now)? {
        HoldPlan::Replay => {
            debug!(%event_id, %user_id, "live hold already present, replaying");
            return existing.ok_or(ReservationError::NotFound);
        }
        HoldPlan::Reactivate(id) => Some(id),
        HoldPlan::Create => None,
    };

    let active = tx.count_active(event.id, now, excluded).await?;
    if active >= i64::from(event.total_seats) {
        debug!(%event_id, active, total = event.total_seats, "event is full");
        return Err(ReservationError::SeatsFull);
    }

    let next = match existing {
        Some(previous) => lifecycle::activate_hold(previous, now, ttl),
        None => Reservation::new_hold(event.id, user_id, now, ttl),
    };

    Ok(tx.upsert_reservation(&next).await?)
}
