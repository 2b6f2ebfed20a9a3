use uuid::Uuid;

use crate::error::ReservationError;
use crate::lifecycle::{self, Clock, Transition};
use crate::models::Reservation;
use crate::repository::ReservationTx;

/// Promote a live hold to `Confirmed`. Re-confirming is a no-op, since this
/// runs on the payment callback path and gets retried.
pub async fn confirm(
    tx: &mut dyn ReservationTx,
    reservation_id: Uuid,
    user_id: Uuid,
    clock: Clock,
) -> Result<Reservation, ReservationError> {
    let current = tx
        .lock_reservation(reservation_id)
        .await?
        .ok_or(ReservationError::NotFound)?;
    let now = clock();

    match lifecycle::plan_confirm(&current, user_id, now)? {
        Transition::Unchanged => Ok(current),
        Transition::Apply => {
            let confirmed = lifecycle::confirm(current, now);
            tx.update_reservation(&confirmed).await?;
            Ok(confirmed)
        }
    }
}
