use uuid::Uuid;

use crate::error::ReservationError;
use crate::lifecycle::{self, Clock, Transition};
use crate::models::Reservation;
use crate::repository::ReservationTx;

pub async fn cancel(
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

    let event = tx
        .get_event(current.event_id)
        .await?
        .ok_or(ReservationError::NotFound)?;

    match lifecycle::plan_cancel(&current, &event, user_id, now)? {
        Transition::Unchanged => Ok(current),
        Transition::Apply => {
            let canceled = lifecycle::cancel(current, now);
            tx.update_reservation(&canceled).await?;
            Ok(canceled)
        }
    }
}
