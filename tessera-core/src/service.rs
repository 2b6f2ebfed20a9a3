use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{ReservationError, StoreResult};
use crate::lifecycle::Clock;
use crate::models::Reservation;
use crate::repository::{CapacityStore, ReservationTx};
use crate::{allocation, cancellation, confirmation, sweeper};

/// Default lifetime of a pending hold.
pub const DEFAULT_HOLD_TTL_SECONDS: i64 = 300;

/// Runs each reservation operation in its own transaction against the store.
pub struct ReservationService {
    store: Arc<dyn CapacityStore>,
    hold_ttl: Duration,
    clock: Clock,
}

impl ReservationService {
    pub fn new(store: Arc<dyn CapacityStore>, hold_ttl: Duration) -> Self {
        Self {
            store,
            hold_ttl,
            clock: Utc::now,
        }
    }

    #[instrument(skip(self))]
    pub async fn hold(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Reservation, ReservationError> {
        let mut tx = self.store.begin().await?;
        let result =
            allocation::hold(tx.as_mut(), event_id, user_id, self.clock, self.hold_ttl).await;
        let reservation = finish(tx, result).await?;

        info!(reservation_id = %reservation.id, expires_at = ?reservation.expires_at, "Seat held");
        Ok(reservation)
    }

    #[instrument(skip(self))]
    pub async fn confirm(
        &self,
        reservation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Reservation, ReservationError> {
        let mut tx = self.store.begin().await?;
        let result = confirmation::confirm(tx.as_mut(), reservation_id, user_id, self.clock).await;
        let reservation = finish(tx, result).await?;

        info!(event_id = %reservation.event_id, "Reservation confirmed");
        Ok(reservation)
    }

    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        reservation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Reservation, ReservationError> {
        let mut tx = self.store.begin().await?;
        let result = cancellation::cancel(tx.as_mut(), reservation_id, user_id, self.clock).await;
        let reservation = finish(tx, result).await?;

        info!(event_id = %reservation.event_id, "Reservation canceled");
        Ok(reservation)
    }

    /// Read a reservation on behalf of its owner.
    pub async fn get(
        &self,
        reservation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Reservation, ReservationError> {
        let mut tx = self.store.begin().await?;
        let result = match tx.get_reservation(reservation_id).await {
            Ok(Some(r)) if r.is_owned_by(user_id) => Ok(r),
            Ok(Some(_)) => Err(ReservationError::Unauthorized),
            Ok(None) => Err(ReservationError::NotFound),
            Err(e) => Err(e.into()),
        };
        finish(tx, result).await
    }

    pub async fn sweep_expired(&self) -> StoreResult<u64> {
        sweeper::sweep_expired(self.store.as_ref(), (self.clock)()).await
    }
}

/// Commit on success, roll back on a domain or store error.
async fn finish<T>(
    tx: Box<dyn ReservationTx>,
    result: Result<T, ReservationError>,
) -> Result<T, ReservationError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(err)
        }
    }
}
