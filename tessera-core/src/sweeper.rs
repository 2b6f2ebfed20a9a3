use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::StoreResult;
use crate::repository::CapacityStore;

/// Move every lapsed pending hold to `Expired` in one transaction.
///
/// Readers already treat lapsed holds as dead, so this only reconciles the
/// stored status. Rows that changed after selection are skipped by the store.
pub async fn sweep_expired(store: &dyn CapacityStore, now: DateTime<Utc>) -> StoreResult<u64> {
    let mut tx = store.begin().await?;
    let released = tx.expire_pending(now).await?;
    tx.commit().await?;

    if released > 0 {
        info!(released, "Released expired holds");
    }

    Ok(released)
}
