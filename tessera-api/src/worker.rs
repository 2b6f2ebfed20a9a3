use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use tessera_core::ReservationService;

use crate::metrics::Metrics;

/// Periodically moves lapsed holds to `expired`. Failures are logged and the
/// next tick tries again.
pub async fn start_expiry_worker(
    reservations: Arc<ReservationService>,
    metrics: Arc<Metrics>,
    every: Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Expiry worker started, sweeping every {:?}", every);

    loop {
        ticker.tick().await;
        match reservations.sweep_expired().await {
            Ok(released) => metrics.swept.inc_by(released),
            Err(e) => error!("Failed to release expired holds: {}", e),
        }
    }
}
