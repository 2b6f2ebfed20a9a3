//! Prometheus counters for the reservation surface, served at `/metrics`.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{opts, IntCounter, IntCounterVec, Registry, TextEncoder};

use tessera_core::ReservationError;

use crate::state::AppState;

pub struct Metrics {
    registry: Registry,
    pub holds: IntCounter,
    pub confirmations: IntCounter,
    pub cancellations: IntCounter,
    pub swept: IntCounter,
    pub replays: IntCounter,
    /// Labels: `code` (the error token returned to the client)
    rejections: IntCounterVec,
}

impl Metrics {
    /// # Errors
    ///
    /// Returns an error if a collector cannot be registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let holds = IntCounter::with_opts(opts!("tessera_holds_total", "Pending holds granted"))?;
        let confirmations =
            IntCounter::with_opts(opts!("tessera_confirmations_total", "Reservations confirmed"))?;
        let cancellations =
            IntCounter::with_opts(opts!("tessera_cancellations_total", "Reservations canceled"))?;
        let swept = IntCounter::with_opts(opts!(
            "tessera_expired_holds_total",
            "Pending holds moved to expired by the sweeper"
        ))?;
        let replays = IntCounter::with_opts(opts!(
            "tessera_idempotent_replays_total",
            "Responses served from the idempotency cache"
        ))?;
        let rejections = IntCounterVec::new(
            opts!("tessera_rejections_total", "Requests rejected with an error token"),
            &["code"],
        )?;

        registry.register(Box::new(holds.clone()))?;
        registry.register(Box::new(confirmations.clone()))?;
        registry.register(Box::new(cancellations.clone()))?;
        registry.register(Box::new(swept.clone()))?;
        registry.register(Box::new(replays.clone()))?;
        registry.register(Box::new(rejections.clone()))?;

        Ok(Self {
            registry,
            holds,
            confirmations,
            cancellations,
            swept,
            replays,
            rejections,
        })
    }

    pub fn record_rejection(&self, err: &ReservationError) {
        self.rejections.with_label_values(&[err.code()]).inc();
    }

    pub fn export(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.export() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
