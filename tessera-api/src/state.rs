use std::sync::Arc;

use tessera_core::{IdempotencyGuard, ReservationService};

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationService>,
    pub idempotency: Arc<IdempotencyGuard>,
    pub metrics: Arc<Metrics>,
    pub auth: AuthConfig,
}
