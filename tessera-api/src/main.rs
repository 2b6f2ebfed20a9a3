use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tessera_api::{
    app,
    metrics::Metrics,
    state::{AppState, AuthConfig},
    worker,
};
use tessera_core::{IdempotencyGuard, ReservationService};
use tessera_store::{app_config::Config, DbClient, PgCapacityStore, RedisClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_api=debug,tessera_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Tessera API on port {}", config.server.port);

    // Postgres Connection
    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    // Redis Connection
    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;

    let reservations = Arc::new(ReservationService::new(
        Arc::new(PgCapacityStore::new(db.pool.clone())),
        chrono::Duration::seconds(config.reservation.hold_ttl_seconds),
    ));
    let idempotency = Arc::new(IdempotencyGuard::new(Arc::new(redis)).with_ttls(
        std::time::Duration::from_secs(config.idempotency.lock_ttl_seconds),
        std::time::Duration::from_secs(config.idempotency.response_ttl_seconds),
    ));
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    if config.sweeper.interval_seconds > 0 {
        tokio::spawn(worker::start_expiry_worker(
            reservations.clone(),
            metrics.clone(),
            std::time::Duration::from_secs(config.sweeper.interval_seconds),
        ));
    }

    let app_state = AppState {
        reservations,
        idempotency,
        metrics,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
