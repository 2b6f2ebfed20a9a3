//! Scheduled job: moves every lapsed pending hold to `expired` and reports
//! how many rows changed.

use anyhow::Context;
use chrono::Utc;
use tessera_core::sweeper;
use tessera_store::{app_config::Config, DbClient, PgCapacityStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "release_expired=info,tessera_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    let store = PgCapacityStore::new(db.pool.clone());

    let released = sweeper::sweep_expired(&store, Utc::now())
        .await
        .context("Failed to release expired holds")?;

    println!("Released {released} expired reservation(s)");
    Ok(())
}
