//! Provisions the events listed in a catalog file (default `config/events`)
//! into Postgres. Safe to rerun for entries that carry a fixed `id`.

use anyhow::Context;
use tessera_core::seeding;
use tessera_store::{
    app_config::{Config, EventCatalog},
    DbClient, PgCapacityStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seed_events=info,tessera_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let catalog_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/events".to_string());
    let catalog = EventCatalog::load(&catalog_path)
        .with_context(|| format!("Failed to load event catalog {}", catalog_path))?;

    let config = Config::load().context("Failed to load config")?;
    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let store = PgCapacityStore::new(db.pool.clone());

    let seeded = seeding::seed_events(&store, catalog.events)
        .await
        .context("Failed to seed events")?;

    for event in &seeded {
        println!("{} {} ({} seats)", event.id, event.name, event.total_seats);
    }
    println!("Seeded {} event(s)", seeded.len());
    Ok(())
}
