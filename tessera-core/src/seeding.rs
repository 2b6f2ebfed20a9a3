//! Provisioning of events from a static catalog.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::Event;
use crate::repository::CapacityStore;

/// One catalog entry. Give it a fixed `id` to make reseeding update the
/// same event instead of adding another one.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EventSeed {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub total_seats: i32,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

impl EventSeed {
    pub fn into_event(self) -> Event {
        let mut event = Event::new(self.name, self.total_seats);
        if let Some(id) = self.id {
            event.id = id;
        }
        event.start_at = self.start_at;
        event.end_at = self.end_at;
        event
    }
}

pub async fn seed_events(
    store: &dyn CapacityStore,
    seeds: Vec<EventSeed>,
) -> StoreResult<Vec<Event>> {
    let mut seeded = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let event = store.upsert_event(&seed.into_event()).await?;
        info!(
            event_id = %event.id,
            total_seats = event.total_seats,
            "Seeded event {}",
            event.name
        );
        seeded.push(event);
    }
    Ok(seeded)
}
