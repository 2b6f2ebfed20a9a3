//! In-process stores used by tests and local runs.
//!
//! The capacity store mimics a row-locking relational database at
//! read-committed isolation: `lock_*` calls take a per-row async mutex held
//! until the transaction ends, writes stay private to the transaction, and
//! commit publishes them atomically. A row's mutex is dropped from the lock
//! table once no transaction holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::idempotency::{CachedResponse, IdempotencyStore};
use crate::lifecycle;
use crate::models::{Event, Reservation};
use crate::repository::{CapacityStore, ReservationTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Event(Uuid),
    Reservation(Uuid),
}

#[derive(Default)]
struct Tables {
    events: HashMap<Uuid, Event>,
    reservations: HashMap<Uuid, Reservation>,
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    // only touched between awaits
    row_locks: SyncMutex<HashMap<RowKey, Arc<Mutex<()>>>>,
}

#[derive(Clone, Default)]
pub struct InMemoryCapacityStore {
    shared: Arc<Shared>,
}

impl InMemoryCapacityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_event(&self, event: Event) {
        self.shared.tables.lock().await.events.insert(event.id, event);
    }

    /// Write a row directly, bypassing transactions. Intended for seeding.
    pub async fn insert_reservation(&self, reservation: Reservation) {
        self.shared
            .tables
            .lock()
            .await
            .reservations
            .insert(reservation.id, reservation);
    }

    pub async fn reservation(&self, id: Uuid) -> Option<Reservation> {
        self.shared.tables.lock().await.reservations.get(&id).cloned()
    }

    pub async fn reservations_for(&self, event_id: Uuid) -> Vec<Reservation> {
        self.shared
            .tables
            .lock()
            .await
            .reservations
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CapacityStore for InMemoryCapacityStore {
    async fn begin(&self) -> StoreResult<Box<dyn ReservationTx>> {
        Ok(Box::new(InMemoryTx {
            shared: self.shared.clone(),
            held: HashMap::new(),
            writes: HashMap::new(),
        }))
    }

    async fn upsert_event(&self, event: &Event) -> StoreResult<Event> {
        self.insert_event(event.clone()).await;
        Ok(event.clone())
    }
}

struct InMemoryTx {
    shared: Arc<Shared>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    writes: HashMap<Uuid, Reservation>,
}

impl InMemoryTx {
    async fn lock_row(&mut self, key: RowKey) {
        if self.held.contains_key(&key) {
            return;
        }

        let row = {
            let mut locks = self
                .shared
                .row_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            locks.entry(key).or_default().clone()
        };
        let guard = row.lock_owned().await;
        self.held.insert(key, guard);
    }

    async fn view(&self, id: Uuid) -> Option<Reservation> {
        if let Some(pending) = self.writes.get(&id) {
            return Some(pending.clone());
        }
        self.shared.tables.lock().await.reservations.get(&id).cloned()
    }

    /// Committed rows overlaid with this transaction's own writes.
    async fn snapshot(&self) -> Vec<Reservation> {
        let mut rows = self.shared.tables.lock().await.reservations.clone();
        rows.extend(self.writes.iter().map(|(id, r)| (*id, r.clone())));
        rows.into_values().collect()
    }
}

#[async_trait]
impl ReservationTx for InMemoryTx {
    async fn lock_event(&mut self, event_id: Uuid) -> StoreResult<Option<Event>> {
        self.lock_row(RowKey::Event(event_id)).await;
        self.get_event(event_id).await
    }

    async fn get_event(&mut self, event_id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.shared.tables.lock().await.events.get(&event_id).cloned())
    }

    async fn lock_reservation(&mut self, reservation_id: Uuid) -> StoreResult<Option<Reservation>> {
        self.lock_row(RowKey::Reservation(reservation_id)).await;
        Ok(self.view(reservation_id).await)
    }

    async fn get_reservation(&mut self, reservation_id: Uuid) -> StoreResult<Option<Reservation>> {
        Ok(self.view(reservation_id).await)
    }

    async fn find_user_reservation(
        &mut self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Reservation>> {
        Ok(self
            .snapshot()
            .await
            .into_iter()
            .find(|r| r.event_id == event_id && r.user_id == user_id))
    }

    async fn count_active(
        &mut self,
        event_id: Uuid,
        now: DateTime<Utc>,
        excluding: Option<Uuid>,
    ) -> StoreResult<i64> {
        let count = self
            .snapshot()
            .await
            .iter()
            .filter(|r| r.event_id == event_id && Some(r.id) != excluding && r.is_active(now))
            .count();
        Ok(count as i64)
    }

    async fn upsert_reservation(&mut self, reservation: &Reservation) -> StoreResult<Reservation> {
        let mut row = reservation.clone();
        if let Some(existing) = self
            .find_user_reservation(reservation.event_id, reservation.user_id)
            .await?
        {
            row.id = existing.id;
        }

        self.lock_row(RowKey::Reservation(row.id)).await;
        self.writes.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> StoreResult<()> {
        self.lock_row(RowKey::Reservation(reservation.id)).await;
        self.writes.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn expire_pending(&mut self, now: DateTime<Utc>) -> StoreResult<u64> {
        let candidates: Vec<Uuid> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|r| r.is_stale_hold(now))
            .map(|r| r.id)
            .collect();

        let mut expired = 0;
        for id in candidates {
            self.lock_row(RowKey::Reservation(id)).await;
            // re-check after the lock: a concurrent writer may have moved the row on
            if let Some(current) = self.view(id).await {
                if current.is_stale_hold(now) {
                    self.writes.insert(id, lifecycle::expire(current));
                    expired += 1;
                }
            }
        }

        Ok(expired)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut tx = self;
        let writes = std::mem::take(&mut tx.writes);
        tx.shared.tables.lock().await.reservations.extend(writes);
        // row locks are released when `tx` drops
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        let mut locks = self
            .shared
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (key, guard) in self.held.drain() {
            drop(guard);
            // waiters hold a clone of the Arc, so a count of one means idle
            if locks.get(&key).is_some_and(|row| Arc::strong_count(row) == 1) {
                locks.remove(&key);
            }
        }
    }
}

/// Idempotency backend kept in process memory.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    responses: Mutex<HashMap<String, (CachedResponse, Instant)>>,
    locks: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn fetch(&self, key: &str) -> StoreResult<Option<CachedResponse>> {
        let mut responses = self.responses.lock().await;
        match responses.get(key) {
            Some((response, expires)) if *expires > Instant::now() => Ok(Some(response.clone())),
            Some(_) => {
                responses.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut locks = self.locks.lock().await;
        locks.retain(|_, (_, expires)| *expires > now);
        if locks.contains_key(key) {
            return Ok(false);
        }
        locks.insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn store(&self, key: &str, response: &CachedResponse, ttl: Duration) -> StoreResult<()> {
        let now = Instant::now();
        let mut responses = self.responses.lock().await;
        responses.retain(|_, (_, expires)| *expires > now);
        responses.insert(key.to_string(), (response.clone(), now + ttl));
        Ok(())
    }

    async fn release(&self, key: &str, token: &str) -> StoreResult<()> {
        let mut locks = self.locks.lock().await;
        if locks.get(key).is_some_and(|(owner, _)| owner == token) {
            locks.remove(key);
        }
        Ok(())
    }
}
