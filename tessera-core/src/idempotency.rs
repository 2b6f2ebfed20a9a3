//! Request-level deduplication keyed by a client-supplied idempotency key.
//!
//! Per scoped key the guard moves through
//! `NoRecord -> Locked -> Cached(success)` or back to `NoRecord` when the
//! wrapped handler fails. Only cached successes are ever replayed.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ReservationError, StoreResult};

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_RESPONSE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A complete response, stored verbatim so replays are byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Backend for cached responses and the short-lived per-key lock.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn fetch(&self, key: &str) -> StoreResult<Option<CachedResponse>>;

    /// Take the lock if nobody holds it. Returns `false` when already held.
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool>;

    async fn store(&self, key: &str, response: &CachedResponse, ttl: Duration) -> StoreResult<()>;

    /// Drop the lock, but only if `token` still owns it.
    async fn release(&self, key: &str, token: &str) -> StoreResult<()>;
}

/// Result of running a request through the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded {
    Fresh(CachedResponse),
    Replayed(CachedResponse),
}

impl Guarded {
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }

    pub fn into_response(self) -> CachedResponse {
        match self {
            Self::Fresh(r) | Self::Replayed(r) => r,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Scope {
    cache_key: String,
    lock_key: String,
}

impl Scope {
    fn new(requester: &str, key: &str) -> Self {
        Self {
            cache_key: format!("idempotency:{requester}:{key}"),
            lock_key: format!("idempotency-lock:{requester}:{key}"),
        }
    }
}

/// An acquired lock. Released explicitly once the handler is done; if the
/// request future is dropped first (client gone), the release is spawned onto
/// the runtime instead of waiting out the lock ttl.
struct LockLease {
    store: Arc<dyn IdempotencyStore>,
    key: String,
    token: String,
    released: bool,
}

impl LockLease {
    async fn release(mut self) {
        let result = self.store.release(&self.key, &self.token).await;
        self.released = true;
        if let Err(e) = result {
            // the lock ttl bounds how long the key stays blocked
            warn!(lock_key = %self.key, error = %e, "Failed to release idempotency lock");
        }
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        runtime.spawn(async move {
            match store.release(&key, &token).await {
                Ok(()) => debug!(lock_key = %key, "Released lock of abandoned request"),
                Err(e) => warn!(lock_key = %key, error = %e, "Failed to release idempotency lock"),
            }
        });
    }
}

pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    lock_ttl: Duration,
    response_ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            lock_ttl: DEFAULT_LOCK_TTL,
            response_ttl: DEFAULT_RESPONSE_TTL,
        }
    }

    pub fn with_ttls(mut self, lock_ttl: Duration, response_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self.response_ttl = response_ttl;
        self
    }

    /// Run `handler` at most once per `(requester, key)` while a cached
    /// success exists, and never twice concurrently.
    ///
    /// The lock is released on every exit path. A panicking handler releases
    /// the lock before the panic is resumed, and a dropped call hands the
    /// release to the runtime.
    pub async fn execute<F, Fut>(
        &self,
        requester: &str,
        key: Option<&str>,
        handler: F,
    ) -> Result<Guarded, ReservationError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CachedResponse> + Send,
    {
        let key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ReservationError::MissingIdempotencyKey)?;
        let scope = Scope::new(requester, key);

        if let Some(cached) = self.store.fetch(&scope.cache_key).await? {
            debug!(cache_key = %scope.cache_key, "Replaying cached response");
            return Ok(Guarded::Replayed(cached));
        }

        let token = Uuid::new_v4().to_string();
        if !self.store.try_lock(&scope.lock_key, &token, self.lock_ttl).await? {
            debug!(lock_key = %scope.lock_key, "Idempotency key is locked");
            return Err(ReservationError::RequestInProgress);
        }

        let lease = LockLease {
            store: self.store.clone(),
            key: scope.lock_key.clone(),
            token,
            released: false,
        };

        let outcome = AssertUnwindSafe(self.run_locked(&scope, handler))
            .catch_unwind()
            .await;
        lease.release().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn run_locked<F, Fut>(
        &self,
        scope: &Scope,
        handler: F,
    ) -> Result<Guarded, ReservationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachedResponse>,
    {
        // a twin request may have finished between the first lookup and the lock
        if let Some(cached) = self.store.fetch(&scope.cache_key).await? {
            return Ok(Guarded::Replayed(cached));
        }

        let response = handler().await;

        if response.is_success() {
            if let Err(e) = self
                .store
                .store(&scope.cache_key, &response, self.response_ttl)
                .await
            {
                warn!(cache_key = %scope.cache_key, error = %e, "Failed to cache response");
            }
        }

        Ok(Guarded::Fresh(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIdempotencyStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn response(status: u16, body: &str) -> CachedResponse {
        CachedResponse {
            status,
            content_type: Some("application/json".to_string()),
            body: body.as_bytes().to_vec(),
        }
    }

    fn guard() -> IdempotencyGuard {
        IdempotencyGuard::new(Arc::new(InMemoryIdempotencyStore::new()))
    }

    #[tokio::test]
    async fn test_missing_key_is_rejected() {
        let guard = guard();
        for key in [None, Some(""), Some("   ")] {
            let result = guard.execute("user-1", key, || async { response(200, "{}") }).await;
            assert!(matches!(result, Err(ReservationError::MissingIdempotencyKey)));
        }
    }

    #[tokio::test]
    async fn test_success_is_replayed_verbatim() {
        let guard = guard();
        let calls = AtomicUsize::new(0);

        let first = guard
            .execute("user-1", Some("key-1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                response(201, r#"{"reservation_id":"abc"}"#)
            })
            .await
            .unwrap();
        let second = guard
            .execute("user-1", Some("key-1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                response(201, r#"{"reservation_id":"other"}"#)
            })
            .await
            .unwrap();

        assert!(!first.is_replay());
        assert!(second.is_replay());
        assert_eq!(first.into_response().body, second.into_response().body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_requester() {
        let guard = guard();
        guard
            .execute("user-1", Some("shared"), || async { response(200, "one") })
            .await
            .unwrap();
        let other = guard
            .execute("user-2", Some("shared"), || async { response(200, "two") })
            .await
            .unwrap();

        assert!(!other.is_replay());
        assert_eq!(other.into_response().body, b"two".to_vec());
    }

    #[tokio::test]
    async fn test_failure_does_not_poison_key() {
        let guard = guard();
        let failed = guard
            .execute("user-1", Some("key-1"), || async { response(409, "full") })
            .await
            .unwrap();
        assert!(!failed.is_replay());

        let retried = guard
            .execute("user-1", Some("key-1"), || async { response(201, "held") })
            .await
            .unwrap();
        assert!(!retried.is_replay());
        assert_eq!(retried.into_response().status, 201);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_duplicate_is_in_progress() {
        let guard = Arc::new(guard());
        let (started_tx, started_rx) = oneshot::channel();
        let (finish_tx, finish_rx) = oneshot::channel::<()>();

        let first = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .execute("user-1", Some("key-1"), move || async move {
                        let _ = started_tx.send(());
                        let _ = finish_rx.await;
                        response(201, "held")
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        let duplicate = guard
            .execute("user-1", Some("key-1"), || async { response(201, "again") })
            .await;
        assert!(matches!(duplicate, Err(ReservationError::RequestInProgress)));

        finish_tx.send(()).unwrap();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.into_response().body, b"held".to_vec());

        let replay = guard
            .execute("user-1", Some("key-1"), || async { response(201, "again") })
            .await
            .unwrap();
        assert!(replay.is_replay());
        assert_eq!(replay.into_response().body, b"held".to_vec());
    }

    #[tokio::test]
    async fn test_panicking_handler_releases_lock() {
        let guard = Arc::new(guard());

        let panicked = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .execute("user-1", Some("key-1"), || async {
                        if true {
                            panic!("handler blew up");
                        }
                        response(200, "unreachable")
                    })
                    .await
            })
        };
        assert!(panicked.await.unwrap_err().is_panic());

        let retried = guard
            .execute("user-1", Some("key-1"), || async { response(200, "ok") })
            .await
            .unwrap();
        assert!(!retried.is_replay());
    }

    #[tokio::test]
    async fn test_abandoned_request_releases_lock() {
        let guard = guard();
        let (started_tx, started_rx) = oneshot::channel();

        let abandoned = guard.execute("user-1", Some("key-1"), move || async move {
            let _ = started_tx.send(());
            std::future::pending::<CachedResponse>().await
        });
        assert!(tokio::time::timeout(Duration::from_millis(50), abandoned)
            .await
            .is_err());
        started_rx.await.unwrap();

        // let the spawned release run
        tokio::time::sleep(Duration::from_millis(20)).await;

        let retried = guard
            .execute("user-1", Some("key-1"), || async { response(201, "held") })
            .await
            .unwrap();
        assert!(!retried.is_replay());
        assert_eq!(retried.into_response().status, 201);
    }
}
