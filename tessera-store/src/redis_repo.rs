use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use tessera_core::error::{StoreError, StoreResult};
use tessera_core::idempotency::{CachedResponse, IdempotencyStore};

/// Deletes the lock only while it still carries the caller's token, so a
/// request whose lock already timed out cannot free someone else's.
const RELEASE_LOCK_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::backend)
    }
}

#[async_trait]
impl IdempotencyStore for RedisClient {
    async fn fetch(&self, key: &str) -> StoreResult<Option<CachedResponse>> {
        let mut conn = self.connection().await?;
        let cached: Option<String> = conn.get(key).await.map_err(StoreError::backend)?;

        cached
            .map(|json| serde_json::from_str(&json).map_err(StoreError::backend))
            .transpose()
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection().await?;

        // SET NX: Only set if key does not exist
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;

        Ok(result.is_some())
    }

    async fn store(&self, key: &str, response: &CachedResponse, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(response).map_err(StoreError::backend)?;
        conn.set_ex::<_, _, ()>(key, json, ttl.as_secs())
            .await
            .map_err(StoreError::backend)?;
        debug!("Cached idempotent response under {}", key);
        Ok(())
    }

    async fn release(&self, key: &str, token: &str) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}
