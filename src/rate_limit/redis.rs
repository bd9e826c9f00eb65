use super::lua_scripts::INCREMENT_IF_BELOW_SCRIPT;
use super::store::CounterStore;
use crate::config::MAX_DURATION_SECS;
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, error, info};

/// Redis-backed counter store shared by every guard replica
#[derive(Clone)]
pub struct RedisCounterStore {
    /// Redis connection manager (cheap to clone, reconnects on its own)
    connection: ConnectionManager,
    /// Compare-and-increment script, loaded lazily by EVALSHA
    increment_script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis.
    ///
    /// Accepts either a full `redis://` / `rediss://` URL or a bare
    /// `host:port` address.
    pub async fn connect(address: &str) -> Result<Self> {
        let url = normalize_url(address);
        info!(url = %url, "Connecting to Redis counter store");

        let client = redis::Client::open(url.as_str())
            .map_err(|e| GuardError::Config(format!("Invalid Redis address '{}': {}", address, e)))?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            GuardError::StoreUnavailable(format!("Failed to connect to Redis: {}", e))
        })?;

        Ok(Self {
            connection,
            increment_script: Script::new(INCREMENT_IF_BELOW_SCRIPT),
        })
    }
}

/// Turn a bare `host:port` into a Redis URL
fn normalize_url(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("redis://{}", address)
    }
}

/// TTL in PEXPIRE milliseconds, checked before any write touches the key
fn ttl_millis(ttl: Duration) -> Result<i64> {
    if ttl > Duration::from_secs(MAX_DURATION_SECS) {
        return Err(GuardError::Config(format!(
            "Counter TTL of {:?} is out of range",
            ttl
        )));
    }
    // Bounded above, so the milliseconds fit
    Ok(ttl.as_millis() as i64)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get_count(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection.clone();

        let count: Option<u64> = conn.get(key).await.map_err(|e| {
            error!(key = %key, error = %e, "Redis GET failed");
            GuardError::StoreUnavailable(format!("get request count: {}", e))
        })?;

        Ok(count.unwrap_or(0))
    }

    async fn increment_and_refresh(&self, key: &str, ttl: Duration) -> Result<()> {
        let ttl_ms = ttl_millis(ttl)?;
        let mut conn = self.connection.clone();

        let count: u64 = conn.incr(key, 1u64).await.map_err(|e| {
            error!(key = %key, error = %e, "Redis INCR failed");
            GuardError::StoreUnavailable(format!("increment request count: {}", e))
        })?;

        let _: bool = conn.pexpire(key, ttl_ms).await.map_err(|e| {
            error!(key = %key, count, error = %e, "Redis PEXPIRE failed after INCR");
            GuardError::StoreUnavailable(format!("refresh request count expiry: {}", e))
        })?;

        debug!(key = %key, count, ttl_ms, "Counter incremented");
        Ok(())
    }

    async fn increment_if_below(
        &self,
        key: &str,
        limit: u64,
        ttl: Duration,
    ) -> Result<Option<u64>> {
        let ttl_ms = ttl_millis(ttl)?;
        let mut conn = self.connection.clone();

        let result: Vec<i64> = self
            .increment_script
            .key(key)
            .arg(limit)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Redis compare-and-increment script failed");
                GuardError::StoreUnavailable(format!("compare and increment: {}", e))
            })?;

        match result.as_slice() {
            [incremented, count] => {
                let count = u64::try_from(*count).map_err(|_| {
                    GuardError::StoreUnavailable(format!("negative counter value {}", count))
                })?;
                debug!(key = %key, count, incremented = *incremented == 1, "Compare-and-increment");
                Ok((*incremented == 1).then_some(count))
            }
            other => Err(GuardError::StoreUnavailable(format!(
                "unexpected script reply: {:?}",
                other
            ))),
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(GuardError::from)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: the store tests require a running Redis instance.
    // They are ignored by default. Run with: cargo test -- --ignored

    async fn create_test_store() -> RedisCounterStore {
        RedisCounterStore::connect("127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis")
    }

    fn unique_key(prefix: &str) -> String {
        format!("rate_limit:{}-{}", prefix, rand::random::<u32>())
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("localhost:6379"), "redis://localhost:6379");
        assert_eq!(
            normalize_url("redis://cache.internal:6380/2"),
            "redis://cache.internal:6380/2"
        );
        assert_eq!(
            normalize_url("rediss://cache.internal:6380"),
            "rediss://cache.internal:6380"
        );
    }

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(10)).unwrap(), 10_000);
        assert_eq!(ttl_millis(Duration::from_millis(250)).unwrap(), 250);
        assert!(matches!(
            ttl_millis(Duration::from_secs(MAX_DURATION_SECS + 1)),
            Err(GuardError::Config(_))
        ));
        assert!(matches!(ttl_millis(Duration::MAX), Err(GuardError::Config(_))));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_missing_key_counts_zero() {
        let store = create_test_store().await;
        let key = unique_key("missing");

        assert_eq!(store.get_count(&key).await.unwrap(), 0);
        // Reading must not create the key
        assert_eq!(store.get_count(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_increment_and_refresh() {
        let store = create_test_store().await;
        let key = unique_key("incr");

        for expected in 1..=3 {
            store
                .increment_and_refresh(&key, Duration::from_secs(10))
                .await
                .unwrap();
            assert_eq!(store.get_count(&key).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_counter_expires() {
        let store = create_test_store().await;
        let key = unique_key("expire");

        store
            .increment_and_refresh(&key, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(store.get_count(&key).await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.get_count(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_increment_if_below() {
        let store = create_test_store().await;
        let key = unique_key("atomic");
        let ttl = Duration::from_secs(10);

        assert_eq!(store.increment_if_below(&key, 2, ttl).await.unwrap(), Some(1));
        assert_eq!(store.increment_if_below(&key, 2, ttl).await.unwrap(), Some(2));
        assert_eq!(store.increment_if_below(&key, 2, ttl).await.unwrap(), None);
        assert_eq!(store.get_count(&key).await.unwrap(), 2);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_connection() {
        let store = create_test_store().await;
        assert!(store.ping().await.is_ok());
    }
}
