use async_trait::async_trait;
use chrono::NaiveDate;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use reserva_core::sync::{snapshot_cache_key, AvailabilityCache, DistributedLock, LockToken};
use reserva_core::{EngineError, EngineResult};
use reserva_domain::availability::DaySnapshot;

/// Redis-backed distributed lock and availability cache. Locks are
/// SET NX EX with a per-holder token; release is a compare-and-delete so a
/// holder whose TTL lapsed cannot free a lock someone else now owns.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

const RELEASE_IF_OWNED: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

impl RedisClient {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }
}

fn lock_err(err: redis::RedisError) -> EngineError {
    EngineError::Lock(err.to_string())
}

fn cache_err(err: redis::RedisError) -> EngineError {
    EngineError::Cache(err.to_string())
}

#[async_trait]
impl DistributedLock for RedisClient {
    async fn acquire(&self, key: &str, ttl: Duration) -> EngineResult<Option<LockToken>> {
        let mut conn = self.conn().await.map_err(lock_err)?;
        let token = LockToken::generate();

        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.as_str())
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(lock_err)?;

        Ok(set.map(|_| token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> EngineResult<bool> {
        let mut conn = self.conn().await.map_err(lock_err)?;
        let released: i32 = redis::Script::new(RELEASE_IF_OWNED)
            .key(key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(lock_err)?;
        Ok(released == 1)
    }
}

#[async_trait]
impl AvailabilityCache for RedisClient {
    async fn get(&self, resource_id: Uuid, date: NaiveDate) -> EngineResult<Option<DaySnapshot>> {
        let mut conn = self.conn().await.map_err(cache_err)?;
        let key = snapshot_cache_key(resource_id, date);
        let raw: Option<String> = conn.get(&key).await.map_err(cache_err)?;

        match raw {
            None => Ok(None),
            Some(payload) => match serde_json::from_str(&payload) {
                Ok(snapshot) => Ok(Some(snapshot)),
                Err(err) => {
                    // A corrupt entry behaves like a miss and gets rebuilt.
                    warn!(%key, error = %err, "discarding undecodable snapshot");
                    let _: () = conn.del(&key).await.map_err(cache_err)?;
                    Ok(None)
                }
            },
        }
    }

    async fn put(&self, snapshot: &DaySnapshot, ttl: Duration) -> EngineResult<()> {
        let mut conn = self.conn().await.map_err(cache_err)?;
        let key = snapshot_cache_key(snapshot.resource_id, snapshot.date);
        let payload = serde_json::to_string(snapshot)
            .map_err(|err| EngineError::Cache(err.to_string()))?;
        conn.set_ex::<_, _, ()>(&key, payload, ttl.as_secs().max(1))
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn evict(&self, resource_id: Uuid, date: NaiveDate) -> EngineResult<()> {
        let mut conn = self.conn().await.map_err(cache_err)?;
        let key = snapshot_cache_key(resource_id, date);
        let _: () = conn.del(&key).await.map_err(cache_err)?;
        Ok(())
    }
}
