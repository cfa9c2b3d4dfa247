use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;
use uuid::Uuid;

use crate::EngineResult;
use reserva_domain::availability::DaySnapshot;

/// Opaque proof of lock ownership. Release only succeeds when the caller
/// presents the token it was issued, so a holder whose TTL expired cannot
/// release a lock someone else has since acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Short-lived mutual exclusion keyed by string; any TTL-capable key-value
/// store can back it.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Set-if-absent with expiry. `None` means the key is held elsewhere.
    async fn acquire(&self, key: &str, ttl: Duration) -> EngineResult<Option<LockToken>>;

    /// Token-checked delete; returns whether this call released the lock.
    async fn release(&self, key: &str, token: &LockToken) -> EngineResult<bool>;
}

/// Read-through cache of per-day availability snapshots. TTL-bound and
/// explicitly evicted after every committing write.
#[async_trait]
pub trait AvailabilityCache: Send + Sync {
    async fn get(&self, resource_id: Uuid, date: NaiveDate) -> EngineResult<Option<DaySnapshot>>;

    async fn put(&self, snapshot: &DaySnapshot, ttl: Duration) -> EngineResult<()>;

    async fn evict(&self, resource_id: Uuid, date: NaiveDate) -> EngineResult<()>;
}

pub fn resource_lock_key(resource_id: Uuid) -> String {
    format!("resource:{resource_id}")
}

pub fn snapshot_cache_key(resource_id: Uuid, date: NaiveDate) -> String {
    format!("avail:{resource_id}:{date}")
}

/// Guards snapshot recomputation on a cache miss (stampede prevention);
/// deliberately distinct from the cache key itself.
pub fn snapshot_lock_key(resource_id: Uuid, date: NaiveDate) -> String {
    format!("avail:{resource_id}:{date}:rebuild")
}
