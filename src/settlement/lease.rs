use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::AppResult;

/// Minimal TTL key-value store. `set_if_absent` must be a single atomic
/// operation - the run-lock depends on it not being check-then-set.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool>;

    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn delete(&self, key: &str) -> AppResult<()>;
}

/// In-memory cache with per-entry expiry. In a multi-process deployment this
/// would be Redis; the trait keeps that swap local.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let mut entries = self.entries.write().await;
        if let Some((_, expires_at)) = entries.get(key) {
            if *expires_at > Instant::now() {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// An acquired run-lock. Released explicitly; self-expires if the process
/// dies mid-run.
#[derive(Debug)]
pub struct Lease {
    key: String,
    token: String,
}

/// Per-asset mutual exclusion for settlement runs, distinct from the data
/// cache even when backed by the same store. Acquisition is one atomic
/// set-if-absent; the TTL bounds staleness after a crash.
pub struct RunLease {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl RunLease {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn key(asset_id: u64) -> String {
        format!("settlement:{}", asset_id)
    }

    /// `None` means another run for this asset currently holds the lock.
    pub async fn acquire(&self, asset_id: u64) -> AppResult<Option<Lease>> {
        let key = Self::key(asset_id);
        let token = format!("{:016x}", rand::random::<u64>());

        if self.cache.set_if_absent(&key, &token, self.ttl).await? {
            debug!("Acquired settlement lease {}", key);
            Ok(Some(Lease { key, token }))
        } else {
            Ok(None)
        }
    }

    /// Release only if we still hold it - an expired lease re-acquired by a
    /// newer run must not be deleted out from under that run.
    pub async fn release(&self, lease: Lease) -> AppResult<()> {
        if self.cache.get(&lease.key).await?.as_deref() == Some(lease.token.as_str()) {
            self.cache.delete(&lease.key).await?;
            debug!("Released settlement lease {}", lease.key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_is_exclusive() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);

        assert!(cache.set_if_absent("k", "a", ttl).await.unwrap());
        assert!(!cache.set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_expired_entry_can_be_reclaimed() {
        let cache = MemoryCache::new();

        assert!(cache
            .set_if_absent("k", "a", Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache
            .set_if_absent("k", "b", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_second_acquire_is_refused_until_release() {
        let lease = RunLease::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));

        let held = lease.acquire(7).await.unwrap().expect("first acquire");
        assert!(lease.acquire(7).await.unwrap().is_none());

        lease.release(held).await.unwrap();
        assert!(lease.acquire(7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_ignores_stale_lease() {
        let cache = Arc::new(MemoryCache::new());
        let lease = RunLease::new(cache.clone(), Duration::from_millis(10));

        let stale = lease.acquire(7).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A newer run picked up the expired slot
        let fresh = lease.acquire(7).await.unwrap().unwrap();

        // Releasing the stale lease must not evict the fresh holder
        lease.release(stale).await.unwrap();
        assert!(lease.acquire(7).await.unwrap().is_none());

        lease.release(fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_locks_are_per_asset() {
        let lease = RunLease::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));

        let _a = lease.acquire(1).await.unwrap().expect("asset 1");
        assert!(lease.acquire(2).await.unwrap().is_some());
    }
}
