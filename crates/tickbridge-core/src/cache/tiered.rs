use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{CacheTier, DiskTier, MemoryTier};

const L1_TTL_CAP: Duration = Duration::from_secs(60);
const L2_TTL_CAP: Duration = Duration::from_secs(900);

/// Layered read-through/write-through cache over three [`CacheTier`]s.
///
/// Higher tiers are disposable views: a hit in a lower tier backfills the
/// tiers above it with a short TTL, and the lowest tier stays
/// authoritative until its own TTL expires.
pub struct TieredCache {
    l1: Arc<dyn CacheTier>,
    l2: Arc<dyn CacheTier>,
    l3: Arc<dyn CacheTier>,
    l1_backfill_ttl: Duration,
    l2_backfill_ttl: Duration,
}

impl TieredCache {
    pub fn new(l1: Arc<dyn CacheTier>, l2: Arc<dyn CacheTier>, l3: Arc<dyn CacheTier>) -> Self {
        Self {
            l1,
            l2,
            l3,
            l1_backfill_ttl: L1_TTL_CAP,
            l2_backfill_ttl: L2_TTL_CAP,
        }
    }

    /// Default wiring: memory L1, memory stand-in L2 and a durable disk
    /// L3 under `dir`. Deployments with a networked store swap in their
    /// own L2 via [`TieredCache::new`].
    pub fn standard(dir: impl Into<PathBuf>) -> Self {
        Self::new(
            Arc::new(MemoryTier::new("l1", Some(L1_TTL_CAP))),
            Arc::new(MemoryTier::new("l2", Some(L2_TTL_CAP))),
            Arc::new(DiskTier::new(dir)),
        )
    }

    /// Walk L1 → L2 → L3, backfilling upward on the way out.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.l1.get(key).await {
            return Some(value);
        }

        if let Some(value) = self.l2.get(key).await {
            debug!(key, tier = self.l2.name(), "cache hit, backfilling l1");
            self.l1
                .set(key, value.clone(), self.l1_backfill_ttl)
                .await;
            return Some(value);
        }

        if let Some(value) = self.l3.get(key).await {
            debug!(key, tier = self.l3.name(), "cache hit, backfilling l2 and l1");
            self.l2
                .set(key, value.clone(), self.l2_backfill_ttl)
                .await;
            self.l1
                .set(key, value.clone(), self.l1_backfill_ttl)
                .await;
            return Some(value);
        }

        None
    }

    /// Write through to every tier with the caller's TTL (each tier may
    /// cap it). Awaited as one unit.
    pub async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.l1.set(key, value.clone(), ttl).await;
        self.l2.set(key, value.clone(), ttl).await;
        self.l3.set(key, value, ttl).await;
    }

    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn set_value<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Ok(raw) = serde_json::to_string(value) {
            self.set(key, raw, ttl).await;
        }
    }

    pub async fn clear(&self) {
        self.l1.clear().await;
        self.l2.clear().await;
        self.l3.clear().await;
    }

    /// Per-tier entry counts, fastest tier first.
    pub async fn entry_counts(&self) -> Vec<(&'static str, usize)> {
        vec![
            (self.l1.name(), self.l1.entry_count().await),
            (self.l2.name(), self.l2.entry_count().await),
            (self.l3.name(), self.l3.entry_count().await),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_stack() -> TieredCache {
        TieredCache::new(
            Arc::new(MemoryTier::new("l1", Some(L1_TTL_CAP))),
            Arc::new(MemoryTier::new("l2", Some(L2_TTL_CAP))),
            Arc::new(MemoryTier::new("l3", None)),
        )
    }

    #[tokio::test]
    async fn write_through_reaches_every_tier() {
        let cache = memory_stack();
        cache
            .set("k", String::from("v"), Duration::from_secs(60))
            .await;

        let counts = cache.entry_counts().await;
        assert_eq!(counts.iter().map(|(_, count)| *count).sum::<usize>(), 3);
    }

    #[tokio::test]
    async fn l3_hit_backfills_both_upper_tiers() {
        let cache = memory_stack();
        cache.l3.set("k", String::from("v"), Duration::from_secs(60)).await;

        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.l1.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.l2.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let cache = memory_stack();
        cache
            .set_value("k", &vec![1_u32, 2, 3], Duration::from_secs(60))
            .await;
        let value: Vec<u32> = cache.get_value("k").await.expect("deserializes");
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn miss_everywhere_returns_none() {
        let cache = memory_stack();
        assert!(cache.get("absent").await.is_none());
    }
}
