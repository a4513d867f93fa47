use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{CacheTier, TierFuture};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process map tier used for L1 and, in single-process deployments, as
/// the stand-in L2.
///
/// An optional TTL cap keeps fast tiers short-lived no matter what TTL a
/// write-through requests.
pub struct MemoryTier {
    name: &'static str,
    ttl_cap: Option<Duration>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryTier {
    pub fn new(name: &'static str, ttl_cap: Option<Duration>) -> Self {
        Self {
            name,
            ttl_cap,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn effective_ttl(&self, ttl: Duration) -> Duration {
        match self.ttl_cap {
            Some(cap) => ttl.min(cap),
            None => ttl,
        }
    }
}

impl CacheTier for MemoryTier {
    fn name(&self) -> &'static str {
        self.name
    }

    fn get<'a>(&'a self, key: &'a str) -> TierFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut entries = self
                .entries
                .lock()
                .expect("memory tier lock is not poisoned");

            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
                Some(_) => {
                    // Stale entry found on read is removed on that read.
                    entries.remove(key);
                    None
                }
                None => None,
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> TierFuture<'a, ()> {
        Box::pin(async move {
            let expires_at = Instant::now() + self.effective_ttl(ttl);
            self.entries
                .lock()
                .expect("memory tier lock is not poisoned")
                .insert(key.to_owned(), Entry { value, expires_at });
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> TierFuture<'a, ()> {
        Box::pin(async move {
            self.entries
                .lock()
                .expect("memory tier lock is not poisoned")
                .remove(key);
        })
    }

    fn entry_count<'a>(&'a self) -> TierFuture<'a, usize> {
        Box::pin(async move {
            self.entries
                .lock()
                .expect("memory tier lock is not poisoned")
                .len()
        })
    }

    fn clear<'a>(&'a self) -> TierFuture<'a, ()> {
        Box::pin(async move {
            self.entries
                .lock()
                .expect("memory tier lock is not poisoned")
                .clear();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_within_ttl() {
        let tier = MemoryTier::new("l1", None);
        tier.set("k", String::from("v"), Duration::from_secs(60)).await;
        assert_eq!(tier.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn expired_entry_is_removed_by_the_read_that_finds_it() {
        let tier = MemoryTier::new("l1", None);
        tier.set("k", String::from("v"), Duration::from_millis(20)).await;
        assert_eq!(tier.entry_count().await, 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(tier.get("k").await.is_none());
        assert_eq!(tier.entry_count().await, 0);
    }

    #[tokio::test]
    async fn ttl_cap_overrides_longer_requests() {
        let tier = MemoryTier::new("l1", Some(Duration::from_millis(20)));
        tier.set("k", String::from("v"), Duration::from_secs(3_600)).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(tier.get("k").await.is_none());
    }
}
