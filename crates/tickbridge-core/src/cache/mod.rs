//! Multi-tier response cache.
//!
//! Three ordered tiers sit in front of the unified fetcher: L1 (process
//! memory, shortest-lived), L2 (the slot where a store shared between
//! processes plugs in) and L3 (durable on disk, survives restart). Reads
//! walk down and backfill up; writes go through to every tier. Expiry is
//! purely TTL-driven and read-triggered; there is no background sweep.

mod disk;
mod memory;
mod tiered;

pub use disk::DiskTier;
pub use memory::MemoryTier;
pub use tiered::TieredCache;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const NAMESPACE: &str = "tickbridge";

pub type TierFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One cache layer. Payloads are opaque serialized strings; entry
/// ownership stays with the tier, and a stale entry found by `get` is
/// removed on that same read.
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &'static str;

    fn get<'a>(&'a self, key: &'a str) -> TierFuture<'a, Option<String>>;

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> TierFuture<'a, ()>;

    fn remove<'a>(&'a self, key: &'a str) -> TierFuture<'a, ()>;

    fn entry_count<'a>(&'a self) -> TierFuture<'a, usize>;

    fn clear<'a>(&'a self) -> TierFuture<'a, ()>;
}

/// Deterministic cache key:
/// `tickbridge:<data_type>:<UPPER_SYMBOL>:<md5 of the sorted params JSON>`.
///
/// Params go through a `BTreeMap`, so the serialized form is sorted by
/// construction and two call sites with the same parameters in different
/// order produce the same key.
pub fn cache_key(data_type: &str, symbol: &str, params: &BTreeMap<String, String>) -> String {
    let sorted = serde_json::to_string(params).unwrap_or_default();
    let digest = md5::compute(sorted.as_bytes());
    format!(
        "{NAMESPACE}:{data_type}:{}:{digest:x}",
        symbol.trim().to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn key_uppercases_symbol() {
        let key = cache_key("quote", "infy", &params(&[("exchange", "NSE")]));
        assert!(key.starts_with("tickbridge:quote:INFY:"));
    }

    #[test]
    fn key_is_insensitive_to_param_insertion_order() {
        let a = cache_key("history", "TCS", &params(&[("from", "x"), ("to", "y")]));
        let b = cache_key("history", "TCS", &params(&[("to", "y"), ("from", "x")]));
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_across_params() {
        let a = cache_key("quote", "TCS", &params(&[("exchange", "NSE")]));
        let b = cache_key("quote", "TCS", &params(&[("exchange", "BSE")]));
        assert_ne!(a, b);
    }
}
