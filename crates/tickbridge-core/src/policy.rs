use std::time::Duration;

use crate::ProviderKey;

/// Per-provider resource limits and retry pacing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub key: ProviderKey,
    /// Number of rotating session handles in the pool.
    pub sessions: usize,
    /// Minimum spacing between any two requests issued by the pool.
    pub rate_limit_per_sec: f64,
    /// Secondary quota budget (requests per window).
    pub quota_window: Duration,
    pub quota_limit: u32,
    /// Per-call timeout applied to every outbound request.
    pub timeout_ms: u64,
    /// Base unit for the `2^attempt + jitter` backoff ladder.
    pub backoff_base: Duration,
    /// Fixed delay between generic (network/malformed-body) retries.
    pub transient_delay: Duration,
    /// Providers with tiny request budgets; the fetcher skips these during
    /// fan-out when a live-auth source is available.
    pub rate_fragile: bool,
}

impl ProviderPolicy {
    pub fn kite_default() -> Self {
        Self {
            key: ProviderKey::Kite,
            sessions: 3,
            rate_limit_per_sec: 3.0,
            quota_window: Duration::from_secs(60),
            quota_limit: 180,
            timeout_ms: 6_000,
            backoff_base: Duration::from_secs(1),
            transient_delay: Duration::from_secs(1),
            rate_fragile: false,
        }
    }

    pub fn nse_default() -> Self {
        Self {
            key: ProviderKey::Nse,
            sessions: 3,
            rate_limit_per_sec: 1.5,
            quota_window: Duration::from_secs(60),
            quota_limit: 60,
            timeout_ms: 10_000,
            backoff_base: Duration::from_secs(1),
            transient_delay: Duration::from_secs(1),
            rate_fragile: false,
        }
    }

    pub fn yahoo_default() -> Self {
        Self {
            key: ProviderKey::Yahoo,
            sessions: 3,
            rate_limit_per_sec: 2.0,
            quota_window: Duration::from_secs(60),
            quota_limit: 100,
            timeout_ms: 10_000,
            backoff_base: Duration::from_secs(1),
            transient_delay: Duration::from_secs(1),
            rate_fragile: false,
        }
    }

    /// Alpha Vantage free tier allows 5 requests per minute.
    pub fn alphavantage_default() -> Self {
        Self {
            key: ProviderKey::AlphaVantage,
            sessions: 1,
            rate_limit_per_sec: 0.2,
            quota_window: Duration::from_secs(60),
            quota_limit: 5,
            timeout_ms: 12_000,
            backoff_base: Duration::from_secs(1),
            transient_delay: Duration::from_secs(1),
            rate_fragile: true,
        }
    }

    pub fn coingecko_default() -> Self {
        Self {
            key: ProviderKey::Coingecko,
            sessions: 2,
            rate_limit_per_sec: 0.5,
            quota_window: Duration::from_secs(60),
            quota_limit: 30,
            timeout_ms: 10_000,
            backoff_base: Duration::from_secs(1),
            transient_delay: Duration::from_secs(1),
            rate_fragile: false,
        }
    }

    pub fn mock_default() -> Self {
        Self {
            key: ProviderKey::Mock,
            sessions: 1,
            rate_limit_per_sec: 1_000.0,
            quota_window: Duration::from_secs(1),
            quota_limit: 1_000,
            timeout_ms: 1_000,
            backoff_base: Duration::from_millis(1),
            transient_delay: Duration::from_millis(1),
            rate_fragile: false,
        }
    }

    pub fn default_for(key: ProviderKey) -> Self {
        match key {
            ProviderKey::Kite => Self::kite_default(),
            ProviderKey::Nse => Self::nse_default(),
            ProviderKey::Yahoo => Self::yahoo_default(),
            ProviderKey::AlphaVantage => Self::alphavantage_default(),
            ProviderKey::Coingecko => Self::coingecko_default(),
            ProviderKey::Mock => Self::mock_default(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_limit_per_sec.max(f64::MIN_POSITIVE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphavantage_policy_matches_free_tier() {
        let policy = ProviderPolicy::alphavantage_default();

        assert_eq!(policy.sessions, 1);
        assert_eq!(policy.quota_window, Duration::from_secs(60));
        assert_eq!(policy.quota_limit, 5);
        assert!(policy.rate_fragile);
    }

    #[test]
    fn min_interval_follows_rate_limit() {
        let policy = ProviderPolicy::yahoo_default();
        assert_eq!(policy.min_interval(), Duration::from_millis(500));
    }

    #[test]
    fn every_key_has_a_default_policy() {
        for key in ProviderKey::ALL {
            assert_eq!(ProviderPolicy::default_for(key).key, key);
        }
    }
}
