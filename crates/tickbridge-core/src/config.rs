use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Environment variable naming a registry config file.
pub const REGISTRY_CONFIG_ENV: &str = "TICKBRIDGE_REGISTRY";

/// One exchange's provider chain as configured. Provider names stay raw
/// strings here: unknown names must degrade to a shorter resolved chain,
/// never to a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    pub primary: String,
    #[serde(default)]
    pub fallback: Vec<String>,
}

impl ChainSpec {
    pub fn new(primary: impl Into<String>, fallback: &[&str]) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

/// Exchange → chain mapping plus the default chain for unmapped exchanges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub default: ChainSpec,
    #[serde(default)]
    pub exchanges: HashMap<String, ChainSpec>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read registry config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse registry config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl RegistryConfig {
    /// Hard-coded chains used when no config file is supplied.
    pub fn builtin() -> Self {
        let mut exchanges = HashMap::new();
        exchanges.insert(
            String::from("NSE"),
            ChainSpec::new("kite", &["nse", "yahoo"]),
        );
        exchanges.insert(String::from("BSE"), ChainSpec::new("kite", &["yahoo"]));
        exchanges.insert(
            String::from("NASDAQ"),
            ChainSpec::new("yahoo", &["alphavantage"]),
        );
        exchanges.insert(
            String::from("NYSE"),
            ChainSpec::new("yahoo", &["alphavantage"]),
        );
        exchanges.insert(String::from("CRYPTO"), ChainSpec::new("coingecko", &[]));

        Self {
            default: ChainSpec::new("yahoo", &["alphavantage"]),
            exchanges,
        }
        .normalized()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config.normalized())
    }

    /// Resolve from `TICKBRIDGE_REGISTRY` when set; otherwise (or when the
    /// file is unreadable) fall back to the built-in chains.
    pub fn load() -> Self {
        match std::env::var(REGISTRY_CONFIG_ENV) {
            Ok(path) => match Self::from_file(&path) {
                Ok(config) => config,
                Err(error) => {
                    warn!(path, "registry config unusable, using built-in chains: {error}");
                    Self::builtin()
                }
            },
            Err(_) => Self::builtin(),
        }
    }

    /// Chain for an exchange code; codes are trimmed and uppercased before
    /// lookup, so `" nse "` and `"NSE"` resolve identically.
    pub fn chain_for(&self, exchange: &str) -> &ChainSpec {
        let code = normalize_exchange(exchange);
        self.exchanges.get(&code).unwrap_or(&self.default)
    }

    fn normalized(mut self) -> Self {
        self.exchanges = self
            .exchanges
            .into_iter()
            .map(|(code, spec)| (normalize_exchange(&code), spec))
            .collect();
        self
    }
}

pub(crate) fn normalize_exchange(exchange: &str) -> String {
    exchange.trim().to_ascii_uppercase()
}

/// Fetcher-level tunables: fan-out width, cache TTLs and the live-auth
/// suppression policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherConfig {
    /// Permit pool size for batch operations over a symbol universe.
    pub batch_concurrency: usize,
    /// Skip rate-fragile providers during fan-out while a live-auth source
    /// is available. Cost-control policy, not an invariant.
    pub suppress_fragile_when_live: bool,
    pub quote_ttl: Duration,
    pub history_ttl: Duration,
    pub fundamentals_ttl: Duration,
    pub search_ttl: Duration,
    pub snapshot_ttl: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 8,
            suppress_fragile_when_live: true,
            quote_ttl: Duration::from_secs(15),
            history_ttl: Duration::from_secs(3_600),
            fundamentals_ttl: Duration::from_secs(6 * 3_600),
            search_ttl: Duration::from_secs(3_600),
            snapshot_ttl: Duration::from_secs(60),
        }
    }
}
