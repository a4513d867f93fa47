//! Adapter registry and per-exchange chain resolution.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::adapters::{
    AlphaVantageAdapter, CoingeckoAdapter, KiteAdapter, MockAdapter, NseAdapter, YahooAdapter,
};
use crate::config::RegistryConfig;
use crate::provider::{MarketSource, ProviderKey};
use crate::transport::HttpClient;
use crate::ProviderError;

/// Shared material adapter factories construct from.
pub struct RegistryContext {
    pub transport: Arc<dyn HttpClient>,
}

pub type SourceFactory =
    dyn Fn(ProviderKey, &RegistryContext) -> Result<Arc<dyn MarketSource>, ProviderError>
        + Send
        + Sync;

/// Configuration-driven mapping from exchange codes to ordered adapter
/// chains.
///
/// Adapter instances are constructed lazily on first reference and cached
/// for the process lifetime: one instance per provider key, shared by
/// every chain that names it. A provider whose factory fails is skipped
/// (and retried on a later resolve), so resolved chains can come back
/// shorter than configured, or empty.
pub struct AdapterRegistry {
    config: RegistryConfig,
    context: RegistryContext,
    factory: Box<SourceFactory>,
    instances: tokio::sync::Mutex<HashMap<ProviderKey, Arc<dyn MarketSource>>>,
}

impl AdapterRegistry {
    pub fn new(config: RegistryConfig, transport: Arc<dyn HttpClient>) -> Self {
        Self::with_factory(config, transport, Box::new(default_factory))
    }

    /// Registry with a custom adapter factory; tests use this to stand in
    /// failing or scripted providers.
    pub fn with_factory(
        config: RegistryConfig,
        transport: Arc<dyn HttpClient>,
        factory: Box<SourceFactory>,
    ) -> Self {
        Self {
            config,
            context: RegistryContext { transport },
            factory,
            instances: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Ordered adapter chain for an exchange code (primary first).
    ///
    /// Unknown provider names and failed constructions are skipped, never
    /// raised; callers must handle an empty chain.
    pub async fn resolve_chain(&self, exchange: &str) -> Vec<Arc<dyn MarketSource>> {
        let spec = self.config.chain_for(exchange);

        let mut keys = Vec::with_capacity(1 + spec.fallback.len());
        for name in std::iter::once(&spec.primary).chain(spec.fallback.iter()) {
            match ProviderKey::from_str(name) {
                Ok(key) => {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                Err(_) => {
                    warn!(exchange, provider = %name, "unknown provider in chain, skipping");
                }
            }
        }

        let mut chain = Vec::with_capacity(keys.len());
        for key in keys {
            match self.instance(key).await {
                Ok(adapter) => chain.push(adapter),
                Err(error) => {
                    warn!(exchange, provider = %key, "adapter unavailable, skipping: {error}");
                }
            }
        }

        debug!(
            exchange,
            chain = ?chain.iter().map(|a| a.key()).collect::<Vec<_>>(),
            "resolved adapter chain"
        );
        chain
    }

    /// The process-lifetime adapter instance for a provider key,
    /// constructing it on first reference.
    ///
    /// The instance map's mutex also serializes construction, so two
    /// concurrent first references cannot build duplicate instances.
    pub async fn instance(
        &self,
        key: ProviderKey,
    ) -> Result<Arc<dyn MarketSource>, ProviderError> {
        let mut instances = self.instances.lock().await;
        if let Some(existing) = instances.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let built = (self.factory)(key, &self.context)?;
        instances.insert(key, Arc::clone(&built));
        Ok(built)
    }

    /// Provider keys with a constructed instance.
    pub async fn constructed_keys(&self) -> Vec<ProviderKey> {
        let instances = self.instances.lock().await;
        let mut keys = instances.keys().copied().collect::<Vec<_>>();
        keys.sort_by_key(|key| key.as_str());
        keys
    }
}

fn default_factory(
    key: ProviderKey,
    context: &RegistryContext,
) -> Result<Arc<dyn MarketSource>, ProviderError> {
    let transport = Arc::clone(&context.transport);
    Ok(match key {
        ProviderKey::Kite => Arc::new(KiteAdapter::from_env(transport)?),
        ProviderKey::Nse => Arc::new(NseAdapter::new(transport)),
        ProviderKey::Yahoo => Arc::new(YahooAdapter::new(transport)),
        ProviderKey::AlphaVantage => Arc::new(AlphaVantageAdapter::from_env(transport)),
        ProviderKey::Coingecko => Arc::new(CoingeckoAdapter::new(transport)),
        ProviderKey::Mock => Arc::new(MockAdapter::default()),
    })
}

#[cfg(test)]
mod tests {
    use crate::config::ChainSpec;
    use crate::transport::NoopHttpClient;

    use super::*;

    fn mock_only_factory(
        key: ProviderKey,
        _context: &RegistryContext,
    ) -> Result<Arc<dyn MarketSource>, ProviderError> {
        match key {
            ProviderKey::Mock => Ok(Arc::new(MockAdapter::default())),
            other => Err(ProviderError::construction(format!(
                "{other} is not available in this test"
            ))),
        }
    }

    fn config_with(primary: &str, fallback: &[&str]) -> RegistryConfig {
        RegistryConfig {
            default: ChainSpec::new(primary, fallback),
            exchanges: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn instances_are_constructed_once_and_shared() {
        let registry = AdapterRegistry::with_factory(
            config_with("mock", &[]),
            Arc::new(NoopHttpClient),
            Box::new(mock_only_factory),
        );

        let first = registry.instance(ProviderKey::Mock).await.expect("built");
        let second = registry.instance(ProviderKey::Mock).await.expect("cached");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.constructed_keys().await, vec![ProviderKey::Mock]);
    }

    #[tokio::test]
    async fn duplicate_keys_in_chain_are_deduped() {
        let registry = AdapterRegistry::with_factory(
            config_with("mock", &["mock", "mock"]),
            Arc::new(NoopHttpClient),
            Box::new(mock_only_factory),
        );

        let chain = registry.resolve_chain("ANY").await;
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn failed_factory_yields_shorter_chain() {
        let registry = AdapterRegistry::with_factory(
            config_with("kite", &["mock"]),
            Arc::new(NoopHttpClient),
            Box::new(mock_only_factory),
        );

        let chain = registry.resolve_chain("NSE").await;
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].key(), ProviderKey::Mock);
    }

    #[tokio::test]
    async fn fully_unresolvable_chain_is_empty_not_an_error() {
        let registry = AdapterRegistry::with_factory(
            config_with("kite", &["yahoo"]),
            Arc::new(NoopHttpClient),
            Box::new(mock_only_factory),
        );

        let chain = registry.resolve_chain("NSE").await;
        assert!(chain.is_empty());
    }
}
