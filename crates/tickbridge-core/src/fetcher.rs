//! Unified per-operation fetcher over the adapter registry and the
//! tiered cache.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use time::Date;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::{cache_key, TieredCache};
use crate::config::{normalize_exchange, FetcherConfig};
use crate::policy::ProviderPolicy;
use crate::provider::{MarketSource, ProviderKey};
use crate::registry::AdapterRegistry;
use crate::{Fundamentals, Instrument, Interval, OhlcvBar, Quote, Snapshot, Symbol};

/// Fetchable operation; doubles as the cache namespace segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Quote,
    History,
    Fundamentals,
    Search,
    Snapshot,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::History => "history",
            Self::Fundamentals => "fundamentals",
            Self::Search => "search",
            Self::Snapshot => "snapshot",
        }
    }

    /// Strict provider preference per operation. The resolved exchange
    /// chain is reordered by this list before the walk; chain members the
    /// list does not mention keep their chain order, after the ranked
    /// ones.
    const fn priority(self) -> &'static [ProviderKey] {
        match self {
            Self::Quote | Self::Snapshot => &[
                ProviderKey::Kite,
                ProviderKey::Nse,
                ProviderKey::Yahoo,
                ProviderKey::AlphaVantage,
                ProviderKey::Coingecko,
            ],
            Self::History => &[
                ProviderKey::Kite,
                ProviderKey::Yahoo,
                ProviderKey::AlphaVantage,
                ProviderKey::Coingecko,
                ProviderKey::Nse,
            ],
            Self::Fundamentals => &[
                ProviderKey::Yahoo,
                ProviderKey::AlphaVantage,
                ProviderKey::Nse,
                ProviderKey::Coingecko,
            ],
            Self::Search => &[
                ProviderKey::Yahoo,
                ProviderKey::Nse,
                ProviderKey::Coingecko,
                ProviderKey::AlphaVantage,
            ],
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single uniform entry point for the rest of the application.
///
/// Sequential operations walk the planned chain and stop at the first
/// non-empty result; an exhausted chain is `None`/empty, never an error.
/// Cloning is cheap (shared registry and cache) and is how batch fan-out
/// tasks carry the fetcher across spawn boundaries.
#[derive(Clone)]
pub struct UnifiedFetcher {
    registry: Arc<AdapterRegistry>,
    cache: Arc<TieredCache>,
    config: FetcherConfig,
}

impl UnifiedFetcher {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        cache: Arc<TieredCache>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Exchange chain ordered for an operation, with the live-auth
    /// suppression policy applied.
    async fn plan(&self, operation: Operation, exchange: &str) -> Vec<Arc<dyn MarketSource>> {
        let mut chain = self.registry.resolve_chain(exchange).await;

        let priority = operation.priority();
        chain.sort_by_key(|source| {
            priority
                .iter()
                .position(|key| *key == source.key())
                .unwrap_or(usize::MAX)
        });

        if self.config.suppress_fragile_when_live
            && chain.iter().any(|source| source.supports_streaming())
        {
            chain.retain(|source| {
                let fragile = ProviderPolicy::default_for(source.key()).rate_fragile;
                if fragile {
                    debug!(
                        operation = %operation,
                        provider = %source.key(),
                        "live-auth source available, suppressing rate-fragile provider"
                    );
                }
                !fragile
            });
        }

        chain
    }

    pub async fn quote(&self, symbol: &Symbol, exchange: &str) -> Option<Quote> {
        let key = self.key_for(Operation::Quote, symbol.as_str(), exchange, &[]);
        if let Some(hit) = self.cache.get_value::<Quote>(&key).await {
            return Some(hit);
        }

        for source in self.plan(Operation::Quote, exchange).await {
            match source.quote(symbol.clone()).await {
                Ok(Some(quote)) => {
                    self.cache
                        .set_value(&key, &quote, self.config.quote_ttl)
                        .await;
                    return Some(quote);
                }
                Ok(None) => {
                    debug!(provider = %source.key(), symbol = %symbol, "no quote, trying next");
                }
                Err(error) => {
                    warn!(provider = %source.key(), symbol = %symbol, "quote failed: {error}");
                }
            }
        }

        debug!(symbol = %symbol, exchange, "quote chain exhausted");
        None
    }

    pub async fn history(
        &self,
        symbol: &Symbol,
        exchange: &str,
        interval: Interval,
        start: Date,
        end: Date,
    ) -> Vec<OhlcvBar> {
        let key = self.key_for(
            Operation::History,
            symbol.as_str(),
            exchange,
            &[
                ("interval", interval.as_str().to_owned()),
                ("start", start.to_string()),
                ("end", end.to_string()),
            ],
        );
        if let Some(hit) = self.cache.get_value::<Vec<OhlcvBar>>(&key).await {
            return hit;
        }

        for source in self.plan(Operation::History, exchange).await {
            match source.history(symbol.clone(), interval, start, end).await {
                Ok(bars) if !bars.is_empty() => {
                    self.cache
                        .set_value(&key, &bars, self.config.history_ttl)
                        .await;
                    return bars;
                }
                Ok(_) => {
                    debug!(provider = %source.key(), symbol = %symbol, "no bars, trying next");
                }
                Err(error) => {
                    warn!(provider = %source.key(), symbol = %symbol, "history failed: {error}");
                }
            }
        }

        Vec::new()
    }

    pub async fn fundamentals(&self, symbol: &Symbol, exchange: &str) -> Fundamentals {
        let key = self.key_for(Operation::Fundamentals, symbol.as_str(), exchange, &[]);
        if let Some(hit) = self.cache.get_value::<Fundamentals>(&key).await {
            return hit;
        }

        for source in self.plan(Operation::Fundamentals, exchange).await {
            match source.fundamentals(symbol.clone()).await {
                Ok(map) if !map.is_empty() => {
                    self.cache
                        .set_value(&key, &map, self.config.fundamentals_ttl)
                        .await;
                    return map;
                }
                Ok(_) => {
                    debug!(provider = %source.key(), symbol = %symbol, "no fundamentals, trying next");
                }
                Err(error) => {
                    warn!(provider = %source.key(), symbol = %symbol, "fundamentals failed: {error}");
                }
            }
        }

        Fundamentals::new()
    }

    pub async fn search(&self, query: &str, exchange: &str) -> Vec<Instrument> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let key = self.key_for(Operation::Search, trimmed, exchange, &[]);
        if let Some(hit) = self.cache.get_value::<Vec<Instrument>>(&key).await {
            return hit;
        }

        for source in self.plan(Operation::Search, exchange).await {
            match source.search(trimmed.to_owned()).await {
                Ok(results) if !results.is_empty() => {
                    self.cache
                        .set_value(&key, &results, self.config.search_ttl)
                        .await;
                    return results;
                }
                Ok(_) => {
                    debug!(provider = %source.key(), query = trimmed, "no results, trying next");
                }
                Err(error) => {
                    warn!(provider = %source.key(), query = trimmed, "search failed: {error}");
                }
            }
        }

        Vec::new()
    }

    /// Fan out to every planned provider concurrently and merge their
    /// partial contributions into one record. Failed calls contribute
    /// nothing; they never fail the snapshot. The merge runs in plan
    /// order, so a fixed set of contributions always merges identically.
    pub async fn snapshot(&self, symbol: &Symbol, exchange: &str) -> Snapshot {
        let key = self.key_for(Operation::Snapshot, symbol.as_str(), exchange, &[]);
        if let Some(hit) = self.cache.get_value::<Snapshot>(&key).await {
            return hit;
        }

        let plan = self.plan(Operation::Snapshot, exchange).await;
        let order = plan.iter().map(|source| source.key()).collect::<Vec<_>>();

        let mut tasks = JoinSet::new();
        for source in plan {
            let sym = symbol.clone();
            tasks.spawn(async move {
                let provider = source.key();
                let quote = match source.quote(sym.clone()).await {
                    Ok(quote) => quote,
                    Err(error) => {
                        warn!(provider = %provider, "snapshot quote failed: {error}");
                        None
                    }
                };
                let extra = match source.fundamentals(sym).await {
                    Ok(extra) => extra,
                    Err(error) => {
                        warn!(provider = %provider, "snapshot fundamentals failed: {error}");
                        Fundamentals::new()
                    }
                };
                (provider, quote, extra)
            });
        }

        let mut contributions = Vec::with_capacity(order.len());
        while let Some(joined) = tasks.join_next().await {
            if let Ok(contribution) = joined {
                contributions.push(contribution);
            }
        }
        contributions.sort_by_key(|(provider, _, _)| {
            order.iter().position(|key| key == provider).unwrap_or(usize::MAX)
        });

        let mut snapshot = Snapshot::default();
        for (provider, quote, extra) in &contributions {
            snapshot.absorb(*provider, quote.as_ref(), extra);
        }

        if !snapshot.is_empty() {
            self.cache
                .set_value(&key, &snapshot, self.config.snapshot_ttl)
                .await;
        }
        snapshot
    }

    /// Batch quotes over a symbol universe under a bounded permit pool.
    /// Results come back in input order; all in-flight calls are awaited
    /// before the merge.
    pub async fn quotes(
        &self,
        symbols: &[Symbol],
        exchange: &str,
    ) -> Vec<(Symbol, Option<Quote>)> {
        let permits = Arc::new(Semaphore::new(self.config.batch_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, symbol) in symbols.iter().cloned().enumerate() {
            let fetcher = self.clone();
            let permits = Arc::clone(&permits);
            let exchange = exchange.to_owned();
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .expect("permit pool is never closed");
                let quote = fetcher.quote(&symbol, &exchange).await;
                (index, symbol, quote)
            });
        }

        let mut collected = Vec::with_capacity(symbols.len());
        while let Some(joined) = tasks.join_next().await {
            if let Ok(result) = joined {
                collected.push(result);
            }
        }
        collected.sort_by_key(|(index, _, _)| *index);
        collected
            .into_iter()
            .map(|(_, symbol, quote)| (symbol, quote))
            .collect()
    }

    fn key_for(
        &self,
        operation: Operation,
        subject: &str,
        exchange: &str,
        extra: &[(&str, String)],
    ) -> String {
        let mut params = BTreeMap::new();
        params.insert(
            String::from("exchange"),
            normalize_exchange(exchange),
        );
        for (name, value) in extra {
            params.insert((*name).to_owned(), value.clone());
        }
        cache_key(operation.as_str(), subject, &params)
    }
}
