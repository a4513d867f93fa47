mod cache;
mod fundamentals;
mod history;
mod quote;
mod search;
mod snapshot;
mod sources;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use tickbridge_core::{
    AdapterRegistry, ChainSpec, FetcherConfig, HttpClient, NoopHttpClient, RegistryConfig,
    ReqwestHttpClient, TieredCache, UnifiedFetcher,
};

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    let fetcher = build_fetcher(cli);

    match &cli.command {
        Command::Quote(args) => quote::run(args, &fetcher, &cli.exchange).await,
        Command::History(args) => history::run(args, &fetcher, &cli.exchange).await,
        Command::Search(args) => search::run(args, &fetcher, &cli.exchange).await,
        Command::Fundamentals(args) => fundamentals::run(args, &fetcher, &cli.exchange).await,
        Command::Snapshot(args) => snapshot::run(args, &fetcher, &cli.exchange).await,
        Command::Sources => sources::run(&fetcher).await,
        Command::Cache(args) => cache::run(args, &fetcher).await,
    }
}

fn build_fetcher(cli: &Cli) -> Arc<UnifiedFetcher> {
    let transport: Arc<dyn HttpClient> = if cli.offline {
        Arc::new(NoopHttpClient)
    } else {
        Arc::new(ReqwestHttpClient::new())
    };

    let config = if cli.offline {
        offline_config()
    } else {
        RegistryConfig::load()
    };

    let registry = Arc::new(AdapterRegistry::new(config, transport));
    let cache = Arc::new(TieredCache::standard(cache_dir()));

    Arc::new(UnifiedFetcher::new(
        registry,
        cache,
        FetcherConfig::default(),
    ))
}

/// Every chain collapses to the deterministic mock provider.
fn offline_config() -> RegistryConfig {
    RegistryConfig {
        default: ChainSpec::new("mock", &[]),
        exchanges: HashMap::new(),
    }
}

fn cache_dir() -> PathBuf {
    std::env::var("TICKBRIDGE_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("tickbridge-cache"))
}
