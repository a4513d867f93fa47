//! Unified fetcher: priority walks, snapshot fan-out, batch bounds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use tickbridge_core::{
    AdapterRegistry, ChainSpec, FetcherConfig, MarketSource, MemoryTier, NoopHttpClient,
    ProviderError, ProviderKey, RangeBucket, RegistryConfig, Symbol, TieredCache, UnifiedFetcher,
};

use tickbridge_tests::StubSource;

fn fetcher_over(
    chain: &[&str],
    stubs: Vec<Arc<StubSource>>,
    config: FetcherConfig,
) -> Arc<UnifiedFetcher> {
    let stub_map: HashMap<ProviderKey, Arc<StubSource>> =
        stubs.into_iter().map(|stub| (stub.key(), stub)).collect();

    let registry_config = RegistryConfig {
        default: ChainSpec::new(chain[0], &chain[1..]),
        exchanges: HashMap::new(),
    };

    let registry = AdapterRegistry::with_factory(
        registry_config,
        Arc::new(NoopHttpClient),
        Box::new(move |key, _context| {
            stub_map
                .get(&key)
                .map(|stub| Arc::clone(stub) as Arc<dyn MarketSource>)
                .ok_or_else(|| ProviderError::construction("no stub registered"))
        }),
    );

    let cache = Arc::new(TieredCache::new(
        Arc::new(MemoryTier::new("l1", None)),
        Arc::new(MemoryTier::new("l2", None)),
        Arc::new(MemoryTier::new("l3", None)),
    ));

    Arc::new(UnifiedFetcher::new(Arc::new(registry), cache, config))
}

fn symbol(raw: &str) -> Symbol {
    Symbol::parse(raw).expect("valid symbol")
}

#[test]
fn history_range_coarsening_is_deterministic() {
    let long_spans = [400, 300, 225].map(RangeBucket::for_span_days);
    assert!(long_spans.iter().all(|bucket| *bucket == long_spans[0]));

    assert_ne!(
        RangeBucket::for_span_days(44),
        RangeBucket::for_span_days(46)
    );
}

#[tokio::test]
async fn snapshot_merges_partial_contributions_despite_failures() {
    let kite = Arc::new(StubSource::new(ProviderKey::Kite).with_quote("INFY", 1500.0));
    let nse = Arc::new(StubSource::new(ProviderKey::Nse).failing());
    let yahoo = Arc::new(
        StubSource::new(ProviderKey::Yahoo)
            .with_fundamental("sector", json!("Information Technology"))
            .with_fundamental("pe_ratio", json!(24.5)),
    );
    let alphavantage = Arc::new(
        StubSource::new(ProviderKey::AlphaVantage)
            .with_fundamental("profit_margin", json!(0.21)),
    );
    let coingecko = Arc::new(StubSource::new(ProviderKey::Coingecko).failing());

    let fetcher = fetcher_over(
        &["kite", "nse", "yahoo", "alphavantage", "coingecko"],
        vec![kite, nse, yahoo, alphavantage, coingecko],
        FetcherConfig {
            suppress_fragile_when_live: false,
            ..FetcherConfig::default()
        },
    );

    let snapshot = fetcher.snapshot(&symbol("INFY"), "NSE").await;

    // Two of five providers failed; the other three still contribute.
    assert_eq!(snapshot.price, Some(1500.0));
    assert_eq!(snapshot.sector.as_deref(), Some("Information Technology"));
    assert_eq!(snapshot.pe_ratio, Some(24.5));
    assert_eq!(snapshot.profit_margin, Some(0.21));
    assert_eq!(
        snapshot.sources,
        vec![
            ProviderKey::Kite,
            ProviderKey::Yahoo,
            ProviderKey::AlphaVantage
        ]
    );
}

#[tokio::test]
async fn snapshot_of_unknown_symbol_is_empty_not_an_error() {
    let fetcher = fetcher_over(
        &["nse"],
        vec![Arc::new(StubSource::new(ProviderKey::Nse))],
        FetcherConfig::default(),
    );

    let snapshot = fetcher.snapshot(&symbol("NOPE"), "NSE").await;
    assert!(snapshot.is_empty());
}

#[tokio::test]
async fn sequential_quote_follows_priority_and_stops_early() {
    let kite = Arc::new(StubSource::new(ProviderKey::Kite).with_quote("INFY", 1500.0));
    let yahoo = Arc::new(StubSource::new(ProviderKey::Yahoo).with_quote("INFY", 9_999.0));

    // Chain lists yahoo first, but the quote priority matrix ranks the
    // brokerage above vendors.
    let fetcher = fetcher_over(
        &["yahoo", "kite"],
        vec![Arc::clone(&kite), Arc::clone(&yahoo)],
        FetcherConfig::default(),
    );

    let quote = fetcher.quote(&symbol("INFY"), "NSE").await.expect("quote");
    assert_eq!(quote.price, 1500.0);
    assert_eq!(yahoo.call_count(), 0);
}

#[tokio::test]
async fn live_auth_presence_suppresses_fragile_providers() {
    let kite = Arc::new(
        StubSource::new(ProviderKey::Kite)
            .with_quote("INFY", 1500.0)
            .streaming(),
    );
    let alphavantage = Arc::new(
        StubSource::new(ProviderKey::AlphaVantage)
            .with_fundamental("pe_ratio", json!(24.5)),
    );

    let fetcher = fetcher_over(
        &["kite", "alphavantage"],
        vec![Arc::clone(&kite), Arc::clone(&alphavantage)],
        FetcherConfig::default(),
    );

    let snapshot = fetcher.snapshot(&symbol("INFY"), "NSE").await;
    assert_eq!(snapshot.price, Some(1500.0));
    assert_eq!(alphavantage.call_count(), 0);

    // The suppression is a policy, not an invariant: disabled, the
    // fragile provider contributes again.
    let fetcher = fetcher_over(
        &["kite", "alphavantage"],
        vec![kite, Arc::clone(&alphavantage)],
        FetcherConfig {
            suppress_fragile_when_live: false,
            ..FetcherConfig::default()
        },
    );

    let snapshot = fetcher.snapshot(&symbol("INFY"), "NSE").await;
    assert_eq!(snapshot.pe_ratio, Some(24.5));
    assert!(alphavantage.call_count() > 0);
}

#[tokio::test]
async fn batch_quotes_respect_the_concurrency_bound() {
    let nse = Arc::new(
        StubSource::new(ProviderKey::Nse)
            .with_quote("INFY", 1500.0)
            .with_delay(Duration::from_millis(15)),
    );

    let fetcher = fetcher_over(
        &["nse"],
        vec![Arc::clone(&nse)],
        FetcherConfig {
            batch_concurrency: 2,
            ..FetcherConfig::default()
        },
    );

    let symbols = (0..10)
        .map(|index| symbol(&format!("SYM{index}")))
        .collect::<Vec<_>>();
    let results = fetcher.quotes(&symbols, "NSE").await;

    assert_eq!(results.len(), 10);
    assert!(
        nse.max_in_flight() <= 2,
        "no more than two provider calls may be in flight"
    );

    // Input order is preserved in the merged output.
    for (expected, (got, _)) in symbols.iter().zip(results.iter()) {
        assert_eq!(expected, got);
    }
}

#[tokio::test]
async fn empty_chain_yields_empty_results_for_every_operation() {
    let fetcher = fetcher_over(&["kite"], Vec::new(), FetcherConfig::default());

    let sym = symbol("INFY");
    assert!(fetcher.quote(&sym, "NSE").await.is_none());
    assert!(fetcher.fundamentals(&sym, "NSE").await.is_empty());
    assert!(fetcher.search("infy", "NSE").await.is_empty());
    assert!(fetcher.snapshot(&sym, "NSE").await.is_empty());
}
