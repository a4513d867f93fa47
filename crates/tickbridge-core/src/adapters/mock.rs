use serde_json::json;
use time::Date;

use crate::provider::{MarketSource, ProviderKey, SourceFuture};
use crate::{Fundamentals, Instrument, Interval, OhlcvBar, Quote, Symbol};

use super::epoch_bounds;

/// Deterministic synthetic source used by tests and offline mode.
///
/// Every operation is a pure function of its inputs; no transport, no
/// clocks. Symbols listed in the catalog resolve; everything else behaves
/// like an unknown symbol (`None`/empty), which makes "not found" paths
/// exercisable offline.
pub struct MockAdapter {
    streaming: bool,
    catalog: Vec<(&'static str, &'static str, &'static str)>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self {
            streaming: false,
            catalog: vec![
                ("INFY", "Infosys Limited", "NSE"),
                ("TCS", "Tata Consultancy Services", "NSE"),
                ("RELIANCE", "Reliance Industries", "NSE"),
                ("HDFCBANK", "HDFC Bank", "NSE"),
                ("AAPL", "Apple Inc.", "NASDAQ"),
                ("BTC-USD", "Bitcoin", "CRYPTO"),
            ],
        }
    }
}

impl MockAdapter {
    /// Pretend to hold live auth; used to exercise streaming-dependent
    /// policies without a brokerage session.
    pub fn with_streaming(streaming: bool) -> Self {
        Self {
            streaming,
            ..Self::default()
        }
    }

    fn knows(&self, symbol: &Symbol) -> bool {
        self.catalog.iter().any(|(sym, _, _)| *sym == symbol.as_str())
    }

    fn seed(symbol: &Symbol) -> u64 {
        symbol.as_str().bytes().fold(0_u64, |acc, byte| {
            acc.wrapping_mul(33).wrapping_add(byte as u64)
        })
    }

    fn price_for(symbol: &Symbol) -> f64 {
        90.0 + (Self::seed(symbol) % 5_000) as f64 / 10.0
    }
}

impl MarketSource for MockAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::Mock
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Option<Quote>> {
        Box::pin(async move {
            if !self.knows(&symbol) {
                return Ok(None);
            }

            let price = Self::price_for(&symbol);
            let change = (Self::seed(&symbol) % 200) as f64 / 10.0 - 10.0;
            let change_pct = change / (price - change) * 100.0;
            let quote = Quote::new(symbol, price, change, change_pct, "INR", 1_700_000_000)?;
            Ok(Some(quote))
        })
    }

    fn history<'a>(
        &'a self,
        symbol: Symbol,
        interval: Interval,
        start: Date,
        end: Date,
    ) -> SourceFuture<'a, Vec<OhlcvBar>> {
        Box::pin(async move {
            if !self.knows(&symbol) {
                return Ok(Vec::new());
            }

            let (start_ts, end_ts) = epoch_bounds(start, end);
            let step = interval.seconds();
            let seed = Self::seed(&symbol);

            let mut bars = Vec::new();
            let mut ts = start_ts;
            while ts <= end_ts && bars.len() < 500 {
                let base = 90.0 + ((seed + ts as u64 / step as u64) % 350) as f64 / 10.0;
                bars.push(OhlcvBar::new(
                    ts,
                    base,
                    base + 1.2,
                    base - 0.8,
                    base + 0.3,
                    Some(20_000 + bars.len() as u64 * 25),
                )?);
                ts += step;
            }
            Ok(bars)
        })
    }

    fn search<'a>(&'a self, query: String) -> SourceFuture<'a, Vec<Instrument>> {
        Box::pin(async move {
            let needle = query.trim().to_ascii_lowercase();
            if needle.is_empty() {
                return Ok(Vec::new());
            }

            let results = self
                .catalog
                .iter()
                .filter(|(sym, name, _)| {
                    sym.to_ascii_lowercase().contains(&needle)
                        || name.to_ascii_lowercase().contains(&needle)
                })
                .filter_map(|(sym, name, exchange)| {
                    let symbol = Symbol::parse(sym).ok()?;
                    let currency = if *exchange == "NSE" { "INR" } else { "USD" };
                    Instrument::new(symbol, *name, Some((*exchange).to_owned()), currency).ok()
                })
                .collect();
            Ok(results)
        })
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        Box::pin(async move {
            if !self.knows(&symbol) {
                return Ok(Fundamentals::new());
            }

            let seed = Self::seed(&symbol);
            let mut map = Fundamentals::new();
            map.insert("sector".into(), json!("Information Technology"));
            map.insert("industry".into(), json!("IT Services"));
            map.insert(
                "market_cap".into(),
                json!(500_000_000_000.0 + (seed % 300_000) as f64 * 1_000_000.0),
            );
            map.insert("pe_ratio".into(), json!(14.0 + (seed % 200) as f64 / 10.0));
            map.insert(
                "profit_margin".into(),
                json!(0.10 + (seed % 20) as f64 / 100.0),
            );
            Ok(map)
        })
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).expect("valid symbol")
    }

    #[tokio::test]
    async fn quote_is_deterministic() {
        let adapter = MockAdapter::default();
        let first = adapter.quote(symbol("INFY")).await.expect("quote ok");
        let second = adapter.quote(symbol("INFY")).await.expect("quote ok");
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[tokio::test]
    async fn unknown_symbol_returns_none_not_error() {
        let adapter = MockAdapter::default();
        let quote = adapter.quote(symbol("NOPE")).await.expect("quote ok");
        assert!(quote.is_none());

        let bars = adapter
            .history(
                symbol("NOPE"),
                Interval::OneDay,
                date!(2025 - 01 - 01),
                date!(2025 - 02 - 01),
            )
            .await
            .expect("history ok");
        assert!(bars.is_empty());
    }

    #[tokio::test]
    async fn history_respects_requested_range() {
        let adapter = MockAdapter::default();
        let bars = adapter
            .history(
                symbol("TCS"),
                Interval::OneDay,
                date!(2025 - 01 - 01),
                date!(2025 - 01 - 10),
            )
            .await
            .expect("history ok");

        assert_eq!(bars.len(), 10);
        let (start_ts, end_ts) = epoch_bounds(date!(2025 - 01 - 01), date!(2025 - 01 - 10));
        assert!(bars.iter().all(|bar| bar.ts >= start_ts && bar.ts <= end_ts));
    }

    #[tokio::test]
    async fn search_matches_name_fragments() {
        let adapter = MockAdapter::default();
        let results = adapter.search("tata".to_owned()).await.expect("search ok");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].symbol.as_str(), "TCS");
    }
}
