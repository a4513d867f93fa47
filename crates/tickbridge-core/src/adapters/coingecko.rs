use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use time::Date;

use crate::policy::ProviderPolicy;
use crate::provider::{MarketSource, ProviderKey, SourceFuture};
use crate::session::{NoBootstrap, SessionPool};
use crate::transport::HttpClient;
use crate::{
    Fundamentals, Instrument, Interval, OhlcvBar, ProviderError, Quote, RangeBucket, Symbol,
};

use super::clip_bars;

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Well-known ticker → coin id aliases; anything else falls back to the
/// lowercased ticker, which covers coins whose id equals their symbol.
const COIN_ALIASES: [(&str, &str); 8] = [
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
    ("ADA", "cardano"),
    ("XRP", "ripple"),
    ("DOGE", "dogecoin"),
    ("DOT", "polkadot"),
    ("LTC", "litecoin"),
];

/// Crypto-specialized adapter over the CoinGecko public API.
pub struct CoingeckoAdapter {
    pool: Arc<SessionPool>,
}

impl CoingeckoAdapter {
    pub fn new(transport: Arc<dyn HttpClient>) -> Self {
        let pool = SessionPool::new(
            BASE_URL,
            transport,
            Arc::new(NoBootstrap),
            &ProviderPolicy::coingecko_default(),
        );
        Self {
            pool: Arc::new(pool),
        }
    }

    fn coin_id(symbol: &Symbol) -> String {
        let ticker = symbol
            .as_str()
            .trim_end_matches("-USD")
            .trim_end_matches("-INR");
        COIN_ALIASES
            .iter()
            .find(|(alias, _)| *alias == ticker)
            .map(|(_, id)| (*id).to_owned())
            .unwrap_or_else(|| ticker.to_ascii_lowercase())
    }
}

impl MarketSource for CoingeckoAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::Coingecko
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Option<Quote>> {
        Box::pin(async move {
            let id = Self::coin_id(&symbol);
            let payload = self
                .pool
                .request(
                    "/simple/price",
                    &[
                        ("ids", &id),
                        ("vs_currencies", "usd"),
                        ("include_24hr_change", "true"),
                        ("include_last_updated_at", "true"),
                    ],
                )
                .await?;

            let Some(row) = payload.get(&id) else {
                return Ok(None);
            };
            let Some(price) = row.get("usd").and_then(Value::as_f64) else {
                return Ok(None);
            };

            let change_pct = row
                .get("usd_24h_change")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let change = price * change_pct / (100.0 + change_pct);
            let ts = row
                .get("last_updated_at")
                .and_then(Value::as_i64)
                .unwrap_or(0);

            let quote = Quote::new(symbol, price, change, change_pct, "USD", ts)?;
            Ok(Some(quote))
        })
    }

    fn history<'a>(
        &'a self,
        symbol: Symbol,
        _interval: Interval,
        start: Date,
        end: Date,
    ) -> SourceFuture<'a, Vec<OhlcvBar>> {
        Box::pin(async move {
            let bucket = RangeBucket::for_range(start, end)?;
            let endpoint = format!("/coins/{}/ohlc", Self::coin_id(&symbol));
            let days = bucket.window_days().to_string();
            let payload = self
                .pool
                .request(&endpoint, &[("vs_currency", "usd"), ("days", &days)])
                .await?;

            let Some(rows) = payload.as_array() else {
                return Ok(Vec::new());
            };

            // Rows are [ts_ms, o, h, l, c]; the endpoint reports no volume.
            let bars = rows
                .iter()
                .filter_map(|row| {
                    let row = row.as_array()?;
                    let ts = row.first()?.as_i64()? / 1_000;
                    let open = row.get(1)?.as_f64()?;
                    let high = row.get(2)?.as_f64()?;
                    let low = row.get(3)?.as_f64()?;
                    let close = row.get(4)?.as_f64()?;
                    OhlcvBar::new(ts, open, high, low, close, None).ok()
                })
                .collect();
            Ok(clip_bars(bars, start, end))
        })
    }

    fn search<'a>(&'a self, query: String) -> SourceFuture<'a, Vec<Instrument>> {
        Box::pin(async move {
            let trimmed = query.trim();
            if trimmed.is_empty() {
                return Ok(Vec::new());
            }

            let payload = self.pool.request("/search", &[("query", trimmed)]).await?;

            let response: GeckoSearch = serde_json::from_value(payload)
                .map_err(|e| ProviderError::internal(format!("coingecko search payload: {e}")))?;

            let instruments = response
                .coins
                .into_iter()
                .filter_map(|coin| {
                    let symbol = Symbol::parse(&coin.symbol?).ok()?;
                    let name = coin.name.unwrap_or_else(|| symbol.as_str().to_owned());
                    Instrument::new(symbol, name, Some(String::from("CRYPTO")), "USD").ok()
                })
                .collect();
            Ok(instruments)
        })
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        Box::pin(async move {
            let endpoint = format!("/coins/{}", Self::coin_id(&symbol));
            let payload = self
                .pool
                .request(
                    &endpoint,
                    &[
                        ("localization", "false"),
                        ("tickers", "false"),
                        ("market_data", "true"),
                    ],
                )
                .await?;

            let mut map = Fundamentals::new();
            if let Some(cap) = payload
                .pointer("/market_data/market_cap/usd")
                .and_then(Value::as_f64)
            {
                map.insert("market_cap".into(), json!(cap));
            }
            if let Some(rank) = payload.get("market_cap_rank").and_then(Value::as_i64) {
                map.insert("market_cap_rank".into(), json!(rank));
            }
            map.insert("sector".into(), json!("Cryptocurrency"));
            Ok(map)
        })
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}

#[derive(Debug, Deserialize)]
struct GeckoSearch {
    #[serde(default)]
    coins: Vec<GeckoCoin>,
}

#[derive(Debug, Deserialize)]
struct GeckoCoin {
    symbol: Option<String>,
    name: Option<String>,
}
