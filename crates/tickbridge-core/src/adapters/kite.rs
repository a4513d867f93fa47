use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use tracing::debug;

use crate::policy::ProviderPolicy;
use crate::provider::{MarketSource, ProviderKey, SourceFuture};
use crate::session::{SessionAuth, SessionPool, StaticAuth};
use crate::transport::HttpClient;
use crate::{
    Fundamentals, Instrument, Interval, OhlcvBar, ProviderError, Quote, RangeBucket, Symbol,
};

use super::clip_bars;

const BASE_URL: &str = "https://api.kite.trade";

/// Brokerage-backed adapter.
///
/// Requests carry a pre-exchanged `api_key:access_token` credential; there
/// is no interactive login flow here, so a missing credential is a
/// construction error and the registry skips the provider.
pub struct KiteAdapter {
    pool: Arc<SessionPool>,
    default_exchange: String,
}

impl std::fmt::Debug for KiteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteAdapter")
            .field("default_exchange", &self.default_exchange)
            .finish_non_exhaustive()
    }
}

impl KiteAdapter {
    pub fn new(
        transport: Arc<dyn HttpClient>,
        api_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        let auth = SessionAuth::default()
            .with_header(
                "authorization",
                format!("token {}:{}", api_key.into(), access_token.into()),
            )
            .with_header("x-kite-version", "3");
        let pool = SessionPool::new(
            BASE_URL,
            transport,
            Arc::new(StaticAuth::new(auth)),
            &ProviderPolicy::kite_default(),
        );
        Self {
            pool: Arc::new(pool),
            default_exchange: String::from("NSE"),
        }
    }

    /// Build from `KITE_API_KEY` / `KITE_ACCESS_TOKEN`.
    pub fn from_env(transport: Arc<dyn HttpClient>) -> Result<Self, ProviderError> {
        let api_key = env::var("KITE_API_KEY")
            .map_err(|_| ProviderError::construction("KITE_API_KEY is not set"))?;
        let access_token = env::var("KITE_ACCESS_TOKEN")
            .map_err(|_| ProviderError::construction("KITE_ACCESS_TOKEN is not set"))?;
        Ok(Self::new(transport, api_key, access_token))
    }

    fn instrument_id(&self, symbol: &Symbol) -> String {
        format!("{}:{}", self.default_exchange, symbol.as_str())
    }

    async fn quote_from_full_feed(&self, symbol: &Symbol) -> Result<Option<Quote>, ProviderError> {
        let id = self.instrument_id(symbol);
        let payload = self.pool.request("/quote", &[("i", &id)]).await?;
        let envelope: KiteEnvelope<HashMap<String, KiteQuoteData>> =
            serde_json::from_value(payload)
                .map_err(|e| ProviderError::internal(format!("kite quote payload: {e}")))?;

        let Some(data) = envelope.data.get(&id) else {
            return Ok(None);
        };
        let Some(price) = data.last_price else {
            return Ok(None);
        };

        let change = data.net_change.unwrap_or_else(|| {
            data.ohlc
                .as_ref()
                .and_then(|ohlc| ohlc.close)
                .map(|close| price - close)
                .unwrap_or(0.0)
        });
        let prior = price - change;
        let change_pct = if prior.abs() > f64::EPSILON {
            change / prior * 100.0
        } else {
            0.0
        };
        let ts = data.last_trade_time.as_deref().and_then(parse_trade_time);

        let quote = Quote::new(
            symbol.clone(),
            price,
            change,
            change_pct,
            "INR",
            ts.unwrap_or(0),
        )?;
        Ok(Some(quote))
    }

    /// LTP feed carries price only; used when the full feed has no row for
    /// the instrument.
    async fn quote_from_ltp_feed(&self, symbol: &Symbol) -> Result<Option<Quote>, ProviderError> {
        let id = self.instrument_id(symbol);
        let payload = self.pool.request("/quote/ltp", &[("i", &id)]).await?;
        let envelope: KiteEnvelope<HashMap<String, KiteLtpData>> = serde_json::from_value(payload)
            .map_err(|e| ProviderError::internal(format!("kite ltp payload: {e}")))?;

        let Some(price) = envelope.data.get(&id).and_then(|data| data.last_price) else {
            return Ok(None);
        };

        let quote = Quote::new(symbol.clone(), price, 0.0, 0.0, "INR", 0)?;
        Ok(Some(quote))
    }
}

impl MarketSource for KiteAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::Kite
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Option<Quote>> {
        Box::pin(async move {
            if let Some(quote) = self.quote_from_full_feed(&symbol).await? {
                return Ok(Some(quote));
            }
            debug!(symbol = %symbol, "kite full quote feed empty, trying ltp feed");
            self.quote_from_ltp_feed(&symbol).await
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
            let bucket = RangeBucket::for_range(start, end)?;
            let from = end
                .checked_sub(time::Duration::days(bucket.window_days()))
                .unwrap_or(start);

            let endpoint = format!(
                "/instruments/historical/{}/{}",
                urlencoding::encode(symbol.as_str()),
                kite_interval(interval)
            );
            let payload = self
                .pool
                .request(
                    &endpoint,
                    &[("from", &from.to_string()), ("to", &end.to_string())],
                )
                .await?;

            let envelope: KiteEnvelope<KiteCandleData> = serde_json::from_value(payload)
                .map_err(|e| ProviderError::internal(format!("kite candles payload: {e}")))?;

            let bars = envelope
                .data
                .candles
                .iter()
                .filter_map(parse_candle_row)
                .collect();
            Ok(clip_bars(bars, start, end))
        })
    }

    fn search<'a>(&'a self, _query: String) -> SourceFuture<'a, Vec<Instrument>> {
        Box::pin(async move { Ok(Vec::new()) })
    }

    fn fundamentals<'a>(&'a self, _symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        Box::pin(async move { Ok(Fundamentals::new()) })
    }

    fn supports_streaming(&self) -> bool {
        self.pool.has_live_auth()
    }
}

fn kite_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "minute",
        Interval::FiveMinutes => "5minute",
        Interval::FifteenMinutes => "15minute",
        Interval::OneHour => "60minute",
        Interval::OneDay => "day",
    }
}

fn parse_trade_time(raw: &str) -> Option<i64> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .ok()
        .map(OffsetDateTime::unix_timestamp)
}

/// Candle rows arrive as positional arrays; any missing OHLC slot drops
/// the row.
fn parse_candle_row(row: &Value) -> Option<OhlcvBar> {
    let row = row.as_array()?;
    let ts = match row.first()? {
        Value::Number(number) => number.as_i64()?,
        Value::String(raw) => parse_trade_time(raw)?,
        _ => return None,
    };
    let open = row.get(1)?.as_f64()?;
    let high = row.get(2)?.as_f64()?;
    let low = row.get(3)?.as_f64()?;
    let close = row.get(4)?.as_f64()?;
    let volume = row.get(5).and_then(Value::as_u64);

    OhlcvBar::new(ts, open, high, low, close, volume).ok()
}

#[derive(Debug, Deserialize)]
struct KiteEnvelope<T> {
    #[allow(dead_code)]
    status: Option<String>,
    data: T,
}

#[derive(Debug, Deserialize)]
struct KiteQuoteData {
    last_price: Option<f64>,
    net_change: Option<f64>,
    #[serde(default)]
    ohlc: Option<KiteOhlc>,
    #[serde(default)]
    last_trade_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KiteOhlc {
    close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct KiteLtpData {
    last_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct KiteCandleData {
    #[serde(default)]
    candles: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn candle_row_with_null_field_is_dropped() {
        let row = json!([1_735_776_000, 100.0, null, 99.0, 100.5, 1000]);
        assert!(parse_candle_row(&row).is_none());
    }

    #[test]
    fn candle_row_with_string_timestamp_parses() {
        let row = json!(["2025-01-02T09:15:00+05:30", 100.0, 101.0, 99.0, 100.5, 1000]);
        let bar = parse_candle_row(&row).expect("row parses");
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.volume, Some(1000));
    }

    #[test]
    fn from_env_without_credentials_is_a_construction_error() {
        env::remove_var("KITE_API_KEY");
        env::remove_var("KITE_ACCESS_TOKEN");

        let transport: Arc<dyn HttpClient> = Arc::new(crate::transport::NoopHttpClient);
        let error = KiteAdapter::from_env(transport).expect_err("must fail");
        assert_eq!(error.kind(), crate::ProviderErrorKind::Construction);
    }
}
