use std::env;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use time::macros::format_description;
use time::Date;

use crate::policy::ProviderPolicy;
use crate::provider::{MarketSource, ProviderKey, SourceFuture};
use crate::session::{SessionAuth, SessionPool, StaticAuth};
use crate::transport::HttpClient;
use crate::{Fundamentals, Instrument, Interval, OhlcvBar, ProviderError, Quote, Symbol};

use super::clip_bars;

const BASE_URL: &str = "https://www.alphavantage.co";

/// Vendor adapter over the Alpha Vantage REST API.
///
/// The free tier allows 5 requests/minute, which the pool's quota mirrors;
/// over-budget responses additionally arrive as HTTP 200 with a "Note"
/// body, mapped to a rate-limit error here.
pub struct AlphaVantageAdapter {
    pool: Arc<SessionPool>,
}

impl AlphaVantageAdapter {
    pub fn new(transport: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        let auth = SessionAuth::default().with_param("apikey", api_key.into());
        let pool = SessionPool::new(
            BASE_URL,
            transport,
            Arc::new(StaticAuth::new(auth)),
            &ProviderPolicy::alphavantage_default(),
        );
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Build from `ALPHAVANTAGE_API_KEY`, falling back to the public demo
    /// key.
    pub fn from_env(transport: Arc<dyn HttpClient>) -> Self {
        let api_key = env::var("ALPHAVANTAGE_API_KEY").unwrap_or_else(|_| String::from("demo"));
        Self::new(transport, api_key)
    }

    async fn call(&self, params: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let payload = self.pool.request("/query", params).await?;

        if let Some(note) = payload.get("Note").and_then(Value::as_str) {
            return Err(ProviderError::rate_limited(format!(
                "alphavantage budget exceeded: {note}"
            )));
        }
        if let Some(message) = payload.get("Error Message").and_then(Value::as_str) {
            return Err(ProviderError::invalid_request(format!(
                "alphavantage rejected call: {message}"
            )));
        }
        Ok(payload)
    }
}

impl MarketSource for AlphaVantageAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::AlphaVantage
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Option<Quote>> {
        Box::pin(async move {
            let payload = self
                .call(&[("function", "GLOBAL_QUOTE"), ("symbol", symbol.as_str())])
                .await?;

            let response: AvGlobalQuoteResponse = serde_json::from_value(payload)
                .map_err(|e| ProviderError::internal(format!("alphavantage quote payload: {e}")))?;

            let Some(row) = response.global_quote else {
                return Ok(None);
            };
            let Some(price) = parse_number(row.price.as_deref()) else {
                return Ok(None);
            };

            let quote = Quote::new(
                symbol,
                price,
                parse_number(row.change.as_deref()).unwrap_or(0.0),
                parse_percent(row.change_percent.as_deref()).unwrap_or(0.0),
                "USD",
                parse_trading_day(row.latest_trading_day.as_deref()).unwrap_or(0),
            )?;
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
            let payload = match interval {
                Interval::OneDay => {
                    self.call(&[
                        ("function", "TIME_SERIES_DAILY"),
                        ("symbol", symbol.as_str()),
                        ("outputsize", "full"),
                    ])
                    .await?
                }
                _ => {
                    self.call(&[
                        ("function", "TIME_SERIES_INTRADAY"),
                        ("symbol", symbol.as_str()),
                        ("interval", av_intraday_interval(interval)),
                        ("outputsize", "full"),
                    ])
                    .await?
                }
            };

            let Some(series) = extract_series(&payload) else {
                return Ok(Vec::new());
            };

            let bars = series
                .iter()
                .filter_map(|(stamp, row)| parse_series_row(stamp, row))
                .collect::<Vec<_>>();
            let mut bars = clip_bars(bars, start, end);
            bars.sort_by_key(|bar| bar.ts);
            Ok(bars)
        })
    }

    fn search<'a>(&'a self, query: String) -> SourceFuture<'a, Vec<Instrument>> {
        Box::pin(async move {
            let trimmed = query.trim();
            if trimmed.is_empty() {
                return Ok(Vec::new());
            }

            let payload = self
                .call(&[("function", "SYMBOL_SEARCH"), ("keywords", trimmed)])
                .await?;

            let response: AvSearchResponse = serde_json::from_value(payload).map_err(|e| {
                ProviderError::internal(format!("alphavantage search payload: {e}"))
            })?;

            let instruments = response
                .best_matches
                .into_iter()
                .filter_map(|row| {
                    let symbol = Symbol::parse(&row.symbol?).ok()?;
                    let name = row.name.unwrap_or_else(|| symbol.as_str().to_owned());
                    let currency = row.currency.unwrap_or_else(|| String::from("USD"));
                    Instrument::new(symbol, name, row.region, currency).ok()
                })
                .collect();
            Ok(instruments)
        })
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        Box::pin(async move {
            let payload = self
                .call(&[("function", "OVERVIEW"), ("symbol", symbol.as_str())])
                .await?;

            let overview: AvOverview = serde_json::from_value(payload).map_err(|e| {
                ProviderError::internal(format!("alphavantage overview payload: {e}"))
            })?;

            let mut map = Fundamentals::new();
            if let Some(sector) = overview.sector.filter(|s| s != "None") {
                map.insert("sector".into(), json!(sector));
            }
            if let Some(industry) = overview.industry.filter(|s| s != "None") {
                map.insert("industry".into(), json!(industry));
            }
            insert_parsed(&mut map, "market_cap", overview.market_capitalization);
            insert_parsed(&mut map, "pe_ratio", overview.pe_ratio);
            insert_parsed(&mut map, "operating_margin", overview.operating_margin_ttm);
            insert_parsed(&mut map, "profit_margin", overview.profit_margin);
            Ok(map)
        })
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}

fn av_intraday_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1min",
        Interval::FiveMinutes => "5min",
        Interval::FifteenMinutes => "15min",
        Interval::OneHour | Interval::OneDay => "60min",
    }
}

/// Series keys embed the function name ("Time Series (Daily)",
/// "Time Series (5min)", ...); match on the prefix instead of the exact
/// key.
fn extract_series(payload: &Value) -> Option<&serde_json::Map<String, Value>> {
    payload.as_object()?.iter().find_map(|(key, value)| {
        if key.starts_with("Time Series") {
            value.as_object()
        } else {
            None
        }
    })
}

fn parse_series_row(stamp: &str, row: &Value) -> Option<OhlcvBar> {
    let ts = parse_series_timestamp(stamp)?;
    let open = parse_number(row.get("1. open")?.as_str())?;
    let high = parse_number(row.get("2. high")?.as_str())?;
    let low = parse_number(row.get("3. low")?.as_str())?;
    let close = parse_number(row.get("4. close")?.as_str())?;
    let volume = row
        .get("5. volume")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<u64>().ok());

    OhlcvBar::new(ts, open, high, low, close, volume).ok()
}

fn parse_series_timestamp(raw: &str) -> Option<i64> {
    let date_format = format_description!("[year]-[month]-[day]");
    if let Ok(date) = Date::parse(raw, &date_format) {
        return Some(date.midnight().assume_utc().unix_timestamp());
    }

    let datetime_format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    time::PrimitiveDateTime::parse(raw, &datetime_format)
        .ok()
        .map(|dt| dt.assume_utc().unix_timestamp())
}

fn parse_trading_day(raw: Option<&str>) -> Option<i64> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(raw?, &format)
        .ok()
        .map(|date| date.midnight().assume_utc().unix_timestamp())
}

fn parse_number(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_percent(raw: Option<&str>) -> Option<f64> {
    raw?.trim().trim_end_matches('%').parse::<f64>().ok()
}

fn insert_parsed(map: &mut Fundamentals, key: &str, raw: Option<String>) {
    if let Some(value) = parse_number(raw.as_deref()) {
        map.insert(key.to_owned(), json!(value));
    }
}

#[derive(Debug, Deserialize)]
struct AvGlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<AvGlobalQuote>,
}

#[derive(Debug, Deserialize)]
struct AvGlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
    #[serde(rename = "09. change")]
    change: Option<String>,
    #[serde(rename = "10. change percent")]
    change_percent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<AvSearchRow>,
}

#[derive(Debug, Deserialize)]
struct AvSearchRow {
    #[serde(rename = "1. symbol")]
    symbol: Option<String>,
    #[serde(rename = "2. name")]
    name: Option<String>,
    #[serde(rename = "4. region")]
    region: Option<String>,
    #[serde(rename = "8. currency")]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvOverview {
    #[serde(rename = "Sector")]
    sector: Option<String>,
    #[serde(rename = "Industry")]
    industry: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    market_capitalization: Option<String>,
    #[serde(rename = "PERatio")]
    pe_ratio: Option<String>,
    #[serde(rename = "OperatingMarginTTM")]
    operating_margin_ttm: Option<String>,
    #[serde(rename = "ProfitMargin")]
    profit_margin: Option<String>,
}
