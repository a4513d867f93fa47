use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use time::macros::format_description;
use time::Date;

use crate::policy::ProviderPolicy;
use crate::provider::{MarketSource, ProviderKey, SourceFuture};
use crate::session::{BootstrapFuture, SessionAuth, SessionBootstrap, SessionHandle, SessionPool};
use crate::transport::{HttpClient, HttpRequest};
use crate::{
    Fundamentals, Instrument, Interval, OhlcvBar, ProviderError, Quote, RangeBucket, Symbol,
};

use super::clip_bars;

const BASE_URL: &str = "https://www.nseindia.com/api";
const LANDING_URL: &str = "https://www.nseindia.com";

/// Exchange-site-backed adapter.
///
/// The site rejects cookie-less API calls, so each session primes itself
/// against the landing page first; the transport's cookie jar carries the
/// result. An auth rejection later invalidates the session and the pool
/// re-primes it.
pub struct NseAdapter {
    pool: Arc<SessionPool>,
}

struct NseBootstrap;

impl SessionBootstrap for NseBootstrap {
    fn prime<'a>(
        &'a self,
        transport: &'a dyn HttpClient,
        session: &'a SessionHandle,
    ) -> BootstrapFuture<'a> {
        Box::pin(async move {
            let request = HttpRequest::get(LANDING_URL)
                .with_header("user-agent", session.user_agent())
                .with_header("accept", "text/html")
                .with_timeout_ms(10_000);

            let response = transport.execute(request).await.map_err(|e| {
                ProviderError::transient(format!("nse landing page fetch failed: {}", e.message()))
            })?;

            if !response.is_success() {
                return Err(ProviderError::transient(format!(
                    "nse landing page returned status {}",
                    response.status
                )));
            }

            Ok(SessionAuth::default()
                .with_header("referer", "https://www.nseindia.com/")
                .with_header("accept", "application/json"))
        })
    }
}

impl NseAdapter {
    pub fn new(transport: Arc<dyn HttpClient>) -> Self {
        let pool = SessionPool::new(
            BASE_URL,
            transport,
            Arc::new(NseBootstrap),
            &ProviderPolicy::nse_default(),
        );
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn equity_payload(&self, symbol: &Symbol) -> Result<Option<NseEquity>, ProviderError> {
        let payload = self
            .pool
            .request("/quote-equity", &[("symbol", symbol.as_str())])
            .await?;

        let equity: NseEquity = serde_json::from_value(payload)
            .map_err(|e| ProviderError::internal(format!("nse equity payload: {e}")))?;

        if equity.price_info.is_none() && equity.metadata.is_none() {
            return Ok(None);
        }
        Ok(Some(equity))
    }
}

impl MarketSource for NseAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::Nse
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Option<Quote>> {
        Box::pin(async move {
            let Some(equity) = self.equity_payload(&symbol).await? else {
                return Ok(None);
            };
            let Some(info) = equity.price_info else {
                return Ok(None);
            };
            let Some(price) = info.last_price else {
                return Ok(None);
            };

            let quote = Quote::new(
                symbol,
                price,
                info.change.unwrap_or(0.0),
                info.p_change.unwrap_or(0.0),
                "INR",
                equity
                    .metadata
                    .and_then(|meta| meta.last_update_time)
                    .as_deref()
                    .and_then(parse_update_time)
                    .unwrap_or(0),
            )?;
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
            let from = end
                .checked_sub(time::Duration::days(bucket.window_days()))
                .unwrap_or(start);

            let payload = self
                .pool
                .request(
                    "/historical/cm/equity",
                    &[
                        ("symbol", symbol.as_str()),
                        ("from", &from.to_string()),
                        ("to", &end.to_string()),
                    ],
                )
                .await?;

            let series: NseHistory = serde_json::from_value(payload)
                .map_err(|e| ProviderError::internal(format!("nse history payload: {e}")))?;

            let bars = series
                .data
                .into_iter()
                .filter_map(|row| {
                    // The site marks holidays with null prices; drop those rows.
                    let ts = parse_session_date(row.timestamp.as_deref()?)?;
                    OhlcvBar::new(ts, row.open?, row.high?, row.low?, row.close?, row.volume)
                        .ok()
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

            let payload = self
                .pool
                .request("/search/autocomplete", &[("q", trimmed)])
                .await?;

            let results: NseSearch = serde_json::from_value(payload)
                .map_err(|e| ProviderError::internal(format!("nse search payload: {e}")))?;

            let instruments = results
                .symbols
                .into_iter()
                .filter_map(|row| {
                    let symbol = Symbol::parse(&row.symbol?).ok()?;
                    let name = row.symbol_info.unwrap_or_else(|| symbol.as_str().to_owned());
                    Instrument::new(symbol, name, Some(String::from("NSE")), "INR").ok()
                })
                .collect();
            Ok(instruments)
        })
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        Box::pin(async move {
            let Some(equity) = self.equity_payload(&symbol).await? else {
                return Ok(Fundamentals::new());
            };

            let mut map = Fundamentals::new();
            if let Some(industry_info) = equity.industry_info {
                if let Some(sector) = industry_info.sector {
                    map.insert("sector".into(), json!(sector));
                }
                if let Some(industry) = industry_info.industry {
                    map.insert("industry".into(), json!(industry));
                }
            } else if let Some(meta) = equity.metadata {
                if let Some(industry) = meta.industry {
                    map.insert("industry".into(), json!(industry));
                }
            }
            Ok(map)
        })
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}

fn parse_update_time(raw: &str) -> Option<i64> {
    // "02-Jan-2025 15:30:00"
    let format = format_description!(
        "[day]-[month repr:short]-[year] [hour]:[minute]:[second]"
    );
    time::PrimitiveDateTime::parse(raw, &format)
        .ok()
        .map(|dt| dt.assume_utc().unix_timestamp())
}

fn parse_session_date(raw: &str) -> Option<i64> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(raw, &format)
        .ok()
        .map(|date| date.midnight().assume_utc().unix_timestamp())
}

#[derive(Debug, Deserialize)]
struct NseEquity {
    #[serde(rename = "priceInfo")]
    price_info: Option<NsePriceInfo>,
    metadata: Option<NseMetadata>,
    #[serde(rename = "industryInfo")]
    industry_info: Option<NseIndustryInfo>,
}

#[derive(Debug, Deserialize)]
struct NsePriceInfo {
    #[serde(rename = "lastPrice")]
    last_price: Option<f64>,
    change: Option<f64>,
    #[serde(rename = "pChange")]
    p_change: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct NseMetadata {
    industry: Option<String>,
    #[serde(rename = "lastUpdateTime")]
    last_update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NseIndustryInfo {
    sector: Option<String>,
    industry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NseHistory {
    #[serde(default)]
    data: Vec<NseHistoryRow>,
}

#[derive(Debug, Deserialize)]
struct NseHistoryRow {
    #[serde(rename = "CH_TIMESTAMP")]
    timestamp: Option<String>,
    #[serde(rename = "CH_OPENING_PRICE")]
    open: Option<f64>,
    #[serde(rename = "CH_TRADE_HIGH_PRICE")]
    high: Option<f64>,
    #[serde(rename = "CH_TRADE_LOW_PRICE")]
    low: Option<f64>,
    #[serde(rename = "CH_CLOSING_PRICE")]
    close: Option<f64>,
    #[serde(rename = "CH_TOT_TRADED_QTY")]
    volume: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct NseSearch {
    #[serde(default)]
    symbols: Vec<NseSearchRow>,
}

#[derive(Debug, Deserialize)]
struct NseSearchRow {
    symbol: Option<String>,
    #[serde(rename = "symbol_info")]
    symbol_info: Option<String>,
}
