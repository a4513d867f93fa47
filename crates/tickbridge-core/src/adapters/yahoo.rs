use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use time::Date;
use tracing::debug;

use crate::policy::ProviderPolicy;
use crate::provider::{MarketSource, ProviderKey, SourceFuture};
use crate::session::{BootstrapFuture, SessionAuth, SessionBootstrap, SessionHandle, SessionPool};
use crate::transport::{HttpClient, HttpRequest};
use crate::{
    Fundamentals, Instrument, Interval, OhlcvBar, ProviderError, Quote, RangeBucket, Symbol,
};

use super::clip_bars;

const BASE_URL: &str = "https://query1.finance.yahoo.com";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_ENDPOINTS: [&str; 2] = [
    "https://query1.finance.yahoo.com/v1/test/getcrumb",
    "https://query2.finance.yahoo.com/v1/test/getcrumb",
];

/// Vendor adapter over Yahoo's unofficial finance API.
///
/// Authenticated calls need a session cookie (primed against fc.yahoo.com,
/// held by the transport's cookie jar) plus a crumb token appended to every
/// query string.
pub struct YahooAdapter {
    pool: Arc<SessionPool>,
}

struct YahooBootstrap;

impl SessionBootstrap for YahooBootstrap {
    fn prime<'a>(
        &'a self,
        transport: &'a dyn HttpClient,
        session: &'a SessionHandle,
    ) -> BootstrapFuture<'a> {
        Box::pin(async move {
            let cookie_request = HttpRequest::get(COOKIE_URL)
                .with_header("user-agent", session.user_agent())
                .with_header("referer", "https://finance.yahoo.com/")
                .with_timeout_ms(10_000);

            // The landing fetch exists only to fill the cookie jar; its
            // status does not matter.
            let _ = transport.execute(cookie_request).await;

            for endpoint in CRUMB_ENDPOINTS {
                let crumb_request = HttpRequest::get(endpoint)
                    .with_header("user-agent", session.user_agent())
                    .with_header("referer", "https://finance.yahoo.com/")
                    .with_timeout_ms(10_000);

                match transport.execute(crumb_request).await {
                    Ok(response) if response.is_success() => {
                        let body = response.body.trim();
                        if body.is_empty()
                            || body.contains("<html")
                            || body.contains("<!DOCTYPE")
                            || body.contains(' ')
                            || body.len() >= 100
                        {
                            continue;
                        }
                        return Ok(SessionAuth::default()
                            .with_header("referer", "https://finance.yahoo.com/")
                            .with_param("crumb", body));
                    }
                    _ => continue,
                }
            }

            Err(ProviderError::transient(
                "failed to obtain yahoo crumb from any endpoint",
            ))
        })
    }
}

impl YahooAdapter {
    pub fn new(transport: Arc<dyn HttpClient>) -> Self {
        let pool = SessionPool::new(
            BASE_URL,
            transport,
            Arc::new(YahooBootstrap),
            &ProviderPolicy::yahoo_default(),
        );
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Dedicated quote feed; the fast path for listed symbols.
    async fn quote_from_quote_feed(
        &self,
        symbol: &Symbol,
    ) -> Result<Option<Quote>, ProviderError> {
        let payload = self
            .pool
            .request(
                "/v7/finance/quote",
                &[
                    ("symbols", symbol.as_str()),
                    (
                        "fields",
                        "regularMarketPrice,regularMarketChange,regularMarketChangePercent,currency,regularMarketTime",
                    ),
                ],
            )
            .await?;

        let response: YahooQuoteResponse = serde_json::from_value(payload)
            .map_err(|e| ProviderError::internal(format!("yahoo quote payload: {e}")))?;

        let Some(row) = response.quote_response.result.into_iter().next() else {
            return Ok(None);
        };
        let Some(price) = row.regular_market_price else {
            return Ok(None);
        };

        let quote = Quote::new(
            symbol.clone(),
            price,
            row.regular_market_change.unwrap_or(0.0),
            row.regular_market_change_percent.unwrap_or(0.0),
            row.currency.unwrap_or_else(|| String::from("USD")),
            row.regular_market_time.unwrap_or(0),
        )?;
        Ok(Some(quote))
    }

    /// Chart-meta fallback for symbols the quote feed does not carry.
    async fn quote_from_chart_meta(
        &self,
        symbol: &Symbol,
    ) -> Result<Option<Quote>, ProviderError> {
        let endpoint = format!(
            "/v8/finance/chart/{}",
            urlencoding::encode(symbol.as_str())
        );
        let payload = self
            .pool
            .request(&endpoint, &[("range", "1d"), ("interval", "1d")])
            .await?;

        let response: YahooChartResponse = serde_json::from_value(payload)
            .map_err(|e| ProviderError::internal(format!("yahoo chart payload: {e}")))?;

        let Some(result) = response.chart.result.into_iter().next() else {
            return Ok(None);
        };
        let Some(meta) = result.meta else {
            return Ok(None);
        };
        let Some(price) = meta.regular_market_price else {
            return Ok(None);
        };

        let change = meta
            .chart_previous_close
            .map(|close| price - close)
            .unwrap_or(0.0);
        let prior = price - change;
        let change_pct = if prior.abs() > f64::EPSILON {
            change / prior * 100.0
        } else {
            0.0
        };

        let quote = Quote::new(
            symbol.clone(),
            price,
            change,
            change_pct,
            meta.currency.unwrap_or_else(|| String::from("USD")),
            meta.regular_market_time.unwrap_or(0),
        )?;
        Ok(Some(quote))
    }
}

impl MarketSource for YahooAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::Yahoo
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Option<Quote>> {
        Box::pin(async move {
            if let Some(quote) = self.quote_from_quote_feed(&symbol).await? {
                return Ok(Some(quote));
            }
            debug!(symbol = %symbol, "yahoo quote feed empty, trying chart meta");
            self.quote_from_chart_meta(&symbol).await
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
            let endpoint = format!(
                "/v8/finance/chart/{}",
                urlencoding::encode(symbol.as_str())
            );
            let payload = self
                .pool
                .request(
                    &endpoint,
                    &[
                        ("range", bucket.as_str()),
                        ("interval", interval.as_str()),
                    ],
                )
                .await?;

            let response: YahooChartResponse = serde_json::from_value(payload)
                .map_err(|e| ProviderError::internal(format!("yahoo chart payload: {e}")))?;

            let Some(result) = response.chart.result.into_iter().next() else {
                return Ok(Vec::new());
            };
            let Some(timestamps) = result.timestamp else {
                return Ok(Vec::new());
            };
            let Some(quote) = result.indicators.quote.into_iter().next() else {
                return Ok(Vec::new());
            };

            let mut bars = Vec::with_capacity(timestamps.len());
            for (index, &ts) in timestamps.iter().enumerate() {
                // Rows with any null OHLC slot are skipped, not zero-filled.
                if let (Some(Some(open)), Some(Some(high)), Some(Some(low)), Some(Some(close))) = (
                    quote.open.get(index),
                    quote.high.get(index),
                    quote.low.get(index),
                    quote.close.get(index),
                ) {
                    let volume = quote.volume.get(index).copied().flatten();
                    if let Ok(bar) = OhlcvBar::new(ts, *open, *high, *low, *close, volume) {
                        bars.push(bar);
                    }
                }
            }
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
                .request(
                    "/v1/finance/search",
                    &[("q", trimmed), ("quotesCount", "10")],
                )
                .await?;

            let response: YahooSearchResponse = serde_json::from_value(payload)
                .map_err(|e| ProviderError::internal(format!("yahoo search payload: {e}")))?;

            let instruments = response
                .quotes
                .into_iter()
                .filter_map(|row| {
                    let symbol = Symbol::parse(&row.symbol).ok()?;
                    let name = row.short_name.unwrap_or_else(|| row.symbol.clone());
                    Instrument::new(symbol, name, row.exchange, "USD").ok()
                })
                .collect();
            Ok(instruments)
        })
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        Box::pin(async move {
            let endpoint = format!(
                "/v10/finance/quoteSummary/{}",
                urlencoding::encode(symbol.as_str())
            );
            let payload = self
                .pool
                .request(
                    &endpoint,
                    &[("modules", "assetProfile,summaryDetail,financialData,defaultKeyStatistics")],
                )
                .await?;

            let response: YahooSummaryResponse = serde_json::from_value(payload)
                .map_err(|e| ProviderError::internal(format!("yahoo summary payload: {e}")))?;

            let Some(result) = response.quote_summary.result.into_iter().next() else {
                return Ok(Fundamentals::new());
            };

            let mut map = Fundamentals::new();
            if let Some(profile) = result.asset_profile {
                if let Some(sector) = profile.sector {
                    map.insert("sector".into(), json!(sector));
                }
                if let Some(industry) = profile.industry {
                    map.insert("industry".into(), json!(industry));
                }
            }
            if let Some(detail) = result.summary_detail {
                insert_raw(&mut map, "market_cap", detail.market_cap);
                insert_raw(&mut map, "pe_ratio", detail.trailing_pe);
            }
            if let Some(financial) = result.financial_data {
                insert_raw(&mut map, "operating_margin", financial.operating_margins);
                insert_raw(&mut map, "profit_margin", financial.profit_margins);
            }
            if let Some(stats) = result.default_key_statistics {
                if !map.contains_key("pe_ratio") {
                    insert_raw(&mut map, "pe_ratio", stats.forward_pe);
                }
            }
            Ok(map)
        })
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}

fn insert_raw(map: &mut Fundamentals, key: &str, value: Option<YahooRawValue>) {
    if let Some(raw) = value.and_then(|value| value.to_option()) {
        map.insert(key.to_owned(), json!(raw));
    }
}

#[derive(Debug, Deserialize)]
struct YahooQuoteResponse {
    #[serde(rename = "quoteResponse")]
    quote_response: YahooQuoteResult,
}

#[derive(Debug, Deserialize)]
struct YahooQuoteResult {
    #[serde(default)]
    result: Vec<YahooQuoteRow>,
}

#[derive(Debug, Deserialize)]
struct YahooQuoteRow {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "regularMarketChange")]
    regular_market_change: Option<f64>,
    #[serde(rename = "regularMarketChangePercent")]
    regular_market_change_percent: Option<f64>,
    currency: Option<String>,
    #[serde(rename = "regularMarketTime")]
    regular_market_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    #[serde(default)]
    result: Vec<YahooChartResult>,
}

#[derive(Debug, Deserialize)]
struct YahooChartResult {
    #[serde(default)]
    meta: Option<YahooChartMeta>,
    timestamp: Option<Vec<i64>>,
    #[serde(default)]
    indicators: YahooChartIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "chartPreviousClose")]
    chart_previous_close: Option<f64>,
    currency: Option<String>,
    #[serde(rename = "regularMarketTime")]
    regular_market_time: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct YahooChartIndicators {
    #[serde(default)]
    quote: Vec<YahooChartQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct YahooSearchResponse {
    #[serde(default)]
    quotes: Vec<YahooSearchRow>,
}

#[derive(Debug, Deserialize)]
struct YahooSearchRow {
    symbol: String,
    #[serde(rename = "shortname")]
    short_name: Option<String>,
    exchange: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YahooSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: YahooSummaryResult,
}

#[derive(Debug, Deserialize)]
struct YahooSummaryResult {
    #[serde(default)]
    result: Vec<YahooSummaryModules>,
}

#[derive(Debug, Deserialize)]
struct YahooSummaryModules {
    #[serde(rename = "assetProfile")]
    asset_profile: Option<YahooAssetProfile>,
    #[serde(rename = "summaryDetail")]
    summary_detail: Option<YahooSummaryDetail>,
    #[serde(rename = "financialData")]
    financial_data: Option<YahooFinancialData>,
    #[serde(rename = "defaultKeyStatistics")]
    default_key_statistics: Option<YahooKeyStatistics>,
}

#[derive(Debug, Deserialize)]
struct YahooAssetProfile {
    sector: Option<String>,
    industry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YahooSummaryDetail {
    #[serde(rename = "marketCap")]
    market_cap: Option<YahooRawValue>,
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<YahooRawValue>,
}

#[derive(Debug, Deserialize)]
struct YahooFinancialData {
    #[serde(rename = "operatingMargins")]
    operating_margins: Option<YahooRawValue>,
    #[serde(rename = "profitMargins")]
    profit_margins: Option<YahooRawValue>,
}

#[derive(Debug, Deserialize)]
struct YahooKeyStatistics {
    #[serde(rename = "forwardPE")]
    forward_pe: Option<YahooRawValue>,
}

/// Numeric fields arrive wrapped as `{"raw": ..., "fmt": ...}`.
#[derive(Debug, Deserialize)]
struct YahooRawValue {
    #[serde(default)]
    raw: Option<f64>,
}

impl YahooRawValue {
    fn to_option(&self) -> Option<f64> {
        self.raw.filter(|value| value.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_rows_with_null_slots_are_skipped() {
        let response: YahooChartResponse = serde_json::from_value(json!({
            "chart": {
                "result": [{
                    "timestamp": [1, 2, 3],
                    "indicators": {
                        "quote": [{
                            "open":   [10.0, null, 12.0],
                            "high":   [11.0, 11.5, 12.5],
                            "low":    [9.5, 10.0, 11.5],
                            "close":  [10.5, 11.0, 12.2],
                            "volume": [100, 200, null]
                        }]
                    }
                }]
            }
        }))
        .expect("payload parses");

        let result = response.chart.result.into_iter().next().expect("one result");
        let timestamps = result.timestamp.expect("timestamps");
        let quote = result.indicators.quote.into_iter().next().expect("quote");

        let mut bars = Vec::new();
        for (index, &ts) in timestamps.iter().enumerate() {
            if let (Some(Some(open)), Some(Some(high)), Some(Some(low)), Some(Some(close))) = (
                quote.open.get(index),
                quote.high.get(index),
                quote.low.get(index),
                quote.close.get(index),
            ) {
                let volume = quote.volume.get(index).copied().flatten();
                bars.push(OhlcvBar::new(ts, *open, *high, *low, *close, volume).expect("bar"));
            }
        }

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, Some(100));
        assert_eq!(bars[1].volume, None);
    }

    #[test]
    fn raw_value_filters_non_finite() {
        let value: YahooRawValue =
            serde_json::from_value(json!({ "raw": 12.5, "fmt": "12.50" })).expect("parses");
        assert_eq!(value.to_option(), Some(12.5));

        let missing: YahooRawValue = serde_json::from_value(json!({})).expect("parses");
        assert_eq!(missing.to_option(), None);
    }
}
