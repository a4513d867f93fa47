use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ProviderKey, Symbol, ValidationError};

/// Normalized top-level quote, identical in shape regardless of provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub price: f64,
    pub change: f64,
    pub change_pct: f64,
    pub currency: String,
    /// Epoch seconds, UTC.
    pub ts: i64,
}

impl Quote {
    pub fn new(
        symbol: Symbol,
        price: f64,
        change: f64,
        change_pct: f64,
        currency: impl AsRef<str>,
        ts: i64,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("price", price)?;
        validate_finite("change", change)?;
        validate_finite("change_pct", change_pct)?;

        Ok(Self {
            symbol,
            price,
            change,
            change_pct,
            currency: validate_currency_code(currency.as_ref())?,
            ts,
        })
    }
}

/// Normalized OHLCV candle.
///
/// Constructor enforces `high >= max(open, close)` and
/// `min(open, close) >= low`; rows that cannot satisfy it are dropped by
/// the adapters rather than zero-filled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    /// Epoch seconds, UTC.
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<u64>,
}

impl OhlcvBar {
    pub fn new(
        ts: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: Option<u64>,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("close", close)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }

        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Instrument search result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub name: String,
    pub exchange: Option<String>,
    pub currency: String,
}

impl Instrument {
    pub fn new(
        symbol: Symbol,
        name: impl Into<String>,
        exchange: Option<String>,
        currency: impl AsRef<str>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            symbol,
            name: name.into(),
            exchange,
            currency: validate_currency_code(currency.as_ref())?,
        })
    }
}

/// Opaque fundamentals payload keyed by normalized metric name.
pub type Fundamentals = Map<String, Value>;

/// Per-symbol record synthesized from several providers at once.
///
/// Each field remembers nothing about which provider filled it; `sources`
/// lists every provider that contributed at least one field, in the order
/// they were merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: Option<Symbol>,
    pub price: Option<f64>,
    pub change: Option<f64>,
    pub change_pct: Option<f64>,
    pub currency: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub operating_margin: Option<f64>,
    pub profit_margin: Option<f64>,
    pub ts: Option<i64>,
    pub sources: Vec<ProviderKey>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Fold one provider's contribution into the snapshot.
    ///
    /// First writer wins per field, so merging in priority order keeps the
    /// result deterministic for a fixed set of contributions.
    pub fn absorb(&mut self, source: ProviderKey, quote: Option<&Quote>, extra: &Fundamentals) {
        let mut contributed = false;

        if let Some(quote) = quote {
            if self.price.is_none() {
                self.symbol = Some(quote.symbol.clone());
                self.price = Some(quote.price);
                self.change = Some(quote.change);
                self.change_pct = Some(quote.change_pct);
                self.currency = Some(quote.currency.clone());
                self.ts = Some(quote.ts);
            }
            contributed = true;
        }

        contributed |= absorb_string(&mut self.sector, extra, "sector");
        contributed |= absorb_string(&mut self.industry, extra, "industry");
        contributed |= absorb_number(&mut self.market_cap, extra, "market_cap");
        contributed |= absorb_number(&mut self.pe_ratio, extra, "pe_ratio");
        contributed |= absorb_number(&mut self.operating_margin, extra, "operating_margin");
        contributed |= absorb_number(&mut self.profit_margin, extra, "profit_margin");

        if contributed && !self.sources.contains(&source) {
            self.sources.push(source);
        }
    }
}

fn absorb_string(slot: &mut Option<String>, extra: &Fundamentals, key: &str) -> bool {
    match extra.get(key).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => {
            if slot.is_none() {
                *slot = Some(value.to_owned());
            }
            true
        }
        _ => false,
    }
}

fn absorb_number(slot: &mut Option<f64>, extra: &Fundamentals, key: &str) -> bool {
    match extra.get(key).and_then(Value::as_f64) {
        Some(value) if value.is_finite() => {
            if slot.is_none() {
                *slot = Some(value);
            }
            true
        }
        _ => false,
    }
}

fn validate_currency_code(value: &str) -> Result<String, ValidationError> {
    let valid = value.len() == 3 && value.chars().all(|ch| ch.is_ascii_uppercase());
    if !valid {
        return Err(ValidationError::InvalidCurrency {
            value: value.to_owned(),
        });
    }
    Ok(value.to_owned())
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}
