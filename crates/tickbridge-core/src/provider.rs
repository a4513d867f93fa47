use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{Fundamentals, Instrument, Interval, OhlcvBar, ProviderError, Quote, Symbol,
    ValidationError};

/// Canonical provider identifiers.
///
/// Each key maps to exactly one long-lived adapter instance, constructed
/// lazily by the registry and shared by every chain that references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKey {
    Kite,
    Nse,
    Yahoo,
    #[serde(rename = "alphavantage")]
    AlphaVantage,
    Coingecko,
    Mock,
}

impl ProviderKey {
    pub const ALL: [Self; 6] = [
        Self::Kite,
        Self::Nse,
        Self::Yahoo,
        Self::AlphaVantage,
        Self::Coingecko,
        Self::Mock,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kite => "kite",
            Self::Nse => "nse",
            Self::Yahoo => "yahoo",
            Self::AlphaVantage => "alphavantage",
            Self::Coingecko => "coingecko",
            Self::Mock => "mock",
        }
    }
}

impl Display for ProviderKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKey {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kite" => Ok(Self::Kite),
            "nse" => Ok(Self::Nse),
            "yahoo" => Ok(Self::Yahoo),
            "alphavantage" => Ok(Self::AlphaVantage),
            "coingecko" => Ok(Self::Coingecko),
            "mock" => Ok(Self::Mock),
            other => Err(ValidationError::InvalidProvider {
                value: other.to_owned(),
            }),
        }
    }
}

pub type SourceFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Uniform data-access contract implemented by every provider adapter.
///
/// "No data" is an `Ok` outcome: `quote` returns `Ok(None)` and the
/// collection operations return empty collections for symbols or ranges the
/// provider does not know. `Err` is reserved for transport-level failure
/// that survived the session client's bounded retries.
///
/// Implementations must be `Send + Sync`; adapter instances are shared
/// across every exchange chain that references them.
pub trait MarketSource: Send + Sync {
    fn key(&self) -> ProviderKey;

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Option<Quote>>;

    fn history<'a>(
        &'a self,
        symbol: Symbol,
        interval: Interval,
        start: Date,
        end: Date,
    ) -> SourceFuture<'a, Vec<OhlcvBar>>;

    fn search<'a>(&'a self, query: String) -> SourceFuture<'a, Vec<Instrument>>;

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Fundamentals>;

    /// Whether the adapter currently holds live auth (a runtime property,
    /// not a static capability).
    fn supports_streaming(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_key_round_trips_through_str() {
        for key in ProviderKey::ALL {
            assert_eq!(ProviderKey::from_str(key.as_str()).expect("parses"), key);
        }
    }

    #[test]
    fn provider_key_parse_is_lenient_about_case_and_space() {
        assert_eq!(
            ProviderKey::from_str(" KITE ").expect("parses"),
            ProviderKey::Kite
        );
    }

    #[test]
    fn unknown_provider_key_is_rejected() {
        let err = ProviderKey::from_str("bloomberg").expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidProvider { .. }));
    }
}
