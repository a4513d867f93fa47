use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Validation and contract errors exposed by `tickbridge-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid interval '{value}', expected one of 1m, 5m, 15m, 1h, 1d")]
    InvalidInterval { value: String },
    #[error("invalid provider '{value}', expected one of kite, nse, yahoo, alphavantage, coingecko, mock")]
    InvalidProvider { value: String },

    #[error("history range end {end} precedes start {start}")]
    InvertedRange { start: String, end: String },

    #[error("currency must be a 3-letter uppercase ISO code: '{value}'")]
    InvalidCurrency { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,
}

/// Provider-level error classification.
///
/// "No data" is deliberately absent: operations report it as
/// `Ok(None)` / an empty collection, never through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403 that survived session re-bootstrap and bounded retries.
    AuthExpired,
    /// 429 that survived bounded backoff.
    RateLimited,
    /// Network failure, timeout or unparseable body after bounded retries.
    Transient,
    InvalidRequest,
    /// Adapter factory failure (missing credentials, bad config).
    Construction,
    Internal,
}

/// Structured provider error carried across the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
    retryable: bool,
}

impl ProviderError {
    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::AuthExpired,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn construction(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Construction,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ProviderErrorKind::AuthExpired => "provider.auth_expired",
            ProviderErrorKind::RateLimited => "provider.rate_limited",
            ProviderErrorKind::Transient => "provider.transient",
            ProviderErrorKind::InvalidRequest => "provider.invalid_request",
            ProviderErrorKind::Construction => "provider.construction",
            ProviderErrorKind::Internal => "provider.internal",
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ProviderError {}

impl From<ValidationError> for ProviderError {
    fn from(error: ValidationError) -> Self {
        Self::internal(error.to_string())
    }
}
