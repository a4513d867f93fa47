//! # Tickbridge Core
//!
//! Resilient data-access layer over multiple unreliable, rate-limited
//! market-data providers (a brokerage API, an exchange website, public
//! data vendors, a crypto source and a deterministic synthetic source)
//! behind one uniform async interface.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters translating upstream payloads |
//! | [`cache`] | Multi-tier response cache (L1/L2/L3) |
//! | [`config`] | Registry configuration and fetcher tunables |
//! | [`domain`] | Domain models (Quote, OhlcvBar, Instrument, Snapshot) |
//! | [`error`] | Error taxonomy |
//! | [`fetcher`] | Per-operation priority fetcher |
//! | [`policy`] | Per-provider resource policies |
//! | [`provider`] | Provider keys and the adapter contract |
//! | [`registry`] | Exchange → adapter chain resolution |
//! | [`session`] | Rotating session pools with retry/backoff |
//! | [`transport`] | HTTP transport abstraction |
//!
//! ## Data flow
//!
//! ```text
//! caller
//!   └─▶ UnifiedFetcher ──▶ TieredCache (short-circuit on hit)
//!         └─▶ AdapterRegistry chain
//!               └─▶ MarketSource adapter
//!                     └─▶ SessionPool ──▶ upstream (opaque)
//! ```
//!
//! ## Failure model
//!
//! "No data" is a normal outcome (`None`/empty), never an error. The
//! session pool absorbs transport failures with bounded retries, adapters
//! absorb per-provider gaps with internal fallbacks, and the fetcher
//! absorbs whole-provider outages by walking the chain. Only
//! configuration errors (an adapter factory failing to construct) surface
//! as hard failures, and the registry downgrades even those to a shorter
//! chain.

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod session;
pub mod transport;

pub use adapters::{
    AlphaVantageAdapter, CoingeckoAdapter, KiteAdapter, MockAdapter, NseAdapter, YahooAdapter,
};
pub use cache::{cache_key, CacheTier, DiskTier, MemoryTier, TieredCache, TierFuture};
pub use config::{ChainSpec, ConfigError, FetcherConfig, RegistryConfig, REGISTRY_CONFIG_ENV};
pub use domain::{Fundamentals, Instrument, Interval, OhlcvBar, Quote, RangeBucket, Snapshot, Symbol};
pub use error::{ProviderError, ProviderErrorKind, ValidationError};
pub use fetcher::{Operation, UnifiedFetcher};
pub use policy::ProviderPolicy;
pub use provider::{MarketSource, ProviderKey, SourceFuture};
pub use registry::{AdapterRegistry, RegistryContext, SourceFactory};
pub use session::{
    BootstrapFuture, NoBootstrap, SessionAuth, SessionBootstrap, SessionHandle, SessionPool,
    StaticAuth,
};
pub use transport::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, NoopHttpClient,
    ReqwestHttpClient,
};
