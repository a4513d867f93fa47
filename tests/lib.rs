//! Shared fixtures for tickbridge integration tests.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use time::Date;

use tickbridge_core::{
    BootstrapFuture, CacheTier, Fundamentals, HttpClient, HttpError, HttpRequest, HttpResponse,
    Instrument, Interval, MarketSource, MemoryTier, OhlcvBar, ProviderError, ProviderKey,
    ProviderPolicy, Quote, SessionAuth, SessionBootstrap, SessionHandle, SourceFuture, Symbol,
    TierFuture,
};

/// Transport that replays a scripted response sequence and records every
/// request it sees. Once the script runs dry it answers `200 {}`.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Shorthand: one `(status, body)` pair per scripted response.
    pub fn with_statuses(script: &[(u16, &str)]) -> Self {
        Self::new(
            script
                .iter()
                .map(|(status, body)| Ok(HttpResponse::with_status(*status, *body)))
                .collect(),
        )
    }

    pub fn always(status: u16, body: &str, times: usize) -> Self {
        Self::new(
            std::iter::repeat_with(|| Ok(HttpResponse::with_status(status, body)))
                .take(times)
                .collect(),
        )
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .len()
    }

    pub fn recorded(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .clone()
    }
}

impl HttpClient for ScriptedTransport {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .push(request);
        let next = self
            .responses
            .lock()
            .expect("response store should not be poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::ok_json("{}")));
        Box::pin(async move { next })
    }

    fn is_mock(&self) -> bool {
        true
    }
}

/// Bootstrap that counts how many times it primed a session.
#[derive(Default)]
pub struct CountingBootstrap {
    primes: AtomicUsize,
}

impl CountingBootstrap {
    pub fn primes(&self) -> usize {
        self.primes.load(Ordering::SeqCst)
    }
}

impl SessionBootstrap for CountingBootstrap {
    fn prime<'a>(
        &'a self,
        _transport: &'a dyn HttpClient,
        _session: &'a SessionHandle,
    ) -> BootstrapFuture<'a> {
        self.primes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            Ok(SessionAuth::default().with_header("x-test-session", "primed"))
        })
    }
}

/// Cache tier wrapper that counts reads and writes.
pub struct CountingTier {
    inner: MemoryTier,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl CountingTier {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: MemoryTier::new(name, None),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

impl CacheTier for CountingTier {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn get<'a>(&'a self, key: &'a str) -> TierFuture<'a, Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> TierFuture<'a, ()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl)
    }

    fn remove<'a>(&'a self, key: &'a str) -> TierFuture<'a, ()> {
        self.inner.remove(key)
    }

    fn entry_count<'a>(&'a self) -> TierFuture<'a, usize> {
        self.inner.entry_count()
    }

    fn clear<'a>(&'a self) -> TierFuture<'a, ()> {
        self.inner.clear()
    }
}

/// Configurable in-memory source for fetcher behavior tests.
pub struct StubSource {
    key: ProviderKey,
    quote: Option<Quote>,
    fundamentals: Fundamentals,
    fail: bool,
    streaming: bool,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubSource {
    pub fn new(key: ProviderKey) -> Self {
        Self {
            key,
            quote: None,
            fundamentals: Fundamentals::new(),
            fail: false,
            streaming: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_quote(mut self, symbol: &str, price: f64) -> Self {
        self.quote = Some(
            Quote::new(
                Symbol::parse(symbol).expect("valid symbol"),
                price,
                1.0,
                0.5,
                "INR",
                1_700_000_000,
            )
            .expect("valid quote"),
        );
        self
    }

    pub fn with_fundamental(mut self, field: &str, value: serde_json::Value) -> Self {
        self.fundamentals.insert(field.to_owned(), value);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn tracked_call<T>(&self, outcome: Result<T, ProviderError>) -> Result<T, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn failure(&self) -> ProviderError {
        ProviderError::transient(format!("{} stub is down", self.key))
    }
}

impl MarketSource for StubSource {
    fn key(&self) -> ProviderKey {
        self.key
    }

    fn quote<'a>(&'a self, _symbol: Symbol) -> SourceFuture<'a, Option<Quote>> {
        let outcome = if self.fail {
            Err(self.failure())
        } else {
            Ok(self.quote.clone())
        };
        Box::pin(self.tracked_call(outcome))
    }

    fn history<'a>(
        &'a self,
        _symbol: Symbol,
        _interval: Interval,
        _start: Date,
        _end: Date,
    ) -> SourceFuture<'a, Vec<OhlcvBar>> {
        let outcome = if self.fail {
            Err(self.failure())
        } else {
            Ok(Vec::new())
        };
        Box::pin(self.tracked_call(outcome))
    }

    fn search<'a>(&'a self, _query: String) -> SourceFuture<'a, Vec<Instrument>> {
        let outcome = if self.fail {
            Err(self.failure())
        } else {
            Ok(Vec::new())
        };
        Box::pin(self.tracked_call(outcome))
    }

    fn fundamentals<'a>(&'a self, _symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        let outcome = if self.fail {
            Err(self.failure())
        } else {
            Ok(self.fundamentals.clone())
        };
        Box::pin(self.tracked_call(outcome))
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}

/// Policy with millisecond pacing so retry ladders run fast under test.
pub fn fast_policy(key: ProviderKey) -> ProviderPolicy {
    ProviderPolicy {
        rate_limit_per_sec: 10_000.0,
        backoff_base: Duration::from_millis(1),
        transient_delay: Duration::from_millis(1),
        ..ProviderPolicy::default_for(key)
    }
}
