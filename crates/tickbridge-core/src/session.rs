//! Resilient session management for one upstream host.
//!
//! A [`SessionPool`] owns a fixed set of rotating [`SessionHandle`]s and
//! presents a single `request(endpoint, params) -> JSON` call to the adapter
//! above it. The pool serializes scheduling decisions (rotation cursor,
//! rate-limit clock) under one async mutex; the network I/O itself runs
//! outside the lock.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde_json::Value;
use tracing::{debug, warn};

use crate::policy::ProviderPolicy;
use crate::transport::{HttpClient, HttpRequest};
use crate::{ProviderError, ProviderKey};

const AUTH_ATTEMPTS: u32 = 3;
const RATE_ATTEMPTS: u32 = 5;
const GENERIC_ATTEMPTS: u32 = 3;

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
];

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Auth material produced by a bootstrap call and attached to every
/// subsequent request on the same session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAuth {
    /// Extra headers (cookie, authorization, api-key).
    pub headers: BTreeMap<String, String>,
    /// Extra query parameters (e.g. a crumb token).
    pub params: Vec<(String, String)>,
}

impl SessionAuth {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Whether this auth state carries any live credential.
    pub fn is_live(&self) -> bool {
        !self.headers.is_empty() || !self.params.is_empty()
    }
}

/// One rotating session unit.
///
/// Auth state lives behind a short-scope mutex; `None` means the session
/// has not bootstrapped yet (or was invalidated by an auth rejection).
pub struct SessionHandle {
    user_agent: &'static str,
    auth: Mutex<Option<SessionAuth>>,
}

impl SessionHandle {
    fn new(user_agent: &'static str) -> Self {
        Self {
            user_agent,
            auth: Mutex::new(None),
        }
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.auth
            .lock()
            .expect("session auth lock is not poisoned")
            .is_some()
    }

    pub fn auth(&self) -> Option<SessionAuth> {
        self.auth
            .lock()
            .expect("session auth lock is not poisoned")
            .clone()
    }

    pub fn install(&self, auth: SessionAuth) {
        *self
            .auth
            .lock()
            .expect("session auth lock is not poisoned") = Some(auth);
    }

    /// Clear auth state so the next call re-runs the bootstrap.
    pub fn invalidate(&self) {
        *self
            .auth
            .lock()
            .expect("session auth lock is not poisoned") = None;
    }

    pub fn has_live_auth(&self) -> bool {
        self.auth()
            .map(|auth| auth.is_live())
            .unwrap_or(false)
    }
}

pub type BootstrapFuture<'a> =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<SessionAuth, ProviderError>> + Send + 'a>>;

/// Provider-specific priming call run before a session's first use and
/// after every invalidation: fetch a landing page for cookies, exchange a
/// credential for a token, or obtain a crumb.
pub trait SessionBootstrap: Send + Sync {
    fn prime<'a>(
        &'a self,
        transport: &'a dyn HttpClient,
        session: &'a SessionHandle,
    ) -> BootstrapFuture<'a>;
}

/// Bootstrap for providers that need no priming call.
#[derive(Debug, Default)]
pub struct NoBootstrap;

impl SessionBootstrap for NoBootstrap {
    fn prime<'a>(
        &'a self,
        _transport: &'a dyn HttpClient,
        _session: &'a SessionHandle,
    ) -> BootstrapFuture<'a> {
        Box::pin(async move { Ok(SessionAuth::default()) })
    }
}

/// Bootstrap that installs fixed credential material (API key parameter,
/// pre-exchanged access token header) without an upstream call.
#[derive(Debug, Clone)]
pub struct StaticAuth {
    auth: SessionAuth,
}

impl StaticAuth {
    pub fn new(auth: SessionAuth) -> Self {
        Self { auth }
    }
}

impl SessionBootstrap for StaticAuth {
    fn prime<'a>(
        &'a self,
        _transport: &'a dyn HttpClient,
        _session: &'a SessionHandle,
    ) -> BootstrapFuture<'a> {
        let auth = self.auth.clone();
        Box::pin(async move { Ok(auth) })
    }
}

#[derive(Debug)]
struct GateState {
    cursor: usize,
    last_issue: Option<Instant>,
}

/// Fixed-size pool of rotating sessions with a shared rate gate.
pub struct SessionPool {
    provider: ProviderKey,
    base_url: String,
    transport: Arc<dyn HttpClient>,
    bootstrap: Arc<dyn SessionBootstrap>,
    sessions: Vec<Arc<SessionHandle>>,
    gate: tokio::sync::Mutex<GateState>,
    min_interval: Duration,
    quota: DirectRateLimiter,
    timeout_ms: u64,
    backoff_base: Duration,
    transient_delay: Duration,
}

impl SessionPool {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpClient>,
        bootstrap: Arc<dyn SessionBootstrap>,
        policy: &ProviderPolicy,
    ) -> Self {
        let count = policy.sessions.max(1);
        let sessions = (0..count)
            .map(|index| Arc::new(SessionHandle::new(USER_AGENTS[index % USER_AGENTS.len()])))
            .collect();

        Self {
            provider: policy.key,
            base_url: base_url.into(),
            transport,
            bootstrap,
            sessions,
            gate: tokio::sync::Mutex::new(GateState {
                cursor: 0,
                last_issue: None,
            }),
            min_interval: policy.min_interval(),
            quota: RateLimiter::direct(quota_from_window(policy.quota_window, policy.quota_limit)),
            timeout_ms: policy.timeout_ms,
            backoff_base: policy.backoff_base,
            transient_delay: policy.transient_delay,
        }
    }

    pub fn provider(&self) -> ProviderKey {
        self.provider
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether any session currently holds a live credential.
    pub fn has_live_auth(&self) -> bool {
        self.sessions.iter().any(|session| session.has_live_auth())
    }

    /// Issue one JSON request, absorbing auth expiry, rate limiting and
    /// transient transport failures with bounded retries:
    ///
    /// - 401/403: invalidate the session, re-bootstrap, back off
    ///   `2^attempt + jitter`; at most 3 attempts.
    /// - 429: back off `2^attempt + jitter`; at most 5 attempts.
    /// - network error / unparseable body: fixed delay; at most 3 attempts.
    /// - any other non-2xx: fail immediately.
    pub async fn request(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, ProviderError> {
        let session = self.checkout().await;

        let mut auth_attempts: u32 = 0;
        let mut rate_attempts: u32 = 0;
        let mut transient_attempts: u32 = 0;

        loop {
            self.ensure_bootstrapped(&session).await?;
            let request = self.build_request(endpoint, params, &session);

            match self.transport.execute(request).await {
                Err(error) => {
                    transient_attempts += 1;
                    if transient_attempts >= GENERIC_ATTEMPTS {
                        return Err(ProviderError::transient(format!(
                            "{} transport failed after {} attempts: {}",
                            self.provider,
                            transient_attempts,
                            error.message()
                        )));
                    }
                    debug!(
                        provider = %self.provider,
                        attempt = transient_attempts,
                        "transport error, retrying: {}",
                        error.message()
                    );
                    tokio::time::sleep(self.transient_delay).await;
                }
                Ok(response) if matches!(response.status, 401 | 403) => {
                    auth_attempts += 1;
                    session.invalidate();
                    if auth_attempts >= AUTH_ATTEMPTS {
                        return Err(ProviderError::auth_expired(format!(
                            "{} rejected auth {} times (status {})",
                            self.provider, auth_attempts, response.status
                        )));
                    }
                    warn!(
                        provider = %self.provider,
                        attempt = auth_attempts,
                        status = response.status,
                        "auth rejected, re-bootstrapping session"
                    );
                    tokio::time::sleep(self.exponential_delay(auth_attempts)).await;
                }
                Ok(response) if response.status == 429 => {
                    rate_attempts += 1;
                    if rate_attempts >= RATE_ATTEMPTS {
                        return Err(ProviderError::rate_limited(format!(
                            "{} rate limited {} times",
                            self.provider, rate_attempts
                        )));
                    }
                    debug!(
                        provider = %self.provider,
                        attempt = rate_attempts,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(self.exponential_delay(rate_attempts)).await;
                }
                Ok(response) if !response.is_success() => {
                    return Err(ProviderError::internal(format!(
                        "{} returned unexpected status {}",
                        self.provider, response.status
                    )));
                }
                Ok(response) => match serde_json::from_str::<Value>(&response.body) {
                    Ok(value) => return Ok(value),
                    Err(_) => {
                        transient_attempts += 1;
                        if transient_attempts >= GENERIC_ATTEMPTS {
                            return Err(ProviderError::transient(format!(
                                "{} returned unparseable body after {} attempts",
                                self.provider, transient_attempts
                            )));
                        }
                        debug!(
                            provider = %self.provider,
                            attempt = transient_attempts,
                            "unparseable body, retrying"
                        );
                        tokio::time::sleep(self.transient_delay).await;
                    }
                },
            }
        }
    }

    /// Pick the next session and reserve an issue slot on the shared rate
    /// clock. Only the reservation happens under the lock; the actual wait
    /// (and the request after it) runs outside.
    async fn checkout(&self) -> Arc<SessionHandle> {
        let (session, wait) = {
            let mut gate = self.gate.lock().await;
            let session = Arc::clone(&self.sessions[gate.cursor]);
            gate.cursor = (gate.cursor + 1) % self.sessions.len();

            let now = Instant::now();
            let issue_at = match gate.last_issue {
                Some(last) => (last + self.min_interval).max(now),
                None => now,
            };
            gate.last_issue = Some(issue_at);
            (session, issue_at.saturating_duration_since(now))
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        if self.quota.check().is_err() {
            debug!(provider = %self.provider, "quota budget exhausted, pacing before send");
            tokio::time::sleep(self.min_interval.max(self.backoff_base)).await;
        }

        session
    }

    async fn ensure_bootstrapped(&self, session: &SessionHandle) -> Result<(), ProviderError> {
        if session.is_bootstrapped() {
            return Ok(());
        }
        let auth = self
            .bootstrap
            .prime(self.transport.as_ref(), session)
            .await?;
        session.install(auth);
        Ok(())
    }

    fn build_request(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        session: &SessionHandle,
    ) -> HttpRequest {
        let auth = session.auth().unwrap_or_default();

        let mut query = params
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect::<Vec<_>>();
        query.extend(auth.params.iter().cloned());

        let mut url = format!("{}{}", self.base_url, endpoint);
        if !query.is_empty() {
            let encoded = query
                .iter()
                .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&encoded);
        }

        let mut request = HttpRequest::get(url)
            .with_header("user-agent", session.user_agent())
            .with_timeout_ms(self.timeout_ms);
        for (name, value) in &auth.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        request
    }

    fn exponential_delay(&self, attempt: u32) -> Duration {
        let scale = 2_f64.powi(attempt.min(10) as i32) + fastrand::f64();
        Duration::from_secs_f64(self.backoff_base.as_secs_f64() * scale)
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let safe_limit = quota_limit.max(1);
    let burst = NonZeroU32::new(safe_limit).expect("safe limit must be non-zero");

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .expect("period is always greater than zero")
        .allow_burst(burst)
}
