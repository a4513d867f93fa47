//! Retry state machine behavior of the session pool.

use std::sync::Arc;

use tickbridge_core::{
    HttpError, HttpResponse, NoBootstrap, ProviderErrorKind, ProviderKey, SessionPool,
};

use tickbridge_tests::{fast_policy, CountingBootstrap, ScriptedTransport};

fn pool_with_bootstrap(
    transport: Arc<ScriptedTransport>,
    bootstrap: Arc<CountingBootstrap>,
) -> SessionPool {
    SessionPool::new(
        "https://upstream.test",
        transport,
        bootstrap,
        &fast_policy(ProviderKey::Nse),
    )
}

fn pool(transport: Arc<ScriptedTransport>) -> SessionPool {
    SessionPool::new(
        "https://upstream.test",
        transport,
        Arc::new(NoBootstrap),
        &fast_policy(ProviderKey::Nse),
    )
}

#[tokio::test]
async fn auth_rejection_recovers_with_one_session_reset() {
    let transport = Arc::new(ScriptedTransport::with_statuses(&[
        (401, "denied"),
        (200, r#"{"price": 101.5}"#),
    ]));
    let bootstrap = Arc::new(CountingBootstrap::default());
    let pool = pool_with_bootstrap(Arc::clone(&transport), Arc::clone(&bootstrap));

    let payload = pool.request("/quote", &[]).await.expect("second attempt succeeds");
    assert_eq!(payload["price"], 101.5);
    assert_eq!(transport.call_count(), 2);
    // Initial prime plus exactly one re-prime after the 401 reset.
    assert_eq!(bootstrap.primes(), 2);
}

#[tokio::test]
async fn persistent_auth_rejection_fails_after_three_attempts() {
    let transport = Arc::new(ScriptedTransport::always(403, "denied", 10));
    let bootstrap = Arc::new(CountingBootstrap::default());
    let pool = pool_with_bootstrap(Arc::clone(&transport), Arc::clone(&bootstrap));

    let error = pool.request("/quote", &[]).await.expect_err("must fail");
    assert_eq!(error.kind(), ProviderErrorKind::AuthExpired);
    assert_eq!(transport.call_count(), 3);
    assert_eq!(bootstrap.primes(), 3);
}

#[tokio::test]
async fn persistent_rate_limit_gives_up_after_exactly_five_attempts() {
    let transport = Arc::new(ScriptedTransport::always(429, "slow down", 10));
    let pool = pool(Arc::clone(&transport));

    let error = pool.request("/quote", &[]).await.expect_err("must fail");
    assert_eq!(error.kind(), ProviderErrorKind::RateLimited);
    assert_eq!(transport.call_count(), 5);
}

#[tokio::test]
async fn rate_limit_then_success_recovers() {
    let transport = Arc::new(ScriptedTransport::with_statuses(&[
        (429, "slow down"),
        (429, "slow down"),
        (200, r#"{"ok": true}"#),
    ]));
    let pool = pool(Arc::clone(&transport));

    let payload = pool.request("/quote", &[]).await.expect("third attempt succeeds");
    assert_eq!(payload["ok"], true);
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn network_errors_retry_three_times_then_surface() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Err(HttpError::new("connection reset")),
        Err(HttpError::new("connection reset")),
        Err(HttpError::new("connection reset")),
    ]));
    let pool = pool(Arc::clone(&transport));

    let error = pool.request("/quote", &[]).await.expect_err("must fail");
    assert_eq!(error.kind(), ProviderErrorKind::Transient);
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn network_error_then_success_recovers() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Err(HttpError::new("timeout")),
        Ok(HttpResponse::ok_json(r#"{"ok": true}"#)),
    ]));
    let pool = pool(Arc::clone(&transport));

    let payload = pool.request("/quote", &[]).await.expect("retry succeeds");
    assert_eq!(payload["ok"], true);
}

#[tokio::test]
async fn other_status_codes_fail_immediately() {
    let transport = Arc::new(ScriptedTransport::with_statuses(&[(503, "maintenance")]));
    let pool = pool(Arc::clone(&transport));

    let error = pool.request("/quote", &[]).await.expect_err("must fail");
    assert_eq!(error.kind(), ProviderErrorKind::Internal);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn malformed_body_is_treated_like_a_network_error() {
    let transport = Arc::new(ScriptedTransport::with_statuses(&[
        (200, "<html>definitely not json</html>"),
        (200, r#"{"ok": true}"#),
    ]));
    let pool = pool(Arc::clone(&transport));

    let payload = pool.request("/quote", &[]).await.expect("retry succeeds");
    assert_eq!(payload["ok"], true);
    assert_eq!(transport.call_count(), 2);
}
