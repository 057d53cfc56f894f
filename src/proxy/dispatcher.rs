//! Request dispatcher.
//!
//! Drives one client request through backend selection, bounded same-backend
//! retries and bounded failover:
//!
//! ```text
//! select ──► forward ──► success
//!              │ error
//!              ├─ retries < max_retries ──► wait, forward again (same backend)
//!              └─ otherwise ──► mark dead, attempts += 1 ──► select
//! ```
//!
//! Selection stops with a 503 once `attempts` reaches `max_attempts` or the
//! pool has no live backend.

use crate::backend::{Backend, BackendPool};
use crate::config::RetryConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Forward, ForwardError, ProxyBody};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Limits applied to every client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra forwards to the same backend before it is marked dead.
    pub max_retries: u32,
    /// Pause before each same-backend retry.
    pub retry_delay: Duration,
    /// Distinct backend selections before the request is abandoned.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            max_attempts: config.max_attempts,
        }
    }
}

/// Per-request progress, threaded through the dispatch loop by value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Forwards repeated against the currently selected backend.
    pub retries: u32,
    /// Backends given up on for this request.
    pub attempts: u32,
}

impl Counters {
    /// One more try against the same backend.
    pub fn retried(self) -> Self {
        Self {
            retries: self.retries + 1,
            ..self
        }
    }

    /// Move on to another backend; the retry budget starts over.
    pub fn failed_over(self) -> Self {
        Self {
            retries: 0,
            attempts: self.attempts + 1,
        }
    }
}

/// Terminal failures of one client request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no live backend available after {attempts} attempts")]
    NoLiveBackend { attempts: u32 },

    #[error("max attempts reached ({attempts})")]
    AttemptsExhausted { attempts: u32 },

    #[error("request cannot be forwarded: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    /// The plain-text response sent to the client.
    pub fn into_response(self) -> Response<ProxyBody> {
        match self {
            Self::InvalidRequest(_) => plain_response(StatusCode::BAD_REQUEST, "Bad request\n"),
            _ => plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service not available\n"),
        }
    }
}

/// Why forwarding to one backend stopped without a response.
enum Abandoned {
    /// Retry budget spent; counters as they stood at that point.
    Exhausted(Counters),
    /// The request itself is at fault; no backend is to blame.
    Rejected(ForwardError),
}

/// Build a small `text/plain` response.
pub(crate) fn plain_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from_static(message.as_bytes()))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Ties the pool, the forwarder and the retry policy together.
pub struct Dispatcher<F> {
    pool: Arc<BackendPool>,
    forwarder: F,
    policy: RetryPolicy,
    metrics: MetricsCollector,
}

impl<F: Forward> Dispatcher<F> {
    pub fn new(
        pool: Arc<BackendPool>,
        forwarder: F,
        policy: RetryPolicy,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            pool,
            forwarder,
            policy,
            metrics,
        }
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Serve one client request.
    ///
    /// Dropping the returned future (client gone) abandons any pending retry
    /// wait or forward without touching backend liveness.
    pub async fn dispatch(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<ProxyBody>, DispatchError> {
        let mut counters = Counters::default();

        loop {
            if counters.attempts >= self.policy.max_attempts {
                warn!(attempts = counters.attempts, "max attempts reached, terminating");
                return Err(DispatchError::AttemptsExhausted {
                    attempts: counters.attempts,
                });
            }

            let Some(backend) = self.pool.get_next_server() else {
                warn!(attempts = counters.attempts, "no live backend available");
                return Err(DispatchError::NoLiveBackend {
                    attempts: counters.attempts,
                });
            };

            debug!(
                backend = %backend.address(),
                attempt = counters.attempts,
                "selected backend"
            );

            match self.forward_with_retries(&backend, &request, counters).await {
                Ok(response) => return Ok(response),
                Err(Abandoned::Rejected(e)) => {
                    warn!(backend = %backend.address(), error = %e, "request rejected before forwarding");
                    return Err(DispatchError::InvalidRequest(e.to_string()));
                }
                Err(Abandoned::Exhausted(exhausted)) => {
                    self.pool.set_backend_status(backend.address(), false);
                    self.metrics.record_failover(backend.address());
                    counters = exhausted.failed_over();
                    warn!(
                        backend = %backend.address(),
                        status = "down",
                        attempt = counters.attempts,
                        "backend marked dead, attempting another backend"
                    );
                }
            }
        }
    }

    /// Forward to one backend, retrying transport errors after a fixed delay.
    ///
    /// Errors caused by the request itself end the loop at once and leave
    /// the backend's liveness alone.
    async fn forward_with_retries(
        &self,
        backend: &Backend,
        request: &Request<Bytes>,
        mut counters: Counters,
    ) -> Result<Response<ProxyBody>, Abandoned> {
        loop {
            match self.forwarder.forward(backend.address(), request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_backend_failure() => return Err(Abandoned::Rejected(e)),
                Err(e) => {
                    warn!(
                        backend = %backend.address(),
                        error = %e,
                        retries = counters.retries,
                        "forward failed"
                    );

                    if counters.retries >= self.policy.max_retries {
                        return Err(Abandoned::Exhausted(counters));
                    }

                    tokio::time::sleep(self.policy.retry_delay).await;
                    counters = counters.retried();
                    self.metrics.record_retry(backend.address());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendAddress;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        Fail,
        /// Fail this many calls, then succeed.
        FailFirst(u32),
        /// Fail as if the request could not be turned into an upstream one.
        Reject,
        Hang,
    }

    #[derive(Default)]
    struct ScriptedForwarder {
        behaviors: Mutex<HashMap<BackendAddress, Behavior>>,
        calls: Mutex<Vec<BackendAddress>>,
    }

    impl ScriptedForwarder {
        fn with(behaviors: &[(&BackendAddress, Behavior)]) -> Self {
            let forwarder = Self::default();
            for (addr, behavior) in behaviors {
                forwarder.behaviors.lock().insert((*addr).clone(), *behavior);
            }
            forwarder
        }

        fn calls_to(&self, addr: &BackendAddress) -> usize {
            self.calls.lock().iter().filter(|a| *a == addr).count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl Forward for ScriptedForwarder {
        async fn forward(
            &self,
            target: &BackendAddress,
            _request: Request<Bytes>,
        ) -> Result<Response<ProxyBody>, ForwardError> {
            let behavior = {
                self.calls.lock().push(target.clone());
                let mut behaviors = self.behaviors.lock();
                let entry = behaviors.entry(target.clone()).or_insert(Behavior::Ok);
                let current = *entry;
                if let Behavior::FailFirst(n) = current {
                    *entry = if n <= 1 { Behavior::Ok } else { Behavior::FailFirst(n - 1) };
                }
                current
            };

            match behavior {
                Behavior::Ok => {
                    let body = Full::new(Bytes::from(target.to_string()))
                        .map_err(|never| match never {})
                        .boxed();
                    Ok(Response::new(body))
                }
                Behavior::Fail | Behavior::FailFirst(_) => {
                    Err(ForwardError::Timeout(Duration::from_millis(1)))
                }
                Behavior::Reject => {
                    let err = Request::builder()
                        .header("bad header", "x")
                        .body(())
                        .unwrap_err();
                    Err(ForwardError::InvalidUri(err))
                }
                Behavior::Hang => std::future::pending().await,
            }
        }
    }

    fn addrs(n: u16) -> Vec<BackendAddress> {
        (0..n)
            .map(|i| format!("http://127.0.0.1:{}", 9001 + i).parse().unwrap())
            .collect()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
            max_attempts: 4,
        }
    }

    fn dispatcher(
        addresses: &[BackendAddress],
        forwarder: ScriptedForwarder,
        policy: RetryPolicy,
    ) -> Dispatcher<ScriptedForwarder> {
        let pool = Arc::new(BackendPool::from_addresses(addresses.to_vec()));
        Dispatcher::new(pool, forwarder, policy, MetricsCollector::new())
    }

    fn request() -> Request<Bytes> {
        Request::builder().uri("/").body(Bytes::new()).unwrap()
    }

    async fn body_of(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn status_of(d: &Dispatcher<ScriptedForwarder>, addr: &BackendAddress) -> bool {
        d.pool()
            .backends()
            .iter()
            .find(|b| b.address() == addr)
            .map(|b| b.get_status())
            .unwrap()
    }

    #[test]
    fn test_counters() {
        let c = Counters::default();
        assert_eq!(c, Counters { retries: 0, attempts: 0 });

        let c = c.retried().retried();
        assert_eq!(c, Counters { retries: 2, attempts: 0 });

        let c = c.failed_over();
        assert_eq!(c, Counters { retries: 0, attempts: 1 });
    }

    #[test]
    fn test_default_policy_matches_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.retry_delay, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_dispatch_error_response() {
        let response = DispatchError::AttemptsExhausted { attempts: 4 }.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_of(response).await, "Service not available\n");
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let a = addrs(2);
        let d = dispatcher(&a, ScriptedForwarder::default(), fast_policy());

        let response = d.dispatch(request()).await.unwrap();
        assert_eq!(body_of(response).await, a[0].to_string());
        assert_eq!(d.forwarder.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_error_retries_same_backend() {
        let a = addrs(2);
        let forwarder = ScriptedForwarder::with(&[(&a[0], Behavior::FailFirst(2))]);
        let d = dispatcher(&a, forwarder, fast_policy());

        let response = d.dispatch(request()).await.unwrap();
        assert_eq!(body_of(response).await, a[0].to_string());
        assert_eq!(d.forwarder.calls_to(&a[0]), 3);
        assert_eq!(d.forwarder.calls_to(&a[1]), 0);
        assert!(status_of(&d, &a[0]));
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_dead_and_fail_over() {
        let a = addrs(2);
        let forwarder = ScriptedForwarder::with(&[(&a[0], Behavior::Fail)]);
        let d = dispatcher(&a, forwarder, fast_policy());

        let response = d.dispatch(request()).await.unwrap();

        assert_eq!(body_of(response).await, a[1].to_string());
        // One initial forward plus max_retries retries.
        assert_eq!(d.forwarder.calls_to(&a[0]), 4);
        assert_eq!(d.forwarder.calls_to(&a[1]), 1);
        assert!(!status_of(&d, &a[0]));
        assert!(status_of(&d, &a[1]));
    }

    #[tokio::test]
    async fn test_attempts_exhausted_after_four_backends() {
        let a = addrs(5);
        let behaviors: Vec<_> = a.iter().map(|addr| (addr, Behavior::Fail)).collect();
        let d = dispatcher(&a, ScriptedForwarder::with(&behaviors), fast_policy());

        let err = d.dispatch(request()).await.unwrap_err();
        assert_eq!(err, DispatchError::AttemptsExhausted { attempts: 4 });

        for addr in &a[..4] {
            assert_eq!(d.forwarder.calls_to(addr), 4);
            assert!(!status_of(&d, addr));
        }
        // The fifth backend is never contacted.
        assert_eq!(d.forwarder.calls_to(&a[4]), 0);
        assert!(status_of(&d, &a[4]));
    }

    #[tokio::test]
    async fn test_pool_runs_dry_before_attempt_cap() {
        let a = addrs(2);
        let behaviors: Vec<_> = a.iter().map(|addr| (addr, Behavior::Fail)).collect();
        let d = dispatcher(&a, ScriptedForwarder::with(&behaviors), fast_policy());

        let err = d.dispatch(request()).await.unwrap_err();
        assert_eq!(err, DispatchError::NoLiveBackend { attempts: 2 });
        assert_eq!(d.forwarder.total_calls(), 8);
    }

    #[tokio::test]
    async fn test_all_dead_contacts_nobody() {
        let a = addrs(3);
        let d = dispatcher(&a, ScriptedForwarder::default(), fast_policy());
        for addr in &a {
            d.pool().set_backend_status(addr, false);
        }

        let err = d.dispatch(request()).await.unwrap_err();
        assert_eq!(err, DispatchError::NoLiveBackend { attempts: 0 });
        assert_eq!(d.forwarder.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_retries_fails_over_immediately() {
        let a = addrs(2);
        let forwarder = ScriptedForwarder::with(&[(&a[0], Behavior::Fail)]);
        let policy = RetryPolicy {
            max_retries: 0,
            ..fast_policy()
        };
        let d = dispatcher(&a, forwarder, policy);

        d.dispatch(request()).await.unwrap();
        assert_eq!(d.forwarder.calls_to(&a[0]), 1);
        assert!(!status_of(&d, &a[0]));
    }

    #[tokio::test]
    async fn test_cancelled_forward_keeps_backend_alive() {
        let a = addrs(1);
        let forwarder = ScriptedForwarder::with(&[(&a[0], Behavior::Hang)]);
        let d = dispatcher(&a, forwarder, fast_policy());

        let result = tokio::time::timeout(Duration::from_millis(50), d.dispatch(request())).await;
        assert!(result.is_err());
        assert!(status_of(&d, &a[0]));
    }

    #[tokio::test]
    async fn test_cancelled_retry_wait_keeps_backend_alive() {
        let a = addrs(1);
        let forwarder = ScriptedForwarder::with(&[(&a[0], Behavior::Fail)]);
        let policy = RetryPolicy {
            retry_delay: Duration::from_secs(30),
            ..fast_policy()
        };
        let d = dispatcher(&a, forwarder, policy);

        let result = tokio::time::timeout(Duration::from_millis(50), d.dispatch(request())).await;
        assert!(result.is_err());
        assert_eq!(d.forwarder.calls_to(&a[0]), 1);
        assert!(status_of(&d, &a[0]));
    }

    #[tokio::test]
    async fn test_malformed_request_is_not_blamed_on_backend() {
        let a = addrs(2);
        let forwarder = ScriptedForwarder::with(&[(&a[0], Behavior::Reject)]);
        let d = dispatcher(&a, forwarder, fast_policy());

        let err = d.dispatch(request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRequest(_)));
        assert_eq!(d.forwarder.calls_to(&a[0]), 1);
        assert_eq!(d.forwarder.calls_to(&a[1]), 0);
        assert!(status_of(&d, &a[0]));
        assert!(d.metrics.encode().unwrap().lines().all(|l| !l.starts_with("rrproxy_failovers_total{")));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_uri_is_not_a_backend_failure() {
        let err = Request::builder()
            .header("bad header", "x")
            .body(())
            .unwrap_err();
        assert!(!ForwardError::InvalidUri(err).is_backend_failure());
        assert!(ForwardError::Timeout(Duration::from_secs(1)).is_backend_failure());
    }
}
