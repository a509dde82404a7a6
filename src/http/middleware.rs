//! Rate limiting middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, error};

use super::client::ClientResolver;
use crate::ratelimit::{Decision, RateLimiterBackend};

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// State shared by every invocation of [`rate_limit`].
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<dyn RateLimiterBackend>,
    resolver: Arc<ClientResolver>,
}

impl RateLimitState {
    pub fn new(limiter: Arc<dyn RateLimiterBackend>, resolver: ClientResolver) -> Self {
        Self {
            limiter,
            resolver: Arc::new(resolver),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

/// Admit or reject a request before it reaches its handler.
///
/// Rejections map to `429` with `Retry-After`; a store failure maps to `503`
/// and the request is not forwarded. If the client goes away mid-evaluation
/// the whole future is dropped, store calls included.
pub async fn rate_limit(State(state): State<RateLimitState>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = state.resolver.resolve(req.headers(), peer);

    match state.limiter.check(&client).await {
        Ok(decision) if decision.admitted => {
            let mut response = next.run(req).await;
            insert_quota_headers(&mut response, &decision);
            response
        }
        Ok(decision) => {
            debug!(
                client = %client,
                observed = decision.observed_count,
                retry_after_secs = decision.retry_after_secs,
                "Rejecting request over limit"
            );
            too_many_requests(&decision)
        }
        Err(e) => {
            error!(client = %client, error = %e, "Rate limit evaluation failed, rejecting request");
            let body = ErrorBody {
                error: "service_unavailable",
                message: "Rate limiter unavailable".to_string(),
                retry_after_secs: None,
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

fn insert_quota_headers(response: &mut Response, decision: &Decision) {
    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining()));
}

fn too_many_requests(decision: &Decision) -> Response {
    let body = ErrorBody {
        error: "too_many_requests",
        message: format!(
            "Rate limit exceeded. Try again in {} seconds.",
            decision.retry_after_secs
        ),
        retry_after_secs: Some(decision.retry_after_secs),
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    insert_quota_headers(&mut response, decision);
    response.headers_mut().insert(
        axum::http::header::RETRY_AFTER,
        HeaderValue::from(decision.retry_after_secs),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SlidewireError};
    use crate::ratelimit::LimitPolicy;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Backend returning canned outcomes and recording who asked.
    struct StubBackend {
        policy: LimitPolicy,
        outcome: fn() -> Result<Decision>,
        clients: Mutex<Vec<String>>,
    }

    impl StubBackend {
        fn new(outcome: fn() -> Result<Decision>) -> Self {
            Self {
                policy: LimitPolicy::new(10, Duration::from_secs(1)).unwrap(),
                outcome,
                clients: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RateLimiterBackend for StubBackend {
        async fn check(&self, client: &str) -> Result<Decision> {
            self.clients.lock().unwrap().push(client.to_string());
            (self.outcome)()
        }

        fn policy(&self) -> &LimitPolicy {
            &self.policy
        }

        async fn health(&self) -> Result<()> {
            Ok(())
        }
    }

    fn app(backend: Arc<StubBackend>) -> Router {
        let state = RateLimitState::new(backend, ClientResolver::default());
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(state, rate_limit))
    }

    fn request_from(ip: [u8; 4]) -> Request {
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 5555))));
        req
    }

    #[tokio::test]
    async fn test_admitted_request_reaches_handler() {
        let backend = Arc::new(StubBackend::new(|| Ok(Decision::admitted(3, 10))));
        let response = app(backend.clone())
            .oneshot(request_from([10, 1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[LIMIT_HEADER], "10");
        assert_eq!(response.headers()[REMAINING_HEADER], "7");
        assert_eq!(backend.clients.lock().unwrap().as_slice(), ["10.1.2.3"]);
    }

    #[tokio::test]
    async fn test_rejected_request_gets_429_with_retry_after() {
        let backend = Arc::new(StubBackend::new(|| Ok(Decision::rejected(11, 10, 1))));
        let response = app(backend).oneshot(request_from([10, 1, 2, 3])).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[axum::http::header::RETRY_AFTER], "1");
        assert_eq!(response.headers()[REMAINING_HEADER], "0");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "too_many_requests");
        assert_eq!(body["retry_after_secs"], 1);
    }

    #[tokio::test]
    async fn test_store_failure_gets_503() {
        let backend = Arc::new(StubBackend::new(|| {
            Err(SlidewireError::StoreUnavailable(StoreError::Timeout(
                Duration::from_millis(250),
            )))
        }));
        let response = app(backend).oneshot(request_from([10, 1, 2, 3])).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(axum::http::header::RETRY_AFTER).is_none());
    }

    #[tokio::test]
    async fn test_missing_peer_limited_as_unknown() {
        let backend = Arc::new(StubBackend::new(|| Ok(Decision::admitted(1, 10))));
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        app(backend.clone()).oneshot(req).await.unwrap();

        assert_eq!(backend.clients.lock().unwrap().as_slice(), ["unknown"]);
    }
}
