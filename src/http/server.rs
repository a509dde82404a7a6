//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info};

use super::client::ClientResolver;
use super::middleware::{rate_limit, RateLimitState};
use crate::error::Result;
use crate::ratelimit::RateLimiterBackend;

type SharedLimiter = Arc<dyn RateLimiterBackend>;

/// Build the service router. Every route sits behind the rate limiter.
pub fn router(limiter: SharedLimiter, resolver: ClientResolver) -> Router {
    let limit_state = RateLimitState::new(limiter.clone(), resolver);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status))
        .layer(axum::middleware::from_fn_with_state(limit_state, rate_limit))
        .with_state(limiter)
}

async fn health(State(limiter): State<SharedLimiter>) -> impl IntoResponse {
    match limiter.health().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "healthy" }))),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "error": e.to_string() })),
            )
        }
    }
}

async fn status(State(limiter): State<SharedLimiter>) -> impl IntoResponse {
    let policy = limiter.policy();
    Json(json!({
        "limit": policy.limit(),
        "window_ms": policy.window_ms(),
        "consistency": policy.consistency(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// HTTP server fronted by the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, limiter: SharedLimiter, resolver: ClientResolver) -> Self {
        Self {
            addr,
            router: router(limiter, resolver),
        }
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{LimitPolicy, RateLimiter};
    use crate::store::MemoryWindowStore;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::extract::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn limited_router(limit: u64) -> Router {
        let policy = LimitPolicy::new(limit, Duration::from_secs(60)).unwrap();
        let limiter =
            RateLimiter::new(Arc::new(MemoryWindowStore::new()), policy, "rate_limiter").unwrap();
        router(Arc::new(limiter), ClientResolver::default())
    }

    fn get_from(uri: &str, ip: [u8; 4]) -> Request {
        let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 1234))));
        req
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let policy = LimitPolicy::new(10, Duration::from_secs(1)).unwrap();
        let limiter =
            RateLimiter::new(Arc::new(MemoryWindowStore::new()), policy, "rate_limiter").unwrap();
        let _server = HttpServer::new(addr, Arc::new(limiter), ClientResolver::default());
    }

    #[tokio::test]
    async fn test_status_reports_policy() {
        let response = limited_router(5)
            .oneshot(get_from("/api/v1/status", [10, 0, 0, 1]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["limit"], 5);
        assert_eq!(body["window_ms"], 60_000);
        assert_eq!(body["consistency"], "relaxed");
    }

    #[tokio::test]
    async fn test_health_ok_with_memory_store() {
        let response = limited_router(5)
            .oneshot(get_from("/health", [10, 0, 0, 1]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_limit_applies_across_routes_per_client() {
        let app = limited_router(2);

        let first = app
            .clone()
            .oneshot(get_from("/health", [10, 0, 0, 1]))
            .await
            .unwrap();
        let second = app
            .clone()
            .oneshot(get_from("/api/v1/status", [10, 0, 0, 1]))
            .await
            .unwrap();
        let third = app
            .clone()
            .oneshot(get_from("/health", [10, 0, 0, 1]))
            .await
            .unwrap();
        let other_client = app
            .oneshot(get_from("/health", [10, 0, 0, 2]))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = third.headers()[axum::http::header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry > 0 && retry <= 60);
        assert_eq!(other_client.status(), StatusCode::OK);
    }
}
