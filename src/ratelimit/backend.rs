//! Rate limiter trait for the HTTP layer.

use async_trait::async_trait;

use super::decision::Decision;
use super::policy::LimitPolicy;
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// The HTTP middleware depends on this trait rather than on
/// [`RateLimiter`](super::RateLimiter) so tests can substitute their own.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Evaluate one request from `client` at the current time.
    async fn check(&self, client: &str) -> Result<Decision>;

    /// The policy decisions are made against.
    fn policy(&self) -> &LimitPolicy;

    /// Check that the backing store is reachable.
    async fn health(&self) -> Result<()>;
}
