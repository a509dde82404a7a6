//! Core sliding-window rate limiter.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, trace};

use super::backend::RateLimiterBackend;
use super::decision::Decision;
use super::key::ClientKey;
use super::member::MemberGenerator;
use super::policy::{Consistency, LimitPolicy};
use crate::error::{Result, SlidewireError};
use crate::store::{StoreError, StoreResult, WindowEntry, WindowStore};

/// Sliding-window rate limiter over a shared [`WindowStore`].
///
/// The limiter keeps no per-client state of its own. Every process pointed
/// at the same store and prefix enforces one shared limit per client.
pub struct RateLimiter {
    /// Where client windows live
    store: Arc<dyn WindowStore>,
    /// Limit, window and consistency settings
    policy: LimitPolicy,
    /// Namespace for client keys
    key_prefix: String,
    /// Source of unique entry members
    members: MemberGenerator,
}

impl RateLimiter {
    /// Create a limiter storing windows under `key_prefix`.
    pub fn new(
        store: Arc<dyn WindowStore>,
        policy: LimitPolicy,
        key_prefix: impl Into<String>,
    ) -> Result<Self> {
        let key_prefix = key_prefix.into();
        if key_prefix.is_empty() {
            return Err(SlidewireError::InvalidConfiguration(
                "key prefix must not be empty".to_string(),
            ));
        }

        Ok(Self {
            store,
            policy: policy.validated()?,
            key_prefix,
            members: MemberGenerator::new(),
        })
    }

    /// Replace the member generator, e.g. to pin the instance id.
    pub fn with_members(mut self, members: MemberGenerator) -> Self {
        self.members = members;
        self
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Evaluate a request from `client` arriving now.
    pub async fn check(&self, client: &str) -> Result<Decision> {
        self.evaluate(client, Utc::now().timestamp_millis()).await
    }

    /// Evaluate a request from `client` arriving at `now_ms`.
    ///
    /// The arrival is recorded before counting, so it counts against its own
    /// limit: the `limit`-th arrival in a window is admitted and the next one
    /// is rejected. Any store failure returns `StoreUnavailable`; the request
    /// is never admitted without a count.
    pub async fn evaluate(&self, client: &str, now_ms: i64) -> Result<Decision> {
        let key = ClientKey::new(&self.key_prefix, client);
        let limit = self.policy.limit();
        let window_ms = self.policy.window_ms();
        let window_start = now_ms.saturating_sub(window_ms);
        let entry = WindowEntry::new(now_ms, self.members.next(now_ms));
        let ttl = self.policy.window();

        let observed = match self.policy.consistency() {
            Consistency::Relaxed => {
                self.round_trip(
                    "record",
                    self.store.record(key.as_str(), &entry, ttl, window_start),
                )
                .await?;
                self.round_trip(
                    "count",
                    self.store.count_in_range(key.as_str(), window_start, now_ms),
                )
                .await?
            }
            Consistency::Strict => {
                self.round_trip(
                    "record_and_count",
                    self.store
                        .record_and_count(key.as_str(), &entry, ttl, window_start, now_ms),
                )
                .await?
            }
        };

        trace!(key = %key, observed = observed, limit = limit, "Evaluated window");

        if observed <= limit {
            return Ok(Decision::admitted(observed, limit));
        }

        let oldest = self
            .round_trip("oldest", self.store.oldest_entries(key.as_str(), 1))
            .await?;
        let oldest = oldest.first().ok_or_else(|| {
            error!(key = %key, "Window empty after recording an arrival");
            StoreError::Unavailable(format!("window {} is empty after recording", key))
        })?;

        let retry_after = retry_after_secs(oldest.score, now_ms, window_ms);
        debug!(
            key = %key,
            observed = observed,
            limit = limit,
            retry_after_secs = retry_after,
            "Rate limit exceeded"
        );
        Ok(Decision::rejected(observed, limit, retry_after))
    }

    /// Run one store round trip under the configured timeout.
    async fn round_trip<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> Result<T> {
        let timeout = self.policy.store_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(operation = operation, error = %e, "Window store operation failed");
                Err(e.into())
            }
            Err(_) => {
                error!(operation = operation, timeout = ?timeout, "Window store operation timed out");
                Err(StoreError::Timeout(timeout).into())
            }
        }
    }
}

/// Whole seconds until an arrival at `oldest_ms` stops being counted.
///
/// The delay is `window_ms - (now_ms - oldest_ms)` rounded up. It is at
/// least one second while the arrival is still in the window and zero once
/// it has left.
pub fn retry_after_secs(oldest_ms: i64, now_ms: i64, window_ms: i64) -> u64 {
    let remaining_ms = oldest_ms.saturating_add(window_ms).saturating_sub(now_ms);
    if remaining_ms < 0 {
        return 0;
    }
    (remaining_ms as u64).div_ceil(1000).max(1)
}

#[async_trait]
impl RateLimiterBackend for RateLimiter {
    async fn check(&self, client: &str) -> Result<Decision> {
        RateLimiter::check(self, client).await
    }

    fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    async fn health(&self) -> Result<()> {
        self.round_trip("ping", self.store.ping()).await
    }
}
