//! Limit policy: how many arrivals a window admits and how they are counted.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SlidewireError};

/// Default bound on a single store round trip.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// How the record and count steps reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// Record, then count, in two round trips.
    ///
    /// Concurrent requests from one client may each miss the other's
    /// arrival, so up to one extra admission per in-flight request can slip
    /// past the limit. Keys for different clients never contend.
    #[default]
    Relaxed,
    /// Record and count in a single atomic store operation.
    Strict,
}

/// Limiter settings, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    limit: u64,
    window: Duration,
    consistency: Consistency,
    store_timeout: Duration,
}

impl LimitPolicy {
    /// Create a relaxed policy admitting `limit` arrivals per trailing `window`.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        Self {
            limit,
            window,
            consistency: Consistency::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
        .validated()
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Reject settings the limiter cannot enforce.
    pub fn validated(self) -> Result<Self> {
        if self.limit == 0 {
            return Err(SlidewireError::InvalidConfiguration(
                "limit must be positive".to_string(),
            ));
        }
        // Scores are whole milliseconds; a shorter window could never hold an arrival.
        if self.window < Duration::from_millis(1) {
            return Err(SlidewireError::InvalidConfiguration(format!(
                "window must be at least 1ms, got {:?}",
                self.window
            )));
        }
        if self.store_timeout.is_zero() {
            return Err(SlidewireError::InvalidConfiguration(
                "store timeout must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in whole milliseconds.
    pub fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = LimitPolicy::new(10, Duration::from_secs(1)).unwrap();
        assert_eq!(policy.limit(), 10);
        assert_eq!(policy.window_ms(), 1000);
        assert_eq!(policy.consistency(), Consistency::Relaxed);
        assert_eq!(policy.store_timeout(), DEFAULT_STORE_TIMEOUT);
    }

    #[test]
    fn test_zero_limit_is_invalid() {
        let err = LimitPolicy::new(0, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SlidewireError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_zero_and_sub_millisecond_window_invalid() {
        assert!(LimitPolicy::new(1, Duration::ZERO).is_err());
        assert!(LimitPolicy::new(1, Duration::from_micros(500)).is_err());
        assert!(LimitPolicy::new(1, Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_zero_store_timeout_invalid() {
        let result = LimitPolicy::new(1, Duration::from_secs(1))
            .unwrap()
            .with_store_timeout(Duration::ZERO)
            .validated();
        assert!(result.is_err());
    }
}
