//! Per-request rate limit decisions.

use serde::Serialize;

/// Outcome of evaluating one request. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Seconds until the oldest arrival leaves the window; zero when admitted
    pub retry_after_secs: u64,
    /// Arrivals in the window, this one included
    pub observed_count: u64,
    /// The limit the count was compared against
    pub limit: u64,
}

impl Decision {
    pub fn admitted(observed_count: u64, limit: u64) -> Self {
        Self {
            admitted: true,
            retry_after_secs: 0,
            observed_count,
            limit,
        }
    }

    /// A rate-exceeded rejection.
    pub fn rejected(observed_count: u64, limit: u64, retry_after_secs: u64) -> Self {
        Self {
            admitted: false,
            retry_after_secs,
            observed_count,
            limit,
        }
    }

    /// Arrivals still available in the current window.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.observed_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admitted_remaining() {
        let decision = Decision::admitted(3, 10);
        assert_eq!(decision.remaining(), 7);
        assert_eq!(decision.retry_after_secs, 0);
        assert!(decision.admitted);
    }

    #[test]
    fn test_rejected_remaining_saturates() {
        let decision = Decision::rejected(12, 10, 1);
        assert_eq!(decision.remaining(), 0);
        assert_eq!(decision.retry_after_secs, 1);
        assert!(!decision.admitted);
    }
}
