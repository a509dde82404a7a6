//! Error types for the Slidewire service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Slidewire operations.
///
/// A request that exceeds its limit is not an error: it comes back as a
/// rejected [`Decision`](crate::ratelimit::Decision). Errors here mean the
/// limiter could not evaluate the request at all, or could not be built.
#[derive(Error, Debug)]
pub enum SlidewireError {
    /// Limiter or service configuration is unusable. Raised at startup only.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The window store failed or timed out; the evaluation fails closed.
    #[error("Window store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SlidewireError {
    /// Returns `true` when the error came from the shared store.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, SlidewireError::StoreUnavailable(_))
    }
}

/// Result type alias for Slidewire operations.
pub type Result<T> = std::result::Result<T, SlidewireError>;
