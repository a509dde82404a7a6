//! Sliding-window rate limiting over a shared store.

mod backend;
mod decision;
mod key;
mod limiter;
mod member;
mod policy;

pub use backend::RateLimiterBackend;
pub use decision::Decision;
pub use key::ClientKey;
pub use limiter::{retry_after_secs, RateLimiter};
pub use member::MemberGenerator;
pub use policy::{Consistency, LimitPolicy};
