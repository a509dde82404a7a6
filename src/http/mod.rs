//! HTTP boundary: resolves the client, applies the limiter, and maps
//! decisions to status codes and headers.

mod client;
mod middleware;
mod server;

pub use client::ClientResolver;
pub use middleware::{rate_limit, RateLimitState};
pub use server::{router, HttpServer};
