//! Slidewire - Distributed Sliding-Window Rate Limiter
//!
//! This crate throttles per-client request rates against a shared store
//! holding one sorted set of arrival timestamps per client. Every process
//! pointed at the same store enforces the same limits, and the limiter
//! itself keeps no per-client state.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
