//! Turnstile - Distributed Fixed-Window HTTP Rate Limiting
//!
//! This crate implements HTTP rate limiting middleware. Each limited route
//! gets a quota per time window, counted per client address in a shared
//! counter store (usually Redis) so that every instance enforces the same
//! limits.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

pub use error::{Result, TurnstileError};
pub use http::{HttpLimiter, HttpServer};
pub use ratelimit::{AddressSource, CounterStore, Decision, Limit, MemoryStore, RedisStore};
