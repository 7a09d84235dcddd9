//! HTTP middleware and server.

mod server;
mod service;

pub use server::HttpServer;
pub use service::{rate_limit, HttpLimiter, TOO_MANY_REQUESTS_BODY};
