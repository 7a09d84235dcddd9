//! Rate limiting logic and counter storage.

mod address;
mod key;
mod limiter;
mod memory;
mod redis_store;
mod rules;
mod store;

pub use address::{peer_addr, AddressSource};
pub use key::{CounterKey, DEFAULT_NAMESPACE};
pub use limiter::{Decision, RateLimiter};
pub use memory::MemoryStore;
pub use redis_store::{RedisStore, REDIS_URL_ENV};
pub use rules::{Limit, RateLimitRules};
pub use store::{CounterStore, Ttl};
