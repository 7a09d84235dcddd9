//! Counter store abstraction.

use async_trait::async_trait;

use crate::error::Result;

/// Remaining lifetime of a key as reported by a counter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key expires after this many seconds.
    Expires(u64),
    /// The key exists but has no expiry armed.
    Persistent,
    /// The key does not exist.
    Missing,
}

impl Ttl {
    /// Convert the integer reply of a Redis `TTL` command.
    pub fn from_reply(reply: i64) -> Self {
        match reply {
            -1 => Ttl::Persistent,
            n if n < 0 => Ttl::Missing,
            n => Ttl::Expires(n as u64),
        }
    }

    /// Seconds until expiry, if an expiry is known.
    pub fn seconds(self) -> Option<u64> {
        match self {
            Ttl::Expires(secs) => Some(secs),
            Ttl::Persistent | Ttl::Missing => None,
        }
    }
}

/// Shared storage for fixed-window counters.
///
/// Implementations must be safe to use from many in-flight requests at once,
/// and `incr` must be atomic: concurrent callers on the same key observe
/// strictly increasing, distinct counts.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one, creating it at zero first if absent.
    async fn incr(&self, key: &str) -> Result<u64>;

    /// Arm a time-to-live on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool>;

    /// Time remaining until `key` expires.
    async fn ttl(&self, key: &str) -> Result<Ttl>;

    /// Remove `key`. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Count one hit against `key`, arming a `window` second expiry when the
    /// hit opens a new window.
    ///
    /// The default is two separate calls. A key created by `incr` stays
    /// without a TTL until `expire` lands, and stays that way forever if the
    /// process dies in between. Stores with a transactional or scripted
    /// primitive should override this with a single atomic operation.
    async fn hit(&self, key: &str, window: u64) -> Result<u64> {
        let count = self.incr(key).await?;
        if count == 1 {
            self.expire(key, window).await?;
        }
        Ok(count)
    }
}
