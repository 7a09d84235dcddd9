//! Fixed-window rate limit decisions.

use std::sync::Arc;
use tracing::{debug, info, trace};

use super::key::{CounterKey, DEFAULT_NAMESPACE};
use super::rules::Limit;
use super::store::CounterStore;
use crate::error::Result;

/// Outcome of counting one request against a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request fits in the current window.
    Admit {
        /// Configured quota for the route.
        limit: u64,
        /// Requests left in the current window.
        remaining: u64,
    },
    /// The window's quota is used up.
    Reject {
        /// Configured quota for the route.
        limit: u64,
        /// Seconds until the window resets.
        retry_after: u64,
    },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit { .. })
    }

    pub fn limit(&self) -> u64 {
        match *self {
            Decision::Admit { limit, .. } | Decision::Reject { limit, .. } => limit,
        }
    }

    pub fn remaining(&self) -> u64 {
        match *self {
            Decision::Admit { remaining, .. } => remaining,
            Decision::Reject { .. } => 0,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match *self {
            Decision::Admit { .. } => None,
            Decision::Reject { retry_after, .. } => Some(retry_after),
        }
    }
}

/// Counts requests in a shared store and decides whether they are admitted.
///
/// Holds no per-request state. Ordering between concurrent requests for the
/// same key comes entirely from the store's atomic increment.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    namespace: String,
}

impl RateLimiter {
    /// Create a rate limiter using the default key namespace.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_namespace(store, DEFAULT_NAMESPACE)
    }

    /// Create a rate limiter whose keys start with `namespace`.
    pub fn with_namespace(store: Arc<dyn CounterStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The counter store shared by this limiter.
    pub fn store(&self) -> Arc<dyn CounterStore> {
        Arc::clone(&self.store)
    }

    /// The counting key for a client on a limited route.
    pub fn key_for(&self, limit: &Limit, client: &str) -> String {
        CounterKey::new(&self.namespace, client, &limit.method, &limit.path).to_string()
    }

    /// Count one request from `client` against `limit`.
    ///
    /// Store failures are returned as-is and nothing is retried. A request
    /// that is later abandoned still consumes its slot in the window.
    pub async fn check(&self, limit: &Limit, client: &str) -> Result<Decision> {
        let key = self.key_for(limit, client);

        trace!(key = %key, "Checking rate limit");

        let count = self.store.hit(&key, limit.duration).await?;

        if count > limit.requests {
            // Unknown TTL reports the full window.
            let ttl = self.store.ttl(&key).await?;
            let retry_after = ttl
                .seconds()
                .map_or(limit.duration, |secs| secs.min(limit.duration));

            info!(
                key = %key,
                count = count,
                limit = limit.requests,
                retry_after = retry_after,
                "Limiting request"
            );

            return Ok(Decision::Reject {
                limit: limit.requests,
                retry_after,
            });
        }

        let remaining = limit.requests.saturating_sub(count);
        debug!(key = %key, count = count, remaining = remaining, "Request admitted");

        Ok(Decision::Admit {
            limit: limit.requests,
            remaining,
        })
    }

    /// Clear a client's window for a route. Returns `true` if a counter existed.
    pub async fn reset(&self, limit: &Limit, client: &str) -> Result<bool> {
        let key = self.key_for(limit, client);
        self.store.delete(&key).await
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
