//! Rate limit rules and route matching.
//!
//! Rules are keyed by HTTP method and exact path. The table is built once and
//! never mutated afterwards, so lookups need no locking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, TurnstileError};

/// A limit applied to one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// HTTP method to limit, e.g. `GET`. Matched exactly.
    pub method: String,
    /// Request path to limit. Matched exactly, no patterns.
    pub path: String,
    /// Requests allowed per window before limiting begins.
    pub requests: u64,
    /// Window length in seconds.
    pub duration: u64,
}

impl Limit {
    pub fn new(method: impl Into<String>, path: impl Into<String>, requests: u64, duration: u64) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            requests,
            duration,
        }
    }

    /// The window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    fn route_key(&self) -> String {
        route_key(&self.method, &self.path)
    }

    fn validate(&self) -> Result<()> {
        if self.requests == 0 {
            return Err(TurnstileError::Config(format!(
                "limit for {} {} must allow at least one request",
                self.method, self.path
            )));
        }
        if self.duration == 0 {
            return Err(TurnstileError::Config(format!(
                "limit for {} {} must have a window of at least one second",
                self.method, self.path
            )));
        }
        Ok(())
    }
}

fn route_key(method: &str, path: &str) -> String {
    format!("{}:{}", method, path)
}

/// Immutable mapping from `(method, path)` to its [`Limit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitRules {
    rules: HashMap<String, Limit>,
}

impl RateLimitRules {
    /// Build the table from an ordered list of limits.
    ///
    /// When two limits share a method and path the later one replaces the
    /// earlier one. Use [`RateLimitRules::try_build`] to reject that instead.
    pub fn build<I>(limits: I) -> Self
    where
        I: IntoIterator<Item = Limit>,
    {
        let mut rules = HashMap::new();
        for limit in limits {
            if let Some(previous) = rules.insert(limit.route_key(), limit) {
                warn!(
                    method = %previous.method,
                    path = %previous.path,
                    "Duplicate rate limit rule replaced by a later one"
                );
            }
        }
        Self { rules }
    }

    /// Build the table, rejecting duplicate routes and empty quotas or windows.
    pub fn try_build<I>(limits: I) -> Result<Self>
    where
        I: IntoIterator<Item = Limit>,
    {
        let mut rules = HashMap::new();
        for limit in limits {
            limit.validate()?;
            let key = limit.route_key();
            if rules.contains_key(&key) {
                return Err(TurnstileError::Config(format!(
                    "duplicate rate limit rule for {} {}",
                    limit.method, limit.path
                )));
            }
            rules.insert(key, limit);
        }
        Ok(Self { rules })
    }

    /// Find the limit configured for a method and path.
    pub fn lookup(&self, method: &str, path: &str) -> Option<&Limit> {
        self.rules.get(&route_key(method, path))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Limit> {
        self.rules.values()
    }
}
