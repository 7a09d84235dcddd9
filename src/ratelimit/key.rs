//! Counting key generation.

use std::fmt;

/// Default first segment of every counting key.
pub const DEFAULT_NAMESPACE: &str = "turnstile";

/// A key that uniquely identifies one client's counter for one route.
///
/// Rendered as `<namespace>:(<client>)<method><path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey<'a> {
    pub namespace: &'a str,
    pub client: &'a str,
    pub method: &'a str,
    pub path: &'a str,
}

impl<'a> CounterKey<'a> {
    pub fn new(namespace: &'a str, client: &'a str, method: &'a str, path: &'a str) -> Self {
        Self {
            namespace,
            client,
            method,
            path,
        }
    }
}

impl fmt::Display for CounterKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:({}){}{}",
            self.namespace, self.client, self.method, self.path
        )
    }
}
