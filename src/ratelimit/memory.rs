//! In-process counter store.
//!
//! Counters live in a concurrent map and expire lazily when touched. Useful
//! for tests and single-instance deployments; counts are not shared between
//! processes.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::store::{CounterStore, Ttl};
use crate::error::Result;

#[derive(Debug, Default)]
struct Slot {
    count: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A [`CounterStore`] held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<DashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired counter. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.slots.len())
    }

    /// Number of counters held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_default();
        if slot.is_expired(now) {
            *slot = Slot::default();
        }
        slot.count += 1;
        Ok(slot.count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let now = Instant::now();
        match self.slots.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                slot.expires_at = Some(now + Duration::from_secs(seconds));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        let now = Instant::now();
        let Some(slot) = self.slots.get(key) else {
            return Ok(Ttl::Missing);
        };

        Ok(match slot.expires_at {
            None => Ttl::Persistent,
            Some(at) if at <= now => Ttl::Missing,
            Some(at) => {
                // Round up so a fresh window reports its full length.
                let left = at - now;
                let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
                Ttl::Expires(secs)
            }
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .slots
            .remove(key)
            .is_some_and(|(_, slot)| !slot.is_expired(now)))
    }

    async fn hit(&self, key: &str, window: u64) -> Result<u64> {
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_default();
        if slot.is_expired(now) {
            *slot = Slot::default();
        }
        slot.count += 1;
        if slot.count == 1 || slot.expires_at.is_none() {
            slot.expires_at = Some(now + Duration::from_secs(window));
        }
        Ok(slot.count)
    }
}
