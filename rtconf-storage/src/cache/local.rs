//! Per-process local cache of configuration values.
//!
//! A single mutex guards the whole map: reads and writes are serialized.
//! Entries never expire on their own. The only ways out are an explicit
//! [`LocalCache::evict`] and [`LocalCache::clear`], both driven by the
//! invalidation subscriber.

use rtconf_core::{ConfigKey, ConfigValue};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<ConfigKey, ConfigValue>,
    /// Incremented by every eviction.
    evictions: u64,
}

/// Proof of a cache miss, used to populate the cache after a store read.
///
/// A fill is rejected if any eviction happened between the miss and the
/// fill: the value read from the store may predate the change that
/// triggered that eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket {
    evictions: u64,
}

/// Key to last-known-value map for one process.
#[derive(Debug, Default)]
pub struct LocalCache {
    state: Mutex<CacheState>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached value for `key`, if any.
    pub fn lookup(&self, key: &ConfigKey) -> Option<ConfigValue> {
        self.state().entries.get(key).cloned()
    }

    /// Cached value for `key`, or a ticket to fill it after a store read.
    pub fn lookup_for_fill(&self, key: &ConfigKey) -> Result<ConfigValue, FillTicket> {
        let state = self.state();
        match state.entries.get(key) {
            Some(value) => Ok(value.clone()),
            None => Err(FillTicket {
                evictions: state.evictions,
            }),
        }
    }

    /// Insert or replace the value for `key`.
    pub fn store(&self, key: ConfigKey, value: ConfigValue) {
        self.state().entries.insert(key, value);
    }

    /// Insert the value for `key` unless an eviction happened since `ticket`
    /// was issued. Returns whether the value was cached.
    pub fn fill(&self, key: ConfigKey, value: ConfigValue, ticket: FillTicket) -> bool {
        let mut state = self.state();
        if state.evictions != ticket.evictions {
            return false;
        }
        state.entries.insert(key, value);
        true
    }

    /// Remove `key`, returning the evicted value. Evicting an absent key is a no-op.
    pub fn evict(&self, key: &ConfigKey) -> Option<ConfigValue> {
        let mut state = self.state();
        state.evictions = state.evictions.wrapping_add(1);
        state.entries.remove(key)
    }

    /// Drop every entry, returning how many were removed.
    ///
    /// Counts as an eviction, so fills started before the clear are rejected.
    pub fn clear(&self) -> usize {
        let mut state = self.state();
        state.evictions = state.evictions.wrapping_add(1);
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    pub fn contains(&self, key: &ConfigKey) -> bool {
        self.state().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Cached keys, sorted.
    pub fn keys(&self) -> Vec<ConfigKey> {
        let mut keys: Vec<ConfigKey> = self.state().entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

// =============================================================================
// TESTS
// =============================================================================
