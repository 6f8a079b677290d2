//! Latest-State Cache
//!
//! Concurrent map from instrument symbol to its latest `MarketSnapshot`.
//!
//! # Concurrency
//!
//! A single `RwLock` guards the whole map. Writes are at most one per
//! symbol per upstream tick, so readers (fan-out, control surface,
//! persistence flusher) dominate. Lock hold times are limited to a map
//! insert or clone; no I/O happens under the lock.
//!
//! # Ordering
//!
//! With `StalenessPolicy::RejectOlder` the per-symbol timestamp never goes
//! backwards: an update strictly older than the cached snapshot is
//! rejected. Equal timestamps replace the cached value.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::streaming::MarketSnapshot;

// =============================================================================
// Types
// =============================================================================

/// How the cache treats updates older than the cached snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalenessPolicy {
    /// Reject updates whose timestamp is older than the cached one.
    #[default]
    RejectOlder,
    /// Always replace the cached snapshot.
    LastWriteWins,
}

impl StalenessPolicy {
    /// Parse a policy name, falling back to `RejectOlder`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "last_write_wins" | "lww" => Self::LastWriteWins,
            _ => Self::RejectOlder,
        }
    }

    /// Policy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RejectOlder => "reject_older",
            Self::LastWriteWins => "last_write_wins",
        }
    }
}

/// Outcome of a cache update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    /// First snapshot for this symbol.
    Inserted,
    /// An existing snapshot was replaced.
    Replaced,
    /// The update was older than the cached snapshot and was discarded.
    Stale,
}

impl CacheUpdate {
    /// Whether the update changed the cache.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        !matches!(self, Self::Stale)
    }
}

// =============================================================================
// State Cache
// =============================================================================

/// Symbol to latest snapshot map.
#[derive(Debug, Default)]
pub struct StateCache {
    entries: RwLock<HashMap<String, MarketSnapshot>>,
    policy: StalenessPolicy,
}

impl StateCache {
    /// Create an empty cache with the default staleness policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache with a specific staleness policy.
    #[must_use]
    pub fn with_policy(policy: StalenessPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Configured staleness policy.
    #[must_use]
    pub const fn policy(&self) -> StalenessPolicy {
        self.policy
    }

    /// Store the latest snapshot for `snapshot.symbol`.
    pub fn update(&self, snapshot: MarketSnapshot) -> CacheUpdate {
        let mut entries = self.entries.write();

        match entries.get_mut(&snapshot.symbol) {
            None => {
                entries.insert(snapshot.symbol.clone(), snapshot);
                CacheUpdate::Inserted
            }
            Some(current) => {
                if self.policy == StalenessPolicy::RejectOlder
                    && snapshot.timestamp < current.timestamp
                {
                    return CacheUpdate::Stale;
                }
                *current = snapshot;
                CacheUpdate::Replaced
            }
        }
    }

    /// Get the snapshot for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.entries.read().get(symbol).cloned()
    }

    /// Copy of every cached snapshot.
    #[must_use]
    pub fn list_all(&self) -> HashMap<String, MarketSnapshot> {
        self.entries.read().clone()
    }

    /// Cached symbols, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.entries.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Number of cached symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
