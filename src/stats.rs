//! Allow/deny accounting for the connection filter
//!
//! One [`StatsRegistry`] is created per gateway and shared by every
//! connection task. Counters only ever grow; each terminal decision bumps
//! exactly one of `allowed` / `denied`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Terminal outcome of one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Connection was passed through to the upstream
    Allowed,
    /// Connection was closed
    Denied,
}

/// Process-wide decision counters
#[derive(Debug)]
pub struct StatsRegistry {
    /// Prefix used when publishing named stats
    prefix: String,
    /// Connections permitted
    allowed: AtomicU64,
    /// Connections denied
    denied: AtomicU64,
    /// Verdicts served from the decision cache
    cache_hits: AtomicU64,
    /// Decisions that had to call the Authorize endpoint
    cache_misses: AtomicU64,
}

impl StatsRegistry {
    /// Create a registry with all counters at zero
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Record a terminal decision
    pub fn increment(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Allowed => &self.allowed,
            Outcome::Denied => &self.denied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decision cache lookup
    pub fn record_cache_lookup(&self, hit: bool) {
        let counter = if hit { &self.cache_hits } else { &self.cache_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current allow/deny totals
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
        }
    }

    /// Every counter under its published name, e.g. `connect_authz.allowed`
    pub fn named(&self) -> Vec<NamedStat> {
        [
            ("allowed", &self.allowed),
            ("denied", &self.denied),
            ("cache_hits", &self.cache_hits),
            ("cache_misses", &self.cache_misses),
        ]
        .into_iter()
        .map(|(name, counter)| NamedStat {
            name: format!("{}.{name}", self.prefix),
            value: counter.load(Ordering::Relaxed),
        })
        .collect()
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new("connect_authz")
    }
}

/// Allow/deny totals at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Connections permitted
    pub allowed: u64,
    /// Connections denied
    pub denied: u64,
}

impl StatsSnapshot {
    /// Number of connection attempts that reached a terminal state
    #[must_use]
    pub fn total(&self) -> u64 {
        self.allowed + self.denied
    }
}

/// One published counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedStat {
    /// Fully prefixed name
    pub name: String,
    /// Counter value
    pub value: u64,
}
