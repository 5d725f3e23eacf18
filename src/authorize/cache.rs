//! Short-lived verdict cache.
//!
//! Keyed by client URI and target, plus the certificate serial when
//! `include_serial` is set. Only verdicts actually returned by the Authorize
//! endpoint are stored; failures are never cached, so a deny caused by an
//! outage does not outlive the outage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::AuthorizationVerdict;
use crate::config::CacheConfig;
use crate::mtls::ClientIdentity;

/// Identity of one cached decision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    uri: String,
    target: String,
    serial: Option<String>,
}

/// A verdict with the instant it was stored
struct CachedVerdict {
    verdict: AuthorizationVerdict,
    cached_at: Instant,
}

impl CachedVerdict {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

/// Thread-safe verdict cache with TTL expiry and a size bound
pub struct DecisionCache {
    entries: DashMap<CacheKey, CachedVerdict>,
    ttl: Duration,
    max_entries: usize,
    include_serial: bool,
    evictions: AtomicU64,
}

impl DecisionCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize, include_serial: bool) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
            include_serial,
            evictions: AtomicU64::new(0),
        }
    }

    /// Create from the `cache` config section
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl, config.max_entries, config.include_serial)
    }

    /// How long a verdict may be reused
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Unexpired verdict for this identity and target, if any.
    ///
    /// Expired entries are evicted on the way.
    pub fn get(&self, identity: &ClientIdentity, target: &str) -> Option<AuthorizationVerdict> {
        let key = self.key(identity, target);
        let entry = self.entries.get(&key)?;
        if entry.is_expired(self.ttl) {
            drop(entry);
            if self
                .entries
                .remove_if(&key, |_, cached| cached.is_expired(self.ttl))
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        }
        Some(entry.verdict.clone())
    }

    /// Store a verdict returned by the Authorize endpoint.
    ///
    /// Returns `false` when the cache is full and the verdict was dropped.
    pub fn insert(
        &self,
        identity: &ClientIdentity,
        target: &str,
        verdict: AuthorizationVerdict,
    ) -> bool {
        let key = self.key(identity, target);
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_expired();
            if self.entries.len() >= self.max_entries {
                return false;
            }
        }
        self.entries.insert(
            key,
            CachedVerdict {
                verdict,
                cached_at: Instant::now(),
            },
        );
        true
    }

    /// Number of stored verdicts, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no verdicts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total entries removed because they expired
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Evict expired entries (background maintenance)
    pub fn evict_expired(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, cached| !cached.is_expired(self.ttl));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
    }

    fn key(&self, identity: &ClientIdentity, target: &str) -> CacheKey {
        CacheKey {
            uri: identity.uri.clone(),
            target: target.to_string(),
            serial: self.include_serial.then(|| identity.serial.clone()),
        }
    }
}
