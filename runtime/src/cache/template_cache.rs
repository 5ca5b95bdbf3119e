//! Shared in-memory cache with two expiry tiers and size-bounded eviction.
//!
//! Entries keyed by mutable references (tags) use the short tier; entries
//! keyed by digests use the long tier; bundled default templates are pinned.
//! Values are `Arc`-shared and replaced wholesale, never mutated in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fhir_templates_core::config::EngineConfig;
use parking_lot::RwLock;

use super::clock::{Clock, SystemClock};

/// How long an entry stays cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Short expiry, for content addressed by a mutable reference
    Short,
    /// Long expiry (or none), for content addressed by digest
    Long,
    /// Never expires and is never evicted
    Pinned,
}

/// Expiry and size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub short_ttl: Duration,
    /// `None` means long-tier entries never expire
    pub long_ttl: Option<Duration>,
    pub size_limit: u64,
}

impl CachePolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            short_ttl: config.short_ttl(),
            long_ttl: config.long_ttl(),
            size_limit: config.cache_size_limit_bytes,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

struct Entry<V> {
    value: Arc<V>,
    size: u64,
    retention: Retention,
    expires_at: Option<DateTime<Utc>>,
    inserted: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    total_size: u64,
    next_insert: u64,
}

/// Expiring cache shared between concurrent resolvers.
pub struct TemplateCache<V> {
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    inner: RwLock<Inner<V>>,
}

impl<V> TemplateCache<V> {
    pub fn new(policy: CachePolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                total_size: 0,
                next_insert: 0,
            }),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Look up `key`, dropping the entry if it has expired.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let now = self.clock.now();
        {
            let inner = self.inner.read();
            match inner.entries.get(key) {
                None => return None,
                Some(entry) if !is_expired(entry, now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut inner = self.inner.write();
        // Another writer may have replaced the entry in the meantime.
        if inner.entries.get(key).is_some_and(|e| is_expired(e, now)) {
            inner.remove(key);
            tracing::debug!(key, "Cache entry expired");
            return None;
        }
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert `value` under `key`, replacing any previous entry, then evict
    /// down to the size limit. Returns the shared value.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: V,
        size: u64,
        retention: Retention,
    ) -> Arc<V> {
        self.insert_shared(key, Arc::new(value), size, retention)
    }

    pub fn insert_shared(
        &self,
        key: impl Into<String>,
        value: Arc<V>,
        size: u64,
        retention: Retention,
    ) -> Arc<V> {
        let key = key.into();
        let now = self.clock.now();
        let expires_at = match retention {
            Retention::Short => deadline(now, Some(self.policy.short_ttl)),
            Retention::Long => deadline(now, self.policy.long_ttl),
            Retention::Pinned => None,
        };

        let mut inner = self.inner.write();
        inner.remove(&key);
        let inserted = inner.next_insert;
        inner.next_insert += 1;
        inner.total_size += size;
        inner.entries.insert(
            key.clone(),
            Entry {
                value: value.clone(),
                size,
                retention,
                expires_at,
                inserted,
            },
        );
        tracing::debug!(key = %key, size, retention = ?retention, "Cached entry");

        if inner.total_size > self.policy.size_limit {
            inner.purge_expired(now);
            inner.evict_to(self.policy.size_limit);
        }
        value
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.write().remove(key)
    }

    /// Drop every non-pinned entry.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.retention != Retention::Pinned)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            inner.remove(&key);
        }
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.inner.write().purge_expired(now)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed size of the cached entries.
    pub fn total_size(&self) -> u64 {
        self.inner.read().total_size
    }
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total_size = self.total_size.saturating_sub(entry.size);
                true
            }
            None => false,
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Evict non-pinned entries, earliest expiry first, then oldest insertion.
    fn evict_to(&mut self, limit: u64) {
        let mut candidates: Vec<(Option<DateTime<Utc>>, u64, String)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.retention != Retention::Pinned)
            .map(|(k, e)| (e.expires_at, e.inserted, k.clone()))
            .collect();
        // Entries that never expire go last.
        candidates.sort_by(|a, b| {
            let a_key = (a.0.is_none(), a.0, a.1);
            let b_key = (b.0.is_none(), b.0, b.1);
            a_key.cmp(&b_key)
        });

        for (_, _, key) in candidates {
            if self.total_size <= limit {
                break;
            }
            self.remove(&key);
            tracing::debug!(key = %key, "Evicted cache entry");
        }
    }
}

fn is_expired<V>(entry: &Entry<V>, now: DateTime<Utc>) -> bool {
    entry.expires_at.is_some_and(|at| at <= now)
}

fn deadline(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    now.checked_add_signed(ttl)
}
