//! Keyed payload store with TTL, stale reads, tags and bounded size.
//!
//! # Freshness
//!
//! Every entry carries its own TTL. A read with `allow_stale = false` only
//! returns entries younger than that TTL. A read with `allow_stale = true`
//! also returns older entries, flagged stale, until the entry passes
//! `TTL × grace_multiplier`. Past that point the entry is gone: moka expires
//! it through a per-entry [`Expiry`] policy, and reads re-check the age so an
//! entry awaiting housekeeping is never served.
//!
//! # Eviction
//!
//! Capacity is enforced by the store rather than by moka's admission policy,
//! because eviction must be strictly oldest-creation-first. Writes are
//! serialised under a short lock; after each insert the oldest entries are
//! invalidated until the count is back at `max_entries`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use tracing::debug;

use crate::telemetry;
use crate::types::{CacheKey, Payload, Provider};
use crate::{FetchError, Result};

/// Configuration for the cache store.
///
/// ```rust
/// # use cloudfetch::CacheConfig;
/// let config = CacheConfig::new().max_entries(100).grace_multiplier(6);
/// assert_eq!(config.max_entries, 100);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of live entries. Default: 50.
    pub max_entries: u64,
    /// Entries older than `ttl × grace_multiplier` can no longer be served,
    /// not even as stale fallback. Default: 4.
    pub grace_multiplier: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            grace_multiplier: 4,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    pub fn grace_multiplier(mut self, m: u32) -> Self {
        self.grace_multiplier = m;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(FetchError::Configuration(
                "cache max_entries must be greater than zero".into(),
            ));
        }
        if self.grace_multiplier == 0 {
            return Err(FetchError::Configuration(
                "cache grace_multiplier must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// One stored payload.
///
/// Read-only after creation apart from the last-served-stale marker.
#[derive(Debug)]
pub struct CacheEntry {
    key: CacheKey,
    payload: Payload,
    created_at: Instant,
    ttl: Duration,
    tags: Vec<String>,
    seq: u64,
    last_served_stale_at: Mutex<Option<Instant>>,
}

impl CacheEntry {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_stale(&self) -> bool {
        self.age() >= self.ttl
    }

    /// When this entry was last handed out as stale data, if ever.
    pub fn last_served_stale_at(&self) -> Option<Instant> {
        *self
            .last_served_stale_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn mark_served_stale(&self) {
        *self
            .last_served_stale_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }
}

/// A successful cache read.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: Payload,
    pub age: Duration,
    pub ttl: Duration,
    pub is_stale: bool,
    pub tags: Vec<String>,
}

/// Point-in-time counters for a [`CacheStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub insertions: u64,
    /// Entries removed to stay within `max_entries`.
    pub evictions: u64,
    /// Entries removed after passing their grace window.
    pub expirations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Time moka keeps an entry after its grace window ends. Until then
/// [`CacheStore::evict`] removes and counts it.
const RECLAIM_SLACK: Duration = Duration::from_secs(60);

/// Reclaim each entry [`RECLAIM_SLACK`] after it passes `ttl × multiplier`.
struct GraceExpiry {
    multiplier: u32,
}

impl GraceExpiry {
    fn lifetime(&self, entry: &CacheEntry) -> Duration {
        entry
            .ttl
            .saturating_mul(self.multiplier)
            .saturating_add(RECLAIM_SLACK)
    }
}

impl Expiry<CacheKey, Arc<CacheEntry>> for GraceExpiry {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.lifetime(value))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.lifetime(value))
    }
}

/// Thread-safe payload cache shared by every request in the process.
pub struct CacheStore {
    entries: Cache<CacheKey, Arc<CacheEntry>>,
    config: CacheConfig,
    write_lock: Mutex<()>,
    next_seq: AtomicU64,
    counters: Arc<Counters>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        let counters = Arc::new(Counters::default());
        let listener_counters = Arc::clone(&counters);
        let entries: Cache<CacheKey, Arc<CacheEntry>> = Cache::builder()
            .expire_after(GraceExpiry {
                multiplier: config.grace_multiplier,
            })
            .eviction_listener(
                move |key: Arc<CacheKey>, _value: Arc<CacheEntry>, cause: RemovalCause| {
                    if cause == RemovalCause::Expired {
                        listener_counters.expirations.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "reason" => "expired")
                            .increment(1);
                        debug!(key = %key, "cache entry passed grace window");
                    }
                },
            )
            .build();
        Self {
            entries,
            config,
            write_lock: Mutex::new(()),
            next_seq: AtomicU64::new(0),
            counters,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up `key`.
    ///
    /// With `allow_stale = false` only entries younger than their TTL are
    /// returned. With `allow_stale = true` expired entries are returned too,
    /// marked stale, until their grace window ends.
    pub fn get(&self, key: &CacheKey, allow_stale: bool) -> Option<CacheHit> {
        self.lookup(key, allow_stale, true)
    }

    /// Fresh-only lookup that leaves hit and miss counters untouched.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheHit> {
        self.lookup(key, false, false)
    }

    fn lookup(&self, key: &CacheKey, allow_stale: bool, record: bool) -> Option<CacheHit> {
        let found = self.entries.get(key).filter(|entry| self.within_grace(entry));
        let (provider, service) = (key.provider().as_str(), key.service().as_str());

        let Some(entry) = found else {
            if record && !allow_stale {
                self.record_miss(provider, service);
            }
            return None;
        };

        let age = entry.age();
        let is_stale = age >= entry.ttl;
        if is_stale && !allow_stale {
            if record {
                self.record_miss(provider, service);
            }
            return None;
        }

        if is_stale {
            entry.mark_served_stale();
            self.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
        } else if record && !allow_stale {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_HITS_TOTAL,
                "provider" => provider,
                "service" => service,
            )
            .increment(1);
        }

        Some(CacheHit {
            payload: Arc::clone(&entry.payload),
            age,
            ttl: entry.ttl,
            is_stale,
            tags: entry.tags.clone(),
        })
    }

    /// Store `payload` under `key`, replacing any existing entry and
    /// resetting its creation time. Evicts the oldest entries if the store is
    /// over capacity afterwards.
    pub fn set(&self, key: CacheKey, payload: Payload, ttl: Duration, tags: Vec<String>) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            payload,
            created_at: Instant::now(),
            ttl,
            tags,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            last_served_stale_at: Mutex::new(None),
        });
        self.entries.insert(key, entry);
        self.counters.insertions.fetch_add(1, Ordering::Relaxed);
        self.sweep();
    }

    /// Sweep entries past their grace window, then trim to `max_entries`.
    ///
    /// Returns how many entries were removed, counting both expirations and
    /// capacity evictions.
    pub fn evict(&self) -> usize {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let removed = self.sweep();
        self.entries.run_pending_tasks();
        removed
    }

    /// Remove one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry carrying `tag`. Returns the number removed.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        self.invalidate_where(|entry| entry.tags.iter().any(|t| t == tag))
    }

    /// Remove every entry for `provider`. Returns the number removed.
    pub fn invalidate_provider(&self, provider: Provider) -> usize {
        self.invalidate_where(|entry| entry.key.provider() == provider)
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    /// Number of entries currently stored, including stale ones still inside
    /// their grace window.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, entry)| self.within_grace(entry))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently stored, oldest first.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut live: Vec<(u64, CacheKey)> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.within_grace(entry))
            .map(|(key, entry)| (entry.seq, CacheKey::clone(&key)))
            .collect();
        live.sort_unstable_by_key(|(seq, _)| *seq);
        live.into_iter().map(|(_, key)| key).collect()
    }

    /// The raw entry for `key`, regardless of freshness.
    pub fn entry(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).filter(|entry| self.within_grace(entry))
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            stale_hits: c.stale_hits.load(Ordering::Relaxed),
            insertions: c.insertions.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
        }
    }

    fn within_grace(&self, entry: &CacheEntry) -> bool {
        entry.age() < entry.ttl.saturating_mul(self.config.grace_multiplier)
    }

    fn record_miss(&self, provider: &'static str, service: &'static str) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL,
            "provider" => provider,
            "service" => service,
        )
        .increment(1);
    }

    /// Remove every entry matching `pred`, returning how many of them were
    /// still inside their grace window.
    fn invalidate_where(&self, pred: impl Fn(&CacheEntry) -> bool) -> usize {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let doomed: Vec<(CacheKey, bool)> = self
            .entries
            .iter()
            .filter(|(_, entry)| pred(entry))
            .map(|(key, entry)| (CacheKey::clone(&key), self.within_grace(&entry)))
            .collect();
        for (key, _) in &doomed {
            self.entries.invalidate(key);
        }
        doomed.iter().filter(|(_, live)| *live).count()
    }

    /// Drop entries past their grace window, then the oldest-created live
    /// entries until at most `max_entries` remain. Caller holds `write_lock`.
    fn sweep(&self) -> usize {
        let (mut live, expired): (Vec<_>, Vec<_>) = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.seq, CacheKey::clone(&key), self.within_grace(&entry)))
            .partition(|(_, _, live)| *live);

        for (_, key, _) in &expired {
            self.entries.invalidate(key);
            debug!(key = %key, "cache entry passed grace window");
        }
        if !expired.is_empty() {
            self.counters
                .expirations
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "reason" => "expired")
                .increment(expired.len() as u64);
        }

        let max = self.config.max_entries as usize;
        if live.len() <= max {
            return expired.len();
        }

        live.sort_unstable_by_key(|(seq, _, _)| *seq);
        let excess = live.len() - max;
        for (_, key, _) in live.iter().take(excess) {
            self.entries.invalidate(key);
            debug!(key = %key, "evicted oldest cache entry");
        }
        self.counters
            .evictions
            .fetch_add(excess as u64, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "reason" => "capacity")
            .increment(excess as u64);
        expired.len() + excess
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceType;

    fn key(region: &str) -> CacheKey {
        CacheKey::new(Provider::Aws, ServiceType::Pricing, region)
    }

    fn payload(n: i64) -> Payload {
        Arc::new(serde_json::json!({ "n": n }))
    }

    #[test]
    fn config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.grace_multiplier, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_zero_values() {
        assert!(CacheConfig::new().max_entries(0).validate().is_err());
        assert!(CacheConfig::new().grace_multiplier(0).validate().is_err());
    }

    #[test]
    fn miss_on_empty_store() {
        let store = CacheStore::new(CacheConfig::default());
        assert!(store.get(&key("us-east-1"), false).is_none());
        assert!(store.get(&key("us-east-1"), true).is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn set_resets_creation_time() {
        let store = CacheStore::new(CacheConfig::default());
        store.set(key("a"), payload(1), Duration::from_millis(40), vec![]);
        std::thread::sleep(Duration::from_millis(60));
        assert!(store.get(&key("a"), false).is_none());

        store.set(key("a"), payload(2), Duration::from_millis(40), vec![]);
        let hit = store.get(&key("a"), false).unwrap();
        assert!(!hit.is_stale);
        assert_eq!(*hit.payload, serde_json::json!({ "n": 2 }));
    }

    #[test]
    fn stale_read_marks_entry() {
        let store = CacheStore::new(CacheConfig::default());
        store.set(key("a"), payload(1), Duration::from_millis(20), vec![]);
        assert!(store.entry(&key("a")).unwrap().last_served_stale_at().is_none());

        std::thread::sleep(Duration::from_millis(40));
        let hit = store.get(&key("a"), true).unwrap();
        assert!(hit.is_stale);
        assert!(store.entry(&key("a")).unwrap().last_served_stale_at().is_some());
        assert_eq!(store.stats().stale_hits, 1);
    }

    #[test]
    fn capacity_eviction_is_oldest_first() {
        let store = CacheStore::new(CacheConfig::new().max_entries(3));
        for (i, region) in ["r0", "r1", "r2", "r3", "r4"].iter().enumerate() {
            store.set(key(region), payload(i as i64), Duration::from_secs(60), vec![]);
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.keys(), vec![key("r2"), key("r3"), key("r4")]);
        assert_eq!(store.stats().evictions, 2);
    }

    #[test]
    fn overwrite_moves_entry_to_newest() {
        let store = CacheStore::new(CacheConfig::new().max_entries(2));
        store.set(key("a"), payload(1), Duration::from_secs(60), vec![]);
        store.set(key("b"), payload(2), Duration::from_secs(60), vec![]);
        store.set(key("a"), payload(3), Duration::from_secs(60), vec![]);
        store.set(key("c"), payload(4), Duration::from_secs(60), vec![]);

        assert_eq!(store.keys(), vec![key("a"), key("c")]);
    }

    #[test]
    fn tag_and_provider_invalidation() {
        let store = CacheStore::new(CacheConfig::default());
        store.set(key("a"), payload(1), Duration::from_secs(60), vec!["api_call:1".into()]);
        store.set(key("b"), payload(2), Duration::from_secs(60), vec!["api_call:2".into()]);
        store.set(
            CacheKey::new(Provider::Gcp, ServiceType::Compute, "us-central1"),
            payload(3),
            Duration::from_secs(60),
            vec!["api_call:1".into()],
        );

        assert_eq!(store.invalidate_tag("api_call:1"), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.invalidate_provider(Provider::Aws), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn evict_sweeps_entries_past_grace() {
        let store = CacheStore::new(CacheConfig::new().grace_multiplier(2));
        store.set(key("short"), payload(1), Duration::from_millis(10), vec![]);
        store.set(key("long"), payload(2), Duration::from_secs(60), vec![]);
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(store.evict(), 1);
        assert_eq!(store.keys(), vec![key("long")]);
    }

    #[test]
    fn evict_counts_every_expired_entry() {
        let store = CacheStore::new(CacheConfig::new().grace_multiplier(1));
        for region in ["a", "b", "c"] {
            store.set(key(region), payload(1), Duration::from_millis(10), vec![]);
        }
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.len(), 0);
        assert_eq!(store.evict(), 3);
        assert_eq!(store.stats().expirations, 3);
        assert_eq!(store.stats().evictions, 0);
        assert_eq!(store.evict(), 0);
    }

    #[test]
    fn peek_leaves_counters_alone() {
        let store = CacheStore::new(CacheConfig::default());
        assert!(store.peek(&key("a")).is_none());
        store.set(key("a"), payload(1), Duration::from_secs(60), vec![]);
        assert!(store.peek(&key("a")).is_some());

        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }
}
