//! Cache entry storage
//!
//! [`MemoryCacheStore`] is a sharded concurrent map, so concurrent readers
//! never block each other and writers only contend per shard. Racing writers
//! on one key are last-write-wins, which is fine for idempotent GETs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::policy;
use crate::{Error, Result};

/// A stored response with its validators and freshness metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
    /// When the entry was stored or last revalidated
    pub stored_at: Instant,
    /// Age reported by upstream when stored
    pub initial_age: Duration,
    /// Freshness lifetime at store time
    pub freshness: Duration,
    /// Request header values selected by `Vary`
    pub vary: Vec<(HeaderName, Option<HeaderValue>)>,
}

impl CacheEntry {
    /// Build an entry from a response, computing freshness from its headers.
    ///
    /// Returns `None` when the response cannot be matched (`Vary: *`).
    #[must_use]
    pub fn new(
        request_headers: &HeaderMap,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    ) -> Option<Self> {
        let vary = policy::vary_values(request_headers, &headers)?;
        Some(Self {
            status,
            freshness: policy::freshness_lifetime(&headers),
            initial_age: policy::initial_age(&headers),
            headers,
            body,
            stored_at: Instant::now(),
            vary,
        })
    }

    /// Current age of the response
    #[must_use]
    pub fn age(&self) -> Duration {
        self.initial_age.saturating_add(self.stored_at.elapsed())
    }

    /// Whether the entry can be served without contacting upstream
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.age() < self.freshness
    }

    /// Whether a stale entry can be revalidated
    #[must_use]
    pub fn has_validators(&self) -> bool {
        policy::has_validators(&self.headers)
    }

    /// Whether the request selects the same variant this entry was stored for
    #[must_use]
    pub fn matches_vary(&self, request_headers: &HeaderMap) -> bool {
        self.vary
            .iter()
            .all(|(name, value)| request_headers.get(name) == value.as_ref())
    }

    /// Apply a `304 Not Modified` response: merge its headers and restart the clock
    pub fn refresh_from(&mut self, not_modified: &HeaderMap) {
        for name in not_modified.keys() {
            // 304s carry no body; their framing headers must not replace ours
            if name == reqwest::header::CONTENT_LENGTH || name == reqwest::header::TRANSFER_ENCODING
            {
                continue;
            }
            self.headers.remove(name);
            for value in not_modified.get_all(name) {
                self.headers.append(name.clone(), value.clone());
            }
        }
        self.freshness = policy::freshness_lifetime(&self.headers);
        self.initial_age = policy::initial_age(not_modified);
        self.stored_at = Instant::now();
    }
}

/// Storage backend for the caching transport.
///
/// Implementations may fail; the transport treats any failure as a reason to
/// bypass the cache for that request.
pub trait CacheStore: Send + Sync {
    /// Look up an entry
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Insert or replace an entry
    fn put(&self, key: String, entry: CacheEntry) -> Result<()>;

    /// Remove an entry
    fn remove(&self, key: &str) -> Result<()>;

    /// Drop entries that are stale and cannot be revalidated; returns how many
    fn evict_expired(&self) -> usize;

    /// Number of stored entries
    fn len(&self) -> usize;

    /// Whether the store is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store backed by `DashMap`
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
}

impl MemoryCacheStore {
    /// Create a store holding at most `max_entries` entries
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }
}

impl MemoryCacheStore {
    /// Drop the least useful entry: stale before fresh, then oldest first
    fn evict_one(&self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| (entry.is_fresh(), entry.stored_at))
            .map(|entry| entry.key().clone());
        match victim {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: String, entry: CacheEntry) -> Result<()> {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_expired();
            while self.entries.len() >= self.max_entries {
                if !self.evict_one() {
                    return Err(Error::Internal(format!(
                        "Cache full ({} entries)",
                        self.max_entries
                    )));
                }
            }
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.is_fresh() || entry.has_validators());
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Responses served from a fresh entry
    pub hits: AtomicU64,
    /// Lookups that found nothing usable
    pub misses: AtomicU64,
    /// Stale entries confirmed by a `304`
    pub revalidations: AtomicU64,
    /// Entries written
    pub stores: AtomicU64,
    /// Entries evicted by maintenance
    pub evictions: AtomicU64,
    /// Requests that bypassed the cache
    pub bypassed: AtomicU64,
}

impl CacheStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Calculate hit rate (0.0-1.0); revalidated responses count as hits
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) + self.revalidations.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self, size: usize) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            revalidations: self.revalidations.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            size,
            hit_rate: self.hit_rate(),
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Fresh hits
    pub hits: u64,
    /// Misses
    pub misses: u64,
    /// Successful revalidations
    pub revalidations: u64,
    /// Entries written
    pub stores: u64,
    /// Entries evicted
    pub evictions: u64,
    /// Requests that bypassed the cache
    pub bypassed: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cache_control: &'static str) -> CacheEntry {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CACHE_CONTROL,
            HeaderValue::from_static(cache_control),
        );
        CacheEntry::new(&HeaderMap::new(), StatusCode::OK, headers, Bytes::from_static(b"{}"))
            .unwrap()
    }

    #[test]
    fn fresh_entry_within_max_age() {
        assert!(entry("max-age=60").is_fresh());
        assert!(!entry("max-age=0").is_fresh());
    }

    #[test]
    fn age_header_counts_against_freshness() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        headers.insert(reqwest::header::AGE, HeaderValue::from_static("61"));
        let entry =
            CacheEntry::new(&HeaderMap::new(), StatusCode::OK, headers, Bytes::new()).unwrap();
        assert!(!entry.is_fresh());
    }

    #[test]
    fn refresh_from_not_modified_restarts_clock() {
        let mut stale = entry("max-age=0");
        stale.headers.insert(reqwest::header::ETAG, HeaderValue::from_static("\"v1\""));
        assert!(!stale.is_fresh());

        let mut not_modified = HeaderMap::new();
        not_modified.insert(reqwest::header::CACHE_CONTROL, HeaderValue::from_static("max-age=120"));
        stale.refresh_from(&not_modified);

        assert!(stale.is_fresh());
        assert_eq!(stale.freshness, Duration::from_secs(120));
        assert_eq!(stale.headers.get_all(reqwest::header::CACHE_CONTROL).iter().count(), 1);
        assert!(stale.has_validators());
        assert_eq!(stale.body, Bytes::from_static(b"{}"));
    }

    #[test]
    fn vary_matching() {
        let mut request = HeaderMap::new();
        request.insert(reqwest::header::ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::VARY, HeaderValue::from_static("accept-language"));
        let entry = CacheEntry::new(&request, StatusCode::OK, headers, Bytes::new()).unwrap();

        assert!(entry.matches_vary(&request));
        let mut other = HeaderMap::new();
        other.insert(reqwest::header::ACCEPT_LANGUAGE, HeaderValue::from_static("fi"));
        assert!(!entry.matches_vary(&other));
        assert!(!entry.matches_vary(&HeaderMap::new()));
    }

    #[test]
    fn store_put_get_remove() {
        let store = MemoryCacheStore::default();
        assert!(store.is_empty());
        store.put("GET http://a/".to_string(), entry("max-age=60")).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("GET http://a/").unwrap().is_some());
        assert!(store.get("GET http://b/").unwrap().is_none());
        store.remove("GET http://a/").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn evict_keeps_fresh_and_revalidatable() {
        let store = MemoryCacheStore::default();
        store.put("fresh".to_string(), entry("max-age=60")).unwrap();
        store.put("stale".to_string(), entry("max-age=0")).unwrap();
        let mut validated = entry("max-age=0");
        validated.headers.insert(reqwest::header::ETAG, HeaderValue::from_static("\"v\""));
        store.put("validated".to_string(), validated).unwrap();

        assert_eq!(store.evict_expired(), 1);
        assert!(store.get("stale").unwrap().is_none());
        assert!(store.get("fresh").unwrap().is_some());
        assert!(store.get("validated").unwrap().is_some());
    }

    fn validated(cache_control: &'static str) -> CacheEntry {
        let mut entry = entry(cache_control);
        entry.headers.insert(reqwest::header::ETAG, HeaderValue::from_static("\"v\""));
        entry
    }

    #[test]
    fn full_store_replaces_oldest_fresh_entry() {
        let store = MemoryCacheStore::new(2);
        let mut oldest = entry("max-age=60");
        oldest.stored_at = oldest
            .stored_at
            .checked_sub(Duration::from_secs(5))
            .unwrap_or(oldest.stored_at);
        store.put("a".to_string(), oldest).unwrap();
        store.put("b".to_string(), entry("max-age=60")).unwrap();
        store.put("c".to_string(), entry("max-age=60")).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get("a").unwrap().is_none());
        assert!(store.get("c").unwrap().is_some());
        // replacing an existing key never evicts
        store.put("c".to_string(), entry("max-age=60")).unwrap();
        assert!(store.get("b").unwrap().is_some());
    }

    #[test]
    fn full_store_of_revalidatable_entries_keeps_accepting() {
        let store = MemoryCacheStore::new(2);
        store.put("old".to_string(), validated("max-age=0")).unwrap();
        store.put("fresh".to_string(), validated("max-age=60")).unwrap();
        assert_eq!(store.evict_expired(), 0);

        store.put("new".to_string(), validated("max-age=0")).unwrap();
        assert_eq!(store.len(), 2);
        // the stale entry goes before the fresh one
        assert!(store.get("old").unwrap().is_none());
        assert!(store.get("fresh").unwrap().is_some());
        assert!(store.get("new").unwrap().is_some());
    }

    #[test]
    fn huge_upstream_age_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        headers.insert(reqwest::header::AGE, HeaderValue::from_static("18446744073709551615"));
        let mut entry =
            CacheEntry::new(&HeaderMap::new(), StatusCode::OK, headers, Bytes::new()).unwrap();
        assert_eq!(entry.initial_age, Duration::from_secs(1 << 31));

        entry.initial_age = Duration::MAX;
        entry.stored_at = entry
            .stored_at
            .checked_sub(Duration::from_secs(2))
            .unwrap_or(entry.stored_at);
        assert_eq!(entry.age(), Duration::MAX);
        assert!(!entry.is_fresh());

        let store = MemoryCacheStore::default();
        store.put("huge".to_string(), entry).unwrap();
        assert_eq!(store.evict_expired(), 1);
    }

    #[test]
    fn full_store_makes_room_by_evicting() {
        let store = MemoryCacheStore::new(1);
        store.put("a".to_string(), entry("max-age=0")).unwrap();
        assert!(store.put("b".to_string(), entry("max-age=60")).is_ok());
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn hit_rate() {
        let stats = CacheStats::default();
        CacheStats::incr(&stats.hits);
        CacheStats::incr(&stats.revalidations);
        CacheStats::incr(&stats.misses);
        let snapshot = stats.snapshot(3);
        assert_eq!(snapshot.size, 3);
        assert!((snapshot.hit_rate - 0.666).abs() < 0.01);
    }
}
