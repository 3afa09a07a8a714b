//! Caching HTTP transport for outbound API calls
//!
//! Wraps a `reqwest::Client` and memoizes GET responses following HTTP cache
//! validation rules. One instance is shared by every request handler.
//!
//! Cache keys are `"{METHOD} {URL}"`. Resource bodies are not identity
//! specific by URL, so sessions share entries. If upstream starts returning
//! identity-specific bodies for the same URL, switch
//! [`CacheKeyScope::PerCredential`] on, which extends the key with a digest
//! of the `Authorization` header.

pub mod policy;
mod store;

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{
    AUTHORIZATION, ETAG, HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{Client, Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

pub use store::{CacheEntry, CacheStats, CacheStatsSnapshot, CacheStore, MemoryCacheStore};

use self::policy::CacheControl;
use crate::config::{CacheConfig, CacheKeyScope};
use crate::{Error, Result};

/// Response returned by the transport, from cache or from the network
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Status code
    pub status: StatusCode,
    /// Headers
    pub headers: HeaderMap,
    /// Body
    pub body: Bytes,
    /// Whether the body came out of the cache (fresh hit or `304`)
    pub from_cache: bool,
}

impl CachedResponse {
    /// Decode the body as JSON
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }
}

/// Shared caching transport
pub struct CachingTransport {
    client: Client,
    /// `None` when caching is disabled
    store: Option<Arc<dyn CacheStore>>,
    key_scope: CacheKeyScope,
    stats: CacheStats,
}

impl CachingTransport {
    /// Create a transport with an in-memory store sized from configuration
    #[must_use]
    pub fn new(client: Client, config: &CacheConfig) -> Self {
        let store: Option<Arc<dyn CacheStore>> = if config.enabled {
            Some(Arc::new(MemoryCacheStore::new(config.max_entries)))
        } else {
            None
        };

        Self {
            client,
            store,
            key_scope: config.key_scope,
            stats: CacheStats::default(),
        }
    }

    /// Create a transport over a custom store
    #[must_use]
    pub fn with_store(client: Client, store: Arc<dyn CacheStore>, key_scope: CacheKeyScope) -> Self {
        Self {
            client,
            store: Some(store),
            key_scope,
            stats: CacheStats::default(),
        }
    }

    /// Underlying HTTP client, for building requests
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Cache key for a request, or `None` if the request is not cacheable
    #[must_use]
    pub fn cache_key(&self, request: &Request) -> Option<String> {
        if request.method() != Method::GET {
            return None;
        }

        let mut key = format!("{} {}", request.method(), request.url());
        if self.key_scope == CacheKeyScope::PerCredential {
            if let Some(auth) = request.headers().get(AUTHORIZATION) {
                let digest = Sha256::digest(auth.as_bytes());
                key.push('#');
                key.push_str(&hex::encode(&digest[..16]));
            }
        }
        Some(key)
    }

    /// Execute a request, serving or revalidating from cache where allowed
    ///
    /// # Errors
    ///
    /// Returns [`Error::Request`] if the network call fails. Cache faults never
    /// surface; they turn the call into a plain pass-through.
    pub async fn execute(&self, mut request: Request) -> Result<CachedResponse> {
        let Some(store) = self.store.as_deref() else {
            return self.send(request, false).await;
        };
        let Some(key) = self.cache_key(&request) else {
            return self.send(request, false).await;
        };

        let request_cc = CacheControl::from_headers(request.headers());
        if request_cc.no_store {
            return self.send(request, false).await;
        }

        let cached = match store.get(&key) {
            Ok(cached) => cached.filter(|entry| entry.matches_vary(request.headers())),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, bypassing cache");
                return self.send(request, false).await;
            }
        };

        if let Some(entry) = cached {
            if entry.is_fresh() && !request_cc.no_cache {
                CacheStats::incr(&self.stats.hits);
                trace!(key = %key, age = ?entry.age(), "Cache hit");
                return Ok(CachedResponse::from_entry(&entry));
            }

            if entry.has_validators() {
                add_conditional_headers(&mut request, &entry);
                return self.revalidate(store, key, request, entry).await;
            }
        }

        CacheStats::incr(&self.stats.misses);
        let request_headers = request.headers().clone();
        let response = self.send(request, true).await?;
        self.store_response(store, key, &request_headers, &response);
        Ok(response)
    }

    /// Drop stale entries that cannot be revalidated
    pub fn evict_expired(&self) -> usize {
        let Some(store) = self.store.as_deref() else {
            return 0;
        };
        let evicted = store.evict_expired();
        if evicted > 0 {
            self.stats
                .evictions
                .fetch_add(evicted as u64, std::sync::atomic::Ordering::Relaxed);
            debug!(evicted, "Evicted expired cache entries");
        }
        evicted
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        let size = self.store.as_deref().map_or(0, CacheStore::len);
        self.stats.snapshot(size)
    }

    async fn revalidate(
        &self,
        store: &dyn CacheStore,
        key: String,
        request: Request,
        mut entry: CacheEntry,
    ) -> Result<CachedResponse> {
        let request_headers = request.headers().clone();
        let response = self.send(request, true).await?;

        if response.status == StatusCode::NOT_MODIFIED {
            CacheStats::incr(&self.stats.revalidations);
            debug!(key = %key, "Revalidated stale entry");
            entry.refresh_from(&response.headers);
            let cached = CachedResponse::from_entry(&entry);
            if let Err(e) = store.put(key, entry) {
                warn!(error = %e, "Failed to store revalidated entry");
            }
            return Ok(cached);
        }

        CacheStats::incr(&self.stats.misses);
        self.store_response(store, key, &request_headers, &response);
        Ok(response)
    }

    fn store_response(
        &self,
        store: &dyn CacheStore,
        key: String,
        request_headers: &HeaderMap,
        response: &CachedResponse,
    ) {
        let storable = policy::is_storable(request_headers, response.status, &response.headers);
        let entry = storable
            .then(|| {
                CacheEntry::new(
                    request_headers,
                    response.status,
                    response.headers.clone(),
                    response.body.clone(),
                )
            })
            .flatten();

        let result = match entry {
            Some(entry) => store.put(key, entry).map(|()| {
                CacheStats::incr(&self.stats.stores);
            }),
            // Whatever was cached under this key is outdated now
            None => store.remove(&key),
        };

        if let Err(e) = result {
            warn!(error = %e, "Cache write failed, response served uncached");
        }
    }

    async fn send(&self, request: Request, counted: bool) -> Result<CachedResponse> {
        if !counted {
            CacheStats::incr(&self.stats.bypassed);
        }

        let method = request.method().clone();
        let url = request.url().clone();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::Request(format!("{method} {url}: {e}")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Request(format!("{method} {url}: reading body: {e}")))?;

        trace!(%method, %url, %status, "Upstream response");
        Ok(CachedResponse {
            status,
            headers,
            body,
            from_cache: false,
        })
    }
}

fn add_conditional_headers(request: &mut Request, entry: &CacheEntry) {
    let headers = request.headers_mut();
    if let Some(etag) = entry.headers.get(ETAG) {
        headers.insert(IF_NONE_MATCH, etag.clone());
    }
    if let Some(last_modified) = entry.headers.get(LAST_MODIFIED) {
        headers.insert(IF_MODIFIED_SINCE, last_modified.clone());
    }
}
