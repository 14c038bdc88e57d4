//! In-memory implementation of the storage contract
//!
//! Entries live in a single `RwLock<HashMap>` keyed by the canonical request
//! URI. A response that carries `Vary` is stored under its variant key, and a
//! root entry under the plain URI keeps the map of known variants.
//!
//! Locks are never held across an `.await`, so the async contract methods
//! complete without suspending.

use crate::error::{CacheError, Result};
use crate::models::{date_is_after, CacheEntry, HeapResource, HttpHost, Resource, ResponseHead, Variant};
use crate::storage::{CacheKeyGenerator, HttpCache};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_LOCATION, LOCATION};
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::debug;

/// Cache statistics for monitoring
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Vary-aware in-memory HTTP cache
#[derive(Debug, Default)]
pub struct InMemoryHttpCache {
    storage: RwLock<HashMap<String, Arc<CacheEntry>>>,
    keys: CacheKeyGenerator,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryHttpCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get cache statistics
    pub fn get_stats(&self) -> CacheStats {
        let (total_entries, total_bytes) = match self.storage.read() {
            Ok(storage) => (
                storage.len(),
                storage.values().filter_map(|e| e.body_length()).sum(),
            ),
            Err(_) => (0, 0),
        };

        CacheStats {
            total_entries,
            total_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn read_entry(&self, key: &str) -> Result<Option<Arc<CacheEntry>>> {
        let storage = self
            .storage
            .read()
            .map_err(|e| CacheError::storage(format!("cache lock poisoned: {}", e)))?;
        Ok(storage.get(key).cloned())
    }

    fn write_entry(&self, key: String, entry: Arc<CacheEntry>) -> Result<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|e| CacheError::storage(format!("cache lock poisoned: {}", e)))?;
        storage.insert(key, entry);
        Ok(())
    }

    /// Remove an entry and every variant registered under it
    fn remove_entry(&self, key: &str) -> Result<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|e| CacheError::storage(format!("cache lock poisoned: {}", e)))?;

        if let Some(root) = storage.remove(key) {
            for variant_key in root.variant_map().values() {
                storage.remove(variant_key);
            }
            debug!("Flushed cache entry: key={}, variants={}", key, root.variant_map().len());
        }
        Ok(())
    }

    /// Store an entry, registering it as a variant of its root when it varies
    fn store_in_cache(&self, host: &HttpHost, request: &Request<()>, entry: CacheEntry) -> Result<Arc<CacheEntry>> {
        let uri = self.keys.get_uri(host, request);
        let entry = Arc::new(entry);

        let variant_key = match self.keys.get_variant_key(request, entry.headers()) {
            Some(variant_key) => variant_key,
            None => {
                self.write_entry(uri, Arc::clone(&entry))?;
                return Ok(entry);
            }
        };

        let variant_uri = format!("{}{}", variant_key, uri);
        let mut storage = self
            .storage
            .write()
            .map_err(|e| CacheError::storage(format!("cache lock poisoned: {}", e)))?;

        storage.insert(variant_uri.clone(), Arc::clone(&entry));
        let root = match storage.get(&uri) {
            Some(existing) => existing.with_variant(&variant_key, &variant_uri),
            None => entry.with_variant(&variant_key, &variant_uri),
        };
        storage.insert(uri, Arc::new(root));

        debug!("Stored cache variant: key={}", variant_uri);
        Ok(entry)
    }

    /// Flush the entry behind a `Content-Location` or `Location` value on the same host
    ///
    /// Only entries that the response supersedes are removed. Both sides must
    /// carry an `ETag` and the tags must differ, and the response must not be
    /// older than the stored entry.
    fn flush_if_superseded(&self, host: &HttpHost, location: &str, response: &ResponseHead) -> Result<()> {
        let key = match self.resolve_location(host, location) {
            Some(key) => key,
            None => return Ok(()),
        };

        let existing = match self.read_entry(&key)? {
            Some(existing) => existing,
            None => return Ok(()),
        };

        let response_etag = response.header_str(http::header::ETAG);
        let etag_differs = match (existing.etag(), response_etag) {
            (Some(stored), Some(fresh)) => stored != fresh,
            _ => false,
        };
        let response_is_older = date_is_after(existing.date(), response.date());

        if etag_differs && !response_is_older {
            self.remove_entry(&key)?;
        }
        Ok(())
    }

    /// Storage key for a location header value, if it points at the same host
    fn resolve_location(&self, host: &HttpHost, location: &str) -> Option<String> {
        let uri: Uri = location.trim().parse().ok()?;
        if let Some(target) = HttpHost::from_uri(&uri) {
            if target.host() != host.host() || target.effective_port() != host.effective_port() {
                return None;
            }
        } else if !location.starts_with('/') {
            return None;
        }

        let request = Request::get(uri).body(()).ok()?;
        Some(self.keys.get_uri(host, &request))
    }
}

/// Methods that never invalidate stored entries
fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

/// Merge the headers of a 304 into the headers of the entry it validates
///
/// When the stored response is newer than the 304, the stored headers win.
fn merge_headers(entry: &CacheEntry, response: &ResponseHead) -> HeaderMap {
    if date_is_after(entry.date(), response.date()) {
        return entry.headers().clone();
    }

    let mut merged = entry.headers().clone();
    for name in response.headers.keys() {
        if name != CONTENT_ENCODING && name != CONTENT_LENGTH {
            merged.remove(name);
        }
    }
    for (name, value) in response.headers.iter() {
        if name != CONTENT_ENCODING && name != CONTENT_LENGTH {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

fn updated_entry(
    stale_entry: &CacheEntry,
    response: &ResponseHead,
    request_sent: SystemTime,
    response_received: SystemTime,
) -> Result<CacheEntry> {
    if response.status != StatusCode::NOT_MODIFIED {
        return Err(CacheError::InternalError(format!(
            "cannot update cache entry from a {} response",
            response.status
        )));
    }

    let entry = CacheEntry::new(
        request_sent,
        response_received,
        stale_entry.status(),
        merge_headers(stale_entry, response),
        stale_entry.resource().cloned(),
    );
    Ok(entry.with_variant_map(stale_entry.variant_map().clone()))
}

#[async_trait]
impl HttpCache for InMemoryHttpCache {
    async fn flush_for(&self, host: &HttpHost, request: &Request<()>) -> Result<()> {
        let uri = self.keys.get_uri(host, request);
        self.remove_entry(&uri)
    }

    async fn flush_invalidated_for(&self, host: &HttpHost, request: &Request<()>) -> Result<()> {
        if is_safe_method(request.method()) {
            return Ok(());
        }

        let uri = self.keys.get_uri(host, request);
        debug!("Invalidating cache entries: method={}, key={}", request.method(), uri);
        self.remove_entry(&uri)?;

        for name in [CONTENT_LOCATION, LOCATION] {
            if let Some(location) = request.headers().get(&name).and_then(|v| v.to_str().ok()) {
                if let Some(key) = self.resolve_location(host, location) {
                    self.remove_entry(&key)?;
                }
            }
        }
        Ok(())
    }

    async fn flush_invalidated_for_response(
        &self,
        host: &HttpHost,
        _request: &Request<()>,
        response: &ResponseHead,
    ) -> Result<()> {
        if !response.status.is_success() {
            return Ok(());
        }

        for name in [CONTENT_LOCATION, LOCATION] {
            if let Some(location) = response.header_str(name) {
                self.flush_if_superseded(host, location, response)?;
            }
        }
        Ok(())
    }

    async fn get_entry(&self, host: &HttpHost, request: &Request<()>) -> Result<Option<Arc<CacheEntry>>> {
        let uri = self.keys.get_uri(host, request);
        let root = self.read_entry(&uri)?;

        let entry = match root {
            Some(root) if root.has_variants() => {
                match self.keys.get_variant_key(request, root.headers()) {
                    Some(variant_key) => match root.variant_map().get(&variant_key) {
                        Some(variant_uri) => self.read_entry(variant_uri)?,
                        None => None,
                    },
                    None => None,
                }
            }
            other => other,
        };

        if entry.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(entry)
    }

    async fn get_variants(&self, host: &HttpHost, request: &Request<()>) -> Result<HashMap<String, Variant>> {
        let uri = self.keys.get_uri(host, request);
        let mut variants = HashMap::new();

        let root = match self.read_entry(&uri)? {
            Some(root) if root.has_variants() => root,
            _ => return Ok(variants),
        };

        for (variant_key, variant_uri) in root.variant_map() {
            if let Some(entry) = self.read_entry(variant_uri)? {
                if let Some(etag) = entry.etag() {
                    variants.insert(
                        etag.to_string(),
                        Variant::new(variant_key.as_str(), variant_uri.as_str(), Arc::clone(&entry)),
                    );
                }
            }
        }
        Ok(variants)
    }

    async fn create_entry(
        &self,
        host: &HttpHost,
        request: &Request<()>,
        response: &ResponseHead,
        content: Option<Bytes>,
        request_sent: SystemTime,
        response_received: SystemTime,
    ) -> Result<Arc<CacheEntry>> {
        let resource = content.map(|bytes| Arc::new(HeapResource::new(bytes)) as Arc<dyn Resource>);
        let entry = CacheEntry::new(
            request_sent,
            response_received,
            response.status,
            response.headers.clone(),
            resource,
        );
        self.store_in_cache(host, request, entry)
    }

    async fn update_entry(
        &self,
        host: &HttpHost,
        request: &Request<()>,
        stale_entry: &CacheEntry,
        response: &ResponseHead,
        request_sent: SystemTime,
        response_received: SystemTime,
    ) -> Result<Arc<CacheEntry>> {
        let entry = updated_entry(stale_entry, response, request_sent, response_received)?;
        self.store_in_cache(host, request, entry)
    }

    async fn update_variant_entry(
        &self,
        _host: &HttpHost,
        _request: &Request<()>,
        stale_entry: &CacheEntry,
        response: &ResponseHead,
        request_sent: SystemTime,
        response_received: SystemTime,
        cache_key: &str,
    ) -> Result<Arc<CacheEntry>> {
        let entry = Arc::new(updated_entry(stale_entry, response, request_sent, response_received)?);
        self.write_entry(cache_key.to_string(), Arc::clone(&entry))?;
        Ok(entry)
    }

    async fn reuse_variant(&self, host: &HttpHost, request: &Request<()>, variant: &Variant) -> Result<()> {
        let uri = self.keys.get_uri(host, request);
        let variant_key = match self.keys.get_variant_key(request, variant.entry.headers()) {
            Some(variant_key) => variant_key,
            None => return Ok(()),
        };

        let mut storage = self
            .storage
            .write()
            .map_err(|e| CacheError::storage(format!("cache lock poisoned: {}", e)))?;
        let root = match storage.get(&uri) {
            Some(existing) => existing.with_variant(&variant_key, &variant.cache_key),
            None => variant.entry.with_variant(&variant_key, &variant.cache_key),
        };
        storage.insert(uri, Arc::new(root));
        Ok(())
    }
}
