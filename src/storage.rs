//! Storage contract consumed by the caching executor
//!
//! The executor never touches stored entries directly. Every lookup, commit
//! and invalidation goes through [`HttpCache`], which implementations must
//! make safe for concurrent use.

use crate::error::Result;
use crate::models::{vary_names, CacheEntry, HttpHost, ResponseHead, Variant};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Request};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Asynchronous cache store
///
/// All operations complete with a result or fail with a
/// [`CacheError`](crate::error::CacheError); none of them block the caller.
#[async_trait]
pub trait HttpCache: Send + Sync {
    /// Remove the entry (and all its variants) matching the request
    async fn flush_for(&self, host: &HttpHost, request: &Request<()>) -> Result<()>;

    /// Remove entries invalidated by sending this request
    async fn flush_invalidated_for(&self, host: &HttpHost, request: &Request<()>) -> Result<()>;

    /// Remove entries invalidated by this request and response exchange
    async fn flush_invalidated_for_response(
        &self,
        host: &HttpHost,
        request: &Request<()>,
        response: &ResponseHead,
    ) -> Result<()>;

    /// Look up the entry that would answer the request
    async fn get_entry(&self, host: &HttpHost, request: &Request<()>) -> Result<Option<Arc<CacheEntry>>>;

    /// All stored variants of the requested resource, keyed by their `ETag`
    ///
    /// Variants without an `ETag` cannot be negotiated and are left out.
    async fn get_variants(&self, host: &HttpHost, request: &Request<()>) -> Result<HashMap<String, Variant>>;

    /// Store a new entry built from a backend response and its buffered body
    async fn create_entry(
        &self,
        host: &HttpHost,
        request: &Request<()>,
        response: &ResponseHead,
        content: Option<Bytes>,
        request_sent: SystemTime,
        response_received: SystemTime,
    ) -> Result<Arc<CacheEntry>>;

    /// Merge a 304 response into a stale entry and store the result
    async fn update_entry(
        &self,
        host: &HttpHost,
        request: &Request<()>,
        stale_entry: &CacheEntry,
        response: &ResponseHead,
        request_sent: SystemTime,
        response_received: SystemTime,
    ) -> Result<Arc<CacheEntry>>;

    /// Merge a 304 response into a stored variant addressed by `cache_key`
    #[allow(clippy::too_many_arguments)]
    async fn update_variant_entry(
        &self,
        host: &HttpHost,
        request: &Request<()>,
        stale_entry: &CacheEntry,
        response: &ResponseHead,
        request_sent: SystemTime,
        response_received: SystemTime,
        cache_key: &str,
    ) -> Result<Arc<CacheEntry>>;

    /// Record that the request's header signature maps to an existing variant
    async fn reuse_variant(&self, host: &HttpHost, request: &Request<()>, variant: &Variant) -> Result<()>;
}

/// Derives storage keys from requests
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheKeyGenerator;

impl CacheKeyGenerator {
    /// Canonical key of the requested resource
    ///
    /// Format: `{scheme}://{host}:{port}{path}?{query}`, with the port always
    /// spelled out so that `http://a/` and `http://a:80/` share a slot.
    pub fn get_uri(&self, host: &HttpHost, request: &Request<()>) -> String {
        let uri = request.uri();
        let target = HttpHost::from_uri(uri).unwrap_or_else(|| host.clone());
        let path = match uri.path_and_query().map(|pq| pq.as_str()) {
            Some(pq) if pq.starts_with('/') => pq,
            Some("*") => "*",
            _ => "/",
        };
        format!(
            "{}://{}:{}{}",
            target.scheme(),
            target.host(),
            target.effective_port(),
            path
        )
    }

    /// Header signature of the request for a response that varies
    ///
    /// Returns `None` when the response headers carry no `Vary`.
    /// Format: `{name=value&name=value}` with names lower-cased and sorted.
    pub fn get_variant_key(&self, request: &Request<()>, response_headers: &HeaderMap) -> Option<String> {
        let names = vary_names(response_headers);
        if names.is_empty() {
            return None;
        }

        let parts: Vec<String> = names
            .iter()
            .map(|name| {
                let values: Vec<&str> = request
                    .headers()
                    .get_all(name.as_str())
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .map(str::trim)
                    .collect();
                format!("{}={}", name, values.join(","))
            })
            .collect();

        Some(format!("{{{}}}", parts.join("&")))
    }

    /// Storage key of the variant of `entry_headers` selected by the request
    pub fn get_variant_uri(&self, host: &HttpHost, request: &Request<()>, response_headers: &HeaderMap) -> String {
        let uri = self.get_uri(host, request);
        match self.get_variant_key(request, response_headers) {
            Some(variant_key) => format!("{}{}", variant_key, uri),
            None => uri,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, VARY};

    fn host() -> HttpHost {
        HttpHost::new("http", "example.com", None)
    }

    #[test]
    fn test_uri_spells_out_default_port() {
        let generator = CacheKeyGenerator;
        let absolute = Request::get("http://EXAMPLE.com/a?b=1").body(()).unwrap();
        let relative = Request::get("/a?b=1").body(()).unwrap();

        assert_eq!(generator.get_uri(&host(), &absolute), "http://example.com:80/a?b=1");
        assert_eq!(generator.get_uri(&host(), &relative), "http://example.com:80/a?b=1");
    }

    #[test]
    fn test_uri_distinguishes_paths_and_queries() {
        let generator = CacheKeyGenerator;
        let a = Request::get("/a").body(()).unwrap();
        let b = Request::get("/a?x").body(()).unwrap();
        let c = Request::get("/b").body(()).unwrap();

        let keys = [
            generator.get_uri(&host(), &a),
            generator.get_uri(&host(), &b),
            generator.get_uri(&host(), &c),
        ];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[0], keys[2]);
        assert_ne!(keys[1], keys[2]);
    }

    #[test]
    fn test_variant_key_from_vary() {
        let generator = CacheKeyGenerator;
        let mut response_headers = HeaderMap::new();
        response_headers.insert(VARY, HeaderValue::from_static("User-Agent, Accept-Encoding"));

        let request = Request::get("/")
            .header("accept-encoding", "gzip")
            .header("user-agent", "test")
            .body(())
            .unwrap();

        assert_eq!(
            generator.get_variant_key(&request, &response_headers).as_deref(),
            Some("{accept-encoding=gzip&user-agent=test}")
        );
        assert!(generator.get_variant_key(&request, &HeaderMap::new()).is_none());
        assert_eq!(
            generator.get_variant_uri(&host(), &request, &response_headers),
            "{accept-encoding=gzip&user-agent=test}http://example.com:80/"
        );
    }

    #[test]
    fn test_variant_key_missing_header_is_empty_value() {
        let generator = CacheKeyGenerator;
        let mut response_headers = HeaderMap::new();
        response_headers.insert(VARY, HeaderValue::from_static("Accept-Language"));

        let request = Request::get("/").body(()).unwrap();
        assert_eq!(
            generator.get_variant_key(&request, &response_headers).as_deref(),
            Some("{accept-language=}")
        );
    }
}
