//! Core data models for the caching executor

use crate::body::Body;
use crate::error::Result;
use bytes::Bytes;
use http::header::{AsHeaderName, HeaderName, HeaderValue, DATE, ETAG, LAST_MODIFIED, VARY};
use http::{HeaderMap, Response, StatusCode, Uri, Version};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Target host a request is addressed to
///
/// The scheme and host name are kept in lower case so that two spellings of
/// the same origin address the same cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpHost {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl HttpHost {
    /// Create a new HttpHost
    ///
    /// # Arguments
    /// * `scheme` - URI scheme (`http` or `https`)
    /// * `host` - Host name or address
    /// * `port` - Explicit port, if any
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        HttpHost {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Extract the target host from an absolute request URI
    ///
    /// Returns `None` for origin-form URIs (`/path`), which carry no authority.
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let authority = uri.authority()?;
        let scheme = uri.scheme_str().unwrap_or("http");
        Some(HttpHost::new(scheme, authority.host(), authority.port_u16()))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port the host is reached on, falling back to the scheme default
    pub fn effective_port(&self) -> u16 {
        self.port
            .unwrap_or(if self.scheme == "https" { 443 } else { 80 })
    }
}

impl fmt::Display for HttpHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

/// Status line and headers of a backend response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Create a head with the given status and no headers
    pub fn new(status: StatusCode) -> Self {
        ResponseHead {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    /// Take the head of a response produced by the backend
    pub fn from_parts(parts: http::response::Parts) -> Self {
        ResponseHead {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
        }
    }

    /// Append a header, returning the head for chaining
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Reassemble a full response around the given body
    pub fn into_response(self, body: Body) -> Response<Body> {
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers;
        response
    }

    /// First value of a header, if it is valid visible ASCII
    pub fn header_str<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parsed `Date` header
    pub fn date(&self) -> Option<SystemTime> {
        parse_date_header(&self.headers, DATE)
    }
}

/// Parse an HTTP-date header value
pub fn parse_date_header<K: AsHeaderName>(headers: &HeaderMap, name: K) -> Option<SystemTime> {
    let value = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(value.trim()).ok()
}

/// Whether date `a` is strictly after date `b`; false when either is unknown
pub fn date_is_after(a: Option<SystemTime>, b: Option<SystemTime>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a > b)
}

/// Stored body of a cache entry
///
/// Reading a resource may touch the backing store and can therefore fail.
pub trait Resource: Send + Sync + fmt::Debug {
    /// Read the full content
    fn get(&self) -> Result<Bytes>;

    /// Content length in bytes
    fn length(&self) -> usize;
}

/// A resource held entirely in memory
#[derive(Debug, Clone)]
pub struct HeapResource {
    content: Bytes,
}

impl HeapResource {
    pub fn new(content: Bytes) -> Self {
        HeapResource { content }
    }
}

impl Resource for HeapResource {
    fn get(&self) -> Result<Bytes> {
        Ok(self.content.clone())
    }

    fn length(&self) -> usize {
        self.content.len()
    }
}

/// Immutable snapshot of a stored response
///
/// Entries are never modified once created. Updates (a merged 304, a newly
/// registered variant) produce a new entry that replaces the old one in storage.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    request_date: SystemTime,
    response_date: SystemTime,
    status: StatusCode,
    headers: HeaderMap,
    resource: Option<Arc<dyn Resource>>,
    variant_map: BTreeMap<String, String>,
    date: Option<SystemTime>,
}

impl CacheEntry {
    /// Create a new cache entry
    ///
    /// # Arguments
    /// * `request_date` - When the request that produced the response was sent
    /// * `response_date` - When the response was received
    /// * `status` - Response status code
    /// * `headers` - Response headers as stored
    /// * `resource` - Stored body, `None` for responses without an entity
    pub fn new(
        request_date: SystemTime,
        response_date: SystemTime,
        status: StatusCode,
        headers: HeaderMap,
        resource: Option<Arc<dyn Resource>>,
    ) -> Self {
        let date = parse_date_header(&headers, DATE);
        CacheEntry {
            request_date,
            response_date,
            status,
            headers,
            resource,
            variant_map: BTreeMap::new(),
            date,
        }
    }

    /// Replace the variant map, returning the new entry
    pub fn with_variant_map(mut self, variant_map: BTreeMap<String, String>) -> Self {
        self.variant_map = variant_map;
        self
    }

    /// Copy of this entry with one more variant registered
    pub fn with_variant(&self, variant_key: &str, cache_key: &str) -> Self {
        let mut copy = self.clone();
        copy.variant_map
            .insert(variant_key.to_string(), cache_key.to_string());
        copy
    }

    pub fn request_date(&self) -> SystemTime {
        self.request_date
    }

    pub fn response_date(&self) -> SystemTime {
        self.response_date
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn resource(&self) -> Option<&Arc<dyn Resource>> {
        self.resource.as_ref()
    }

    /// Variant key to storage key mapping, non-empty only for root entries of varying resources
    pub fn variant_map(&self) -> &BTreeMap<String, String> {
        &self.variant_map
    }

    /// Parsed `Date` header of the stored response
    pub fn date(&self) -> Option<SystemTime> {
        self.date
    }

    pub fn header_str<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn etag(&self) -> Option<&str> {
        self.header_str(ETAG)
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        parse_date_header(&self.headers, LAST_MODIFIED)
    }

    /// Lower-cased header names listed in `Vary`
    pub fn vary_names(&self) -> Vec<String> {
        vary_names(&self.headers)
    }

    /// Whether the stored response varies on request headers
    pub fn has_variants(&self) -> bool {
        !self.vary_names().is_empty()
    }

    /// Length of the stored body, if there is one
    pub fn body_length(&self) -> Option<usize> {
        self.resource.as_ref().map(|r| r.length())
    }
}

/// Lower-cased header names listed in every `Vary` header
pub fn vary_names(headers: &HeaderMap) -> Vec<String> {
    let mut names: Vec<String> = headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// One cached representation of a resource that varies on request headers
#[derive(Debug, Clone)]
pub struct Variant {
    /// Request header signature this variant was stored under
    pub variant_key: String,
    /// Storage key addressing the variant entry
    pub cache_key: String,
    /// The stored variant
    pub entry: Arc<CacheEntry>,
}

impl Variant {
    pub fn new(variant_key: impl Into<String>, cache_key: impl Into<String>, entry: Arc<CacheEntry>) -> Self {
        Variant {
            variant_key: variant_key.into(),
            cache_key: cache_key.into(),
            entry,
        }
    }
}

/// How a request was answered, recorded for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheResponseStatus {
    /// The response came from the backend
    #[default]
    CacheMiss,
    /// The response was materialized from the cache without contacting the backend
    CacheHit,
    /// The response was generated by the cache module itself
    CacheModuleResponse,
    /// The cached entry was revalidated with the backend
    Validated,
    /// Reading the cache failed and the request was forwarded
    Failure,
}
