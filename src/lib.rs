//! HTTP Cache Exec
//!
//! An HTTP/1.1 caching layer that sits in front of the next handler of an
//! asynchronous request pipeline and answers requests from a shared or
//! private cache whenever RFC 7234 allows it.
//!
//! # Overview
//!
//! For every request the [`CachingExec`] decides between:
//!
//! - answering on its own (a cache probe, a fatally non-compliant request,
//!   or `only-if-cached` that cannot be satisfied),
//! - serving a fresh or acceptably stale stored response,
//! - revalidating a stale entry with a conditional request,
//! - negotiating among stored variants of a `Vary` resource,
//! - forwarding to the backend and storing the response when it is cacheable.
//!
//! Cacheable responses are buffered up to `max_object_size` bytes before they
//! are committed. Larger responses stream to the client without being stored.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use http_cache_exec::{CacheConfig, CachingExec, ExecScope, HttpHost, InMemoryHttpCache, UpstreamClient};
//! use http::Request;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(CacheConfig::from_file("http_cache.yaml")?);
//! let exec = CachingExec::new(Arc::new(InMemoryHttpCache::new()), config.clone());
//! let upstream = UpstreamClient::new(&config)?;
//!
//! let (scope, _cancel) = ExecScope::new(HttpHost::new("http", "example.com", None));
//! let request = Request::get("http://example.com/").body(())?;
//! let response = exec.execute(request, None, &scope, &upstream).await?;
//!
//! println!("{} ({:?})", response.status(), scope.context().cache_response_status());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! max_object_size: 8192
//! shared_cache: true
//! heuristic_caching_enabled: false
//! heuristic_coefficient: 0.1
//! heuristic_default_lifetime: 0
//! revalidation_clock_skew: 0
//! stream_buffer_chunks: 16
//! upstream_timeout: 30
//! ```
//!
//! See [`CacheConfig`] for every option.

pub mod body;
pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod exec;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod storage;
pub mod upstream;

// Re-export commonly used types
pub use body::{Body, BodySender};
pub use cache::{CacheStats, InMemoryHttpCache};
pub use chain::ExecChain;
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use exec::{CacheContext, CachingExec, CancelHandle, ExecScope};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use models::{CacheEntry, CacheResponseStatus, HeapResource, HttpHost, Resource, ResponseHead, Variant};
pub use storage::{CacheKeyGenerator, HttpCache};
pub use upstream::UpstreamClient;
