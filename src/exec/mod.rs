//! The caching executor
//!
//! [`CachingExec::execute`] classifies each request and routes it through
//! one of a few paths: a module response, a direct backend call, a cache hit,
//! a revalidation, or a variant negotiation. Every storage call and backend
//! call is a suspension point raced against the request's cancellation
//! signal.
//!
//! State that lives for one backend call (the captured 304, the buffered
//! body) is owned by that call and never shared.

mod backend;
mod negotiate;
mod revalidate;
pub mod scope;

pub use scope::{CacheContext, CancelHandle, ExecScope};

use crate::body::Body;
use crate::chain::ExecChain;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::metrics::CacheMetrics;
use crate::models::{CacheEntry, CacheResponseStatus, HttpHost};
use crate::policy::{
    add_stale_warning, parse_cache_control, CacheValidityPolicy, CacheableRequestPolicy,
    CachedResponseGenerator, CachedResponseSuitabilityChecker, ConditionalRequestBuilder,
    RequestProtocolCompliance, ResponseCachingPolicy, ResponseProtocolCompliance,
};
use crate::storage::HttpCache;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, MAX_FORWARDS, VIA};
use http::{Method, Request, Response, StatusCode, Version};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// One request travelling through the executor
pub(crate) struct Exchange<'a> {
    target: HttpHost,
    entity: Option<Bytes>,
    scope: &'a ExecScope,
    chain: &'a dyn ExecChain,
}

/// HTTP caching executor
///
/// Sits in front of the next handler of a request pipeline and answers
/// requests from an [`HttpCache`] whenever HTTP caching rules allow it.
pub struct CachingExec {
    cache: Arc<dyn HttpCache>,
    config: Arc<CacheConfig>,
    metrics: Arc<CacheMetrics>,
    validity: CacheValidityPolicy,
    cacheable_request: CacheableRequestPolicy,
    suitability: CachedResponseSuitabilityChecker,
    response_policy: ResponseCachingPolicy,
    conditional: ConditionalRequestBuilder,
    generator: CachedResponseGenerator,
    request_compliance: RequestProtocolCompliance,
    response_compliance: ResponseProtocolCompliance,
}

impl CachingExec {
    /// Create a new CachingExec
    ///
    /// # Arguments
    /// * `cache` - Storage the executor reads and commits entries through
    /// * `config` - Cache configuration, already validated
    pub fn new(cache: Arc<dyn HttpCache>, config: Arc<CacheConfig>) -> Self {
        let validity = CacheValidityPolicy::new(&config);
        CachingExec {
            cache,
            metrics: Arc::new(CacheMetrics::new()),
            suitability: CachedResponseSuitabilityChecker::new(validity.clone()),
            response_policy: ResponseCachingPolicy::new(&config),
            generator: CachedResponseGenerator::new(validity.clone()),
            validity,
            cacheable_request: CacheableRequestPolicy,
            conditional: ConditionalRequestBuilder,
            request_compliance: RequestProtocolCompliance,
            response_compliance: ResponseProtocolCompliance,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Handle one request
    ///
    /// Calls `chain` zero or more times and resolves exactly once, with the
    /// response for the client or the failure of the request. Cancellation
    /// through the scope's [`CancelHandle`] fails the request with
    /// [`CacheError::Interrupted`](crate::error::CacheError::Interrupted).
    ///
    /// # Arguments
    /// * `request` - The client request; origin-form URIs are resolved against the scope route
    /// * `entity` - Request entity forwarded with every backend call
    /// * `scope` - Route, context and cancellation signal of the request
    /// * `chain` - The next handler
    pub async fn execute(
        &self,
        request: Request<()>,
        entity: Option<Bytes>,
        scope: &ExecScope,
        chain: &dyn ExecChain,
    ) -> Result<Response<Body>> {
        self.metrics.record_request();
        let target = HttpHost::from_uri(request.uri()).unwrap_or_else(|| scope.route().clone());
        scope
            .context()
            .set_cache_response_status(CacheResponseStatus::CacheMiss);

        if client_request_uses_cache_probe(&request) {
            debug!("Request is a cache probe: uri={}", request.uri());
            return Ok(self.module_response(scope, StatusCode::NOT_IMPLEMENTED));
        }

        let fatal = self.request_compliance.request_is_fatally_non_compliant(&request);
        if let Some(error) = fatal.first() {
            debug!("Request is fatally non-compliant: {:?}", error);
            self.record_module_response(scope);
            return Ok(self.request_compliance.get_error_for_request(*error));
        }

        let mut request = request;
        self.request_compliance.make_request_compliant(&mut request);
        let via = generate_via_header(request.version());
        request.headers_mut().append(VIA, via);

        let exchange = Exchange {
            target,
            entity,
            scope,
            chain,
        };

        if !self.cacheable_request.is_servable_from_cache(&request) {
            debug!("Request is not servable from cache");
            scope
                .guard(self.cache.flush_invalidated_for(&exchange.target, &request))
                .await?;
            return self.call_backend(&exchange, request).await;
        }

        let entry = scope
            .guard(self.cache.get_entry(&exchange.target, &request))
            .await?;

        match entry {
            Some(entry) => {
                debug!("Cache hit: uri={}", request.uri());
                self.handle_cache_hit(&exchange, request, entry).await
            }
            None => {
                debug!("Cache miss: uri={}", request.uri());
                self.handle_cache_miss(&exchange, request).await
            }
        }
    }

    async fn handle_cache_hit(
        &self,
        exchange: &Exchange<'_>,
        request: Request<()>,
        entry: Arc<CacheEntry>,
    ) -> Result<Response<Body>> {
        let scope = exchange.scope;
        let now = SystemTime::now();

        if self.suitability.can_cached_response_be_used(&request, &entry, now) {
            debug!("Cache hit: serving stored response");
            match self.generate_cached_response(&request, &entry, now) {
                Ok(response) => {
                    self.metrics.record_cache_hit();
                    scope
                        .context()
                        .set_cache_response_status(CacheResponseStatus::CacheHit);
                    return Ok(response);
                }
                Err(e) if e.is_storage_failure() => {
                    warn!("Unable to read cached response: {}", e);
                    self.metrics.record_cache_failure();
                    if !may_call_backend(&request) {
                        return Ok(self.module_response(scope, StatusCode::GATEWAY_TIMEOUT));
                    }
                    scope
                        .context()
                        .set_cache_response_status(CacheResponseStatus::Failure);
                    self.metrics.record_backend_call();
                    return scope
                        .guard(exchange.chain.proceed(request, exchange.entity.clone()))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }

        if !may_call_backend(&request) {
            debug!("Cache entry not suitable but only-if-cached requested");
            return Ok(self.module_response(scope, StatusCode::GATEWAY_TIMEOUT));
        }

        if !(entry.status() == StatusCode::NOT_MODIFIED && !self.suitability.is_conditional(&request)) {
            debug!("Revalidating cache entry");
            return self.revalidate_cache_entry(exchange, request, entry).await;
        }

        debug!("Cache entry not usable; calling backend");
        self.call_backend(exchange, request).await
    }

    async fn handle_cache_miss(&self, exchange: &Exchange<'_>, request: Request<()>) -> Result<Response<Body>> {
        self.metrics.record_cache_miss();
        let scope = exchange.scope;

        if !may_call_backend(&request) {
            return Ok(self.module_response(scope, StatusCode::GATEWAY_TIMEOUT));
        }

        let variants = scope
            .guard(self.cache.get_variants(&exchange.target, &request))
            .await?;

        if variants.is_empty() {
            return self.call_backend(exchange, request).await;
        }

        debug!("Negotiating among {} stored variants", variants.len());
        self.negotiate_response_from_variants(exchange, request, variants)
            .await
    }

    /// Answer a cache hit, with a 304 if the client's own conditional matches
    fn generate_cached_response(
        &self,
        request: &Request<()>,
        entry: &CacheEntry,
        now: SystemTime,
    ) -> Result<Response<Body>> {
        let mut response = if self.suitability.is_conditional(request)
            && self.suitability.all_conditionals_match(request, entry, now)
        {
            self.generator.generate_not_modified_response(entry)
        } else {
            self.materialize(request, entry, now)?
        };

        if !self.validity.staleness(entry, now).is_zero() {
            add_stale_warning(response.headers_mut());
        }
        Ok(response)
    }

    /// Build the full stored response and account for the bytes served
    fn materialize(&self, request: &Request<()>, entry: &CacheEntry, now: SystemTime) -> Result<Response<Body>> {
        let response = self.generator.generate_response(request, entry, now)?;
        if let Body::Full(content) = response.body() {
            self.metrics.record_bytes_from_cache(content.len() as u64);
        }
        Ok(response)
    }

    fn module_response(&self, scope: &ExecScope, status: StatusCode) -> Response<Body> {
        self.record_module_response(scope);
        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        response
    }

    fn record_module_response(&self, scope: &ExecScope) {
        self.metrics.record_module_response();
        scope
            .context()
            .set_cache_response_status(CacheResponseStatus::CacheModuleResponse);
    }
}

/// `OPTIONS *` with `Max-Forwards: 0` asks about the cache itself
fn client_request_uses_cache_probe(request: &Request<()>) -> bool {
    request.method() == Method::OPTIONS
        && request.uri().path() == "*"
        && request
            .headers()
            .get(MAX_FORWARDS)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false)
}

fn may_call_backend(request: &Request<()>) -> bool {
    !parse_cache_control(request.headers()).only_if_cached
}

/// `Via` value identifying this cache, e.g. `1.1 localhost (http-cache-exec/0.1.0 (cache))`
pub(crate) fn generate_via_header(version: Version) -> HeaderValue {
    let protocol = match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    };
    let value = format!(
        "{} localhost ({}/{} (cache))",
        protocol,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("1.1 localhost"))
}
