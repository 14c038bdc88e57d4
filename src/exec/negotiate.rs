//! Negotiation among stored variants of a resource

use super::backend::{BackendCallback, BackendOutcome};
use super::{CachingExec, Exchange};
use crate::body::Body;
use crate::error::Result;
use crate::models::{CacheResponseStatus, ResponseHead, Variant};
use crate::policy::revalidation_response_is_too_old;
use http::header::ETAG;
use http::{Request, Response, StatusCode};
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Takes over the 304 answering a negotiation request
struct NegotiationCallback {
    request_date: SystemTime,
    response_date: Option<SystemTime>,
    not_modified: bool,
}

impl NegotiationCallback {
    fn new() -> Self {
        NegotiationCallback {
            request_date: SystemTime::now(),
            response_date: None,
            not_modified: false,
        }
    }
}

impl BackendCallback for NegotiationCallback {
    fn cache_response(&mut self, response: &ResponseHead) -> bool {
        self.response_date = Some(SystemTime::now());
        if response.status == StatusCode::NOT_MODIFIED {
            self.not_modified = true;
            return false;
        }
        true
    }

    fn forward_response(&self, _response: &ResponseHead) -> bool {
        !self.not_modified
    }
}

impl CachingExec {
    /// Ask the backend which of the stored variants answers the request
    ///
    /// A 304 naming a known variant refreshes that variant and registers the
    /// request's header signature with it. A 304 without a usable `ETag`
    /// is never trusted: the request is then sent again as an ordinary call.
    pub(crate) async fn negotiate_response_from_variants(
        &self,
        exchange: &Exchange<'_>,
        request: Request<()>,
        variants: HashMap<String, Variant>,
    ) -> Result<Response<Body>> {
        let conditional = self
            .conditional
            .build_conditional_request_from_variants(&request, &variants);
        let mut callback = NegotiationCallback::new();

        let head = match self.call_backend_with(exchange, conditional, &mut callback).await? {
            BackendOutcome::Response(response) => return Ok(response),
            BackendOutcome::Intercepted(head) => head,
        };

        let etag = match head.header_str(ETAG) {
            Some(etag) => etag.trim(),
            None => {
                warn!("304 response did not contain ETag");
                return self.call_backend(exchange, request).await;
            }
        };

        let variant = match variants.get(etag) {
            Some(variant) => variant,
            None => {
                debug!("304 response did not contain ETag matching one sent in If-None-Match");
                return self.call_backend(exchange, request).await;
            }
        };

        if revalidation_response_is_too_old(&head.headers, &variant.entry, self.config.clock_skew()) {
            debug!("Negotiation response is older than the matched variant");
            let unconditional = self.conditional.build_unconditional_request(&request);
            return self.call_backend(exchange, unconditional).await;
        }

        self.metrics.record_cache_update();
        exchange
            .scope
            .context()
            .set_cache_response_status(CacheResponseStatus::Validated);

        let response_date = callback.response_date.unwrap_or_else(SystemTime::now);
        let updated = exchange
            .scope
            .guard(self.cache.update_variant_entry(
                &exchange.target,
                &request,
                &variant.entry,
                &head,
                callback.request_date,
                response_date,
                &variant.cache_key,
            ))
            .await?;

        let now = SystemTime::now();
        let response = if self.suitability.is_conditional(&request)
            && self.suitability.all_conditionals_match(&request, &updated, now)
        {
            self.generator.generate_not_modified_response(&updated)
        } else {
            self.materialize(&request, &updated, now)?
        };

        exchange
            .scope
            .guard(self.cache.reuse_variant(&exchange.target, &request, variant))
            .await?;

        Ok(response)
    }
}
