//! Revalidation of stale cache entries

use super::backend::{BackendCallback, BackendOutcome};
use super::{CachingExec, Exchange};
use crate::body::Body;
use crate::error::Result;
use crate::models::{CacheEntry, CacheResponseStatus, ResponseHead};
use crate::policy::{add_stale_warning, revalidation_response_is_too_old};
use http::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Statuses for which a stale entry may be served instead of the error
fn stale_if_error_applies_to(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// What a revalidation call took over from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    NotModified,
    StaleIfError,
}

/// Intercepts the 304 or error response of a revalidation call
///
/// "Now" is sampled once per response and used for every time-dependent
/// decision about it.
struct RevalidationCallback<'a> {
    exec: &'a CachingExec,
    exchange: &'a Exchange<'a>,
    request: &'a Request<()>,
    entry: &'a CacheEntry,
    request_date: SystemTime,
    response_date: Option<SystemTime>,
    captured: Option<Capture>,
}

impl<'a> RevalidationCallback<'a> {
    fn new(exec: &'a CachingExec, exchange: &'a Exchange<'a>, request: &'a Request<()>, entry: &'a CacheEntry) -> Self {
        RevalidationCallback {
            exec,
            exchange,
            request,
            entry,
            request_date: SystemTime::now(),
            response_date: None,
            captured: None,
        }
    }
}

impl BackendCallback for RevalidationCallback<'_> {
    fn cache_response(&mut self, response: &ResponseHead) -> bool {
        let now = SystemTime::now();
        self.response_date = Some(now);

        let status = response.status;
        if status == StatusCode::NOT_MODIFIED || status == StatusCode::OK {
            self.exec.metrics.record_cache_update();
            self.exchange
                .scope
                .context()
                .set_cache_response_status(CacheResponseStatus::Validated);
        }

        if status == StatusCode::NOT_MODIFIED {
            self.captured = Some(Capture::NotModified);
            return false;
        }

        let validity = &self.exec.validity;
        if stale_if_error_applies_to(status)
            && !validity.stale_response_not_allowed(self.request, self.entry, now)
            && validity.may_return_stale_if_error(self.request, self.entry, now)
        {
            debug!("Serving stale cache entry for backend error: status={}", status);
            self.captured = Some(Capture::StaleIfError);
            return false;
        }

        true
    }

    fn forward_response(&self, _response: &ResponseHead) -> bool {
        self.captured.is_none()
    }
}

/// Takes over any response older than the entry it is meant to refresh
struct TooOldGuard<'a, C> {
    inner: C,
    entry: &'a CacheEntry,
    skew: Duration,
    too_old: bool,
}

impl<'a, C: BackendCallback> TooOldGuard<'a, C> {
    fn new(inner: C, entry: &'a CacheEntry, skew: Duration) -> Self {
        TooOldGuard {
            inner,
            entry,
            skew,
            too_old: false,
        }
    }
}

impl<C: BackendCallback> BackendCallback for TooOldGuard<'_, C> {
    fn cache_response(&mut self, response: &ResponseHead) -> bool {
        if revalidation_response_is_too_old(&response.headers, self.entry, self.skew) {
            debug!("Revalidation response is older than the cache entry");
            self.too_old = true;
            return false;
        }
        self.inner.cache_response(response)
    }

    fn forward_response(&self, response: &ResponseHead) -> bool {
        !self.too_old && self.inner.forward_response(response)
    }
}

impl CachingExec {
    /// Revalidate a stale entry with the backend
    ///
    /// One conditional call is made. If its response predates the entry,
    /// exactly one unconditional call follows.
    pub(crate) async fn revalidate_cache_entry(
        &self,
        exchange: &Exchange<'_>,
        request: Request<()>,
        entry: Arc<CacheEntry>,
    ) -> Result<Response<Body>> {
        let conditional = self.conditional.build_conditional_request(&request, &entry);
        let mut first = TooOldGuard::new(
            RevalidationCallback::new(self, exchange, &request, &entry),
            &entry,
            self.config.clock_skew(),
        );
        let outcome = self.call_backend_with(exchange, conditional, &mut first).await?;

        let (outcome, callback) = if first.too_old {
            debug!("Retrying revalidation with an unconditional request");
            let unconditional = self.conditional.build_unconditional_request(&request);
            let mut retry = RevalidationCallback::new(self, exchange, &request, &entry);
            let outcome = self.call_backend_with(exchange, unconditional, &mut retry).await?;
            (outcome, retry)
        } else {
            (outcome, first.inner)
        };

        let head = match outcome {
            BackendOutcome::Response(response) => return Ok(response),
            BackendOutcome::Intercepted(head) => head,
        };

        match callback.captured {
            Some(Capture::NotModified) => {
                let response_date = callback.response_date.unwrap_or_else(SystemTime::now);
                let updated = exchange
                    .scope
                    .guard(self.cache.update_entry(
                        &exchange.target,
                        &request,
                        &entry,
                        &head,
                        callback.request_date,
                        response_date,
                    ))
                    .await?;

                let now = SystemTime::now();
                if self.suitability.is_conditional(&request)
                    && self.suitability.all_conditionals_match(&request, &updated, now)
                {
                    Ok(self.generator.generate_not_modified_response(&updated))
                } else {
                    self.materialize(&request, &updated, now)
                }
            }
            Some(Capture::StaleIfError) => {
                self.metrics.record_cache_hit();
                exchange
                    .scope
                    .context()
                    .set_cache_response_status(CacheResponseStatus::CacheHit);
                let mut response = self.materialize(&request, &entry, SystemTime::now())?;
                add_stale_warning(response.headers_mut());
                Ok(response)
            }
            None => Ok(head.into_response(Body::empty())),
        }
    }
}
