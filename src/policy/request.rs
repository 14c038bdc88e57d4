//! Request classification and request protocol compliance

use super::cache_control::{parse_cache_control, pragma_no_cache};
use crate::body::Body;
use http::header::{
    HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, IF_MATCH, IF_RANGE, MAX_FORWARDS, RANGE,
};
use http::{Method, Request, Response, StatusCode, Version};
use tracing::debug;

/// Decides whether a request may be answered from the cache
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheableRequestPolicy;

impl CacheableRequestPolicy {
    /// Determine if the request may be served from the cache
    ///
    /// # Logic
    /// A request is servable when:
    /// 1. The method is GET or HEAD
    /// 2. It carries no `Pragma: no-cache`
    /// 3. Its `Cache-Control` has neither `no-store` nor `no-cache`
    pub fn is_servable_from_cache(&self, request: &Request<()>) -> bool {
        let method = request.method();
        if method != Method::GET && method != Method::HEAD {
            debug!("Request is not servable from cache: method={}", method);
            return false;
        }

        if pragma_no_cache(request.headers()) {
            debug!("Request is not servable from cache: Pragma no-cache");
            return false;
        }

        let cc = parse_cache_control(request.headers());
        if cc.no_store {
            debug!("Request is not servable from cache: no-store");
            return false;
        }
        if cc.no_cache {
            debug!("Request is not servable from cache: no-cache");
            return false;
        }

        true
    }
}

/// Request defects that prevent the request from being forwarded at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestProtocolError {
    /// A weak entity tag in `If-Range` on a request with `Range`
    WeakEtagAndRange,
    /// A weak entity tag in `If-Match` on a PUT or DELETE
    WeakEtagOnPutDelete,
    /// A `no-cache` request directive carrying field names
    NoCacheDirectiveWithField,
}

impl RequestProtocolError {
    fn message(&self) -> &'static str {
        match self {
            RequestProtocolError::WeakEtagAndRange => "Weak eTag not compatible with byte range",
            RequestProtocolError::WeakEtagOnPutDelete => {
                "Weak eTag not compatible with PUT or DELETE requests"
            }
            RequestProtocolError::NoCacheDirectiveWithField => {
                "No-Cache directive MUST NOT include a field name"
            }
        }
    }
}

/// Detects and repairs request protocol violations
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestProtocolCompliance;

impl RequestProtocolCompliance {
    /// List the fatal violations in a request, in detection order
    pub fn request_is_fatally_non_compliant(&self, request: &Request<()>) -> Vec<RequestProtocolError> {
        let mut errors = Vec::new();
        let headers = request.headers();

        if headers.contains_key(RANGE) && has_weak_tag(request, IF_RANGE) {
            errors.push(RequestProtocolError::WeakEtagAndRange);
        }

        let method = request.method();
        if (method == Method::PUT || method == Method::DELETE) && has_weak_tag(request, IF_MATCH) {
            errors.push(RequestProtocolError::WeakEtagOnPutDelete);
        }

        if !parse_cache_control(headers).no_cache_fields.is_empty() {
            errors.push(RequestProtocolError::NoCacheDirectiveWithField);
        }

        errors
    }

    /// Build the 400 response reported for a fatal violation
    pub fn get_error_for_request(&self, error: RequestProtocolError) -> Response<Body> {
        let message = error.message();
        let mut response = Response::new(Body::from(message));
        *response.status_mut() = StatusCode::BAD_REQUEST;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(message.len()));
        response
    }

    /// Normalise a request before it is forwarded
    ///
    /// - `Max-Forwards` on OPTIONS is decremented
    /// - `no-cache` drops the freshness directives it overrides
    /// - HTTP/1.0 and HTTP/0.9 requests are upgraded to HTTP/1.1
    pub fn make_request_compliant(&self, request: &mut Request<()>) {
        decrement_options_max_forwards(request);
        strip_freshness_directives_with_no_cache(request);

        if request.version() < Version::HTTP_11 {
            *request.version_mut() = Version::HTTP_11;
        }
    }
}

fn has_weak_tag(request: &Request<()>, name: http::header::HeaderName) -> bool {
    request
        .headers()
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|tag| tag.trim().starts_with("W/"))
}

fn decrement_options_max_forwards(request: &mut Request<()>) {
    if request.method() != Method::OPTIONS {
        return;
    }

    let current = request
        .headers()
        .get(MAX_FORWARDS)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u32>().ok());

    if let Some(current) = current {
        if current > 0 {
            request
                .headers_mut()
                .insert(MAX_FORWARDS, HeaderValue::from(current - 1));
        }
    }
}

fn strip_freshness_directives_with_no_cache(request: &mut Request<()>) {
    let cc = parse_cache_control(request.headers());
    if !cc.no_cache {
        return;
    }

    let kept: Vec<String> = request
        .headers()
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|d| {
            let name = d.split('=').next().unwrap_or("").trim().to_ascii_lowercase();
            !matches!(name.as_str(), "max-age" | "max-stale" | "min-fresh" | "")
        })
        .map(str::to_string)
        .collect();

    if let Ok(value) = HeaderValue::from_str(&kept.join(", ")) {
        request.headers_mut().insert(CACHE_CONTROL, value);
    }
}
