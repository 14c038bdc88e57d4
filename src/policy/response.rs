//! Response cacheability and response protocol compliance

use super::cache_control::parse_cache_control;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::models::{vary_names, ResponseHead};
use http::header::{
    HeaderName, HeaderValue, AGE, ALLOW, AUTHORIZATION, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH,
    CONTENT_RANGE, CONTENT_TYPE, DATE, EXPECT, EXPIRES, LAST_MODIFIED, RANGE,
};
use http::{Method, Request, StatusCode, Version};
use tracing::debug;

/// Statuses that may be stored without explicit freshness information
const CACHEABLE_BY_DEFAULT: [StatusCode; 5] = [
    StatusCode::OK,
    StatusCode::NON_AUTHORITATIVE_INFORMATION,
    StatusCode::MULTIPLE_CHOICES,
    StatusCode::MOVED_PERMANENTLY,
    StatusCode::GONE,
];

/// Decides whether a backend response may be stored
#[derive(Debug, Clone)]
pub struct ResponseCachingPolicy {
    max_object_size: usize,
    shared_cache: bool,
}

impl ResponseCachingPolicy {
    pub fn new(config: &CacheConfig) -> Self {
        ResponseCachingPolicy {
            max_object_size: config.max_object_size,
            shared_cache: config.shared_cache,
        }
    }

    /// Determine if a response to `request` may be stored
    ///
    /// # Logic
    /// A response is cacheable when:
    /// 1. The request is a GET or HEAD without `no-store`
    /// 2. Its status is cacheable by default, or it carries explicit
    ///    freshness; 206 and 303 never are
    /// 3. Its declared length fits the object size limit
    /// 4. It has exactly one valid `Date` and at most one `Age` and `Expires`
    /// 5. It does not vary on `*`
    /// 6. It is not `no-store`, nor `private` in a shared cache
    /// 7. In a shared cache, an authorized request is answered with
    ///    `s-maxage`, `must-revalidate` or `public`
    pub fn is_response_cacheable(&self, request: &Request<()>, response: &ResponseHead) -> bool {
        let method = request.method();
        if method != Method::GET && method != Method::HEAD {
            debug!("Response is not cacheable: method={}", method);
            return false;
        }

        if parse_cache_control(request.headers()).no_store {
            debug!("Response is not cacheable: request no-store");
            return false;
        }

        let cc = parse_cache_control(&response.headers);

        if self.shared_cache
            && request.headers().contains_key(AUTHORIZATION)
            && !(cc.s_maxage.is_some() || cc.must_revalidate || cc.public)
        {
            debug!("Response is not cacheable: authorized request in a shared cache");
            return false;
        }

        let status = response.status;
        let cacheable_by_default = CACHEABLE_BY_DEFAULT.contains(&status);
        if status == StatusCode::PARTIAL_CONTENT || status == StatusCode::SEE_OTHER {
            debug!("Response is not cacheable: status={}", status);
            return false;
        }
        if !cacheable_by_default && !is_known_status(status) {
            debug!("Response is not cacheable: unknown status={}", status);
            return false;
        }

        if let Some(length) = response
            .header_str(CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            if length > self.max_object_size {
                debug!("Response is not cacheable: content length {} too large", length);
                return false;
            }
        }

        if response.headers.get_all(AGE).iter().count() > 1
            || response.headers.get_all(EXPIRES).iter().count() > 1
            || response.headers.get_all(DATE).iter().count() > 1
        {
            debug!("Response is not cacheable: repeated Age, Expires or Date");
            return false;
        }

        if response.date().is_none() {
            debug!("Response is not cacheable: missing or invalid Date");
            return false;
        }

        if vary_names(&response.headers).iter().any(|name| name == "*") {
            debug!("Response is not cacheable: Vary *");
            return false;
        }

        if cc.no_store || (self.shared_cache && cc.private) {
            debug!("Response is not cacheable: explicitly non-cacheable");
            return false;
        }

        let explicitly_cacheable = cc.is_explicitly_cacheable() || response.headers.contains_key(EXPIRES);

        if request.uri().query().is_some() && response.version < Version::HTTP_11 && !explicitly_cacheable {
            debug!("Response is not cacheable: HTTP/1.0 response to a query without freshness");
            return false;
        }

        cacheable_by_default || explicitly_cacheable
    }
}

fn is_known_status(status: StatusCode) -> bool {
    status.canonical_reason().is_some() && status.as_u16() < 600
}

/// Headers describing an entity that must not accompany a 304
const ENTITY_HEADERS_FOR_304: [HeaderName; 7] = [
    ALLOW,
    CONTENT_ENCODING,
    CONTENT_LANGUAGE,
    CONTENT_LENGTH,
    CONTENT_RANGE,
    CONTENT_TYPE,
    LAST_MODIFIED,
];

/// Rejects and repairs non-compliant backend responses
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseProtocolCompliance;

impl ResponseProtocolCompliance {
    /// Make a backend response compliant before it is cached or forwarded
    ///
    /// # Arguments
    /// * `request` - The request that was sent to the backend
    /// * `response` - The backend response head, repaired in place
    /// * `has_entity` - Whether the response carries a body
    ///
    /// # Returns
    /// * `Err(CacheError::ProtocolError)` for a 206 nobody asked for or an
    ///   unexpected 100
    pub fn ensure_protocol_compliance(
        &self,
        request: &Request<()>,
        response: &mut ResponseHead,
        has_entity: bool,
    ) -> Result<()> {
        if response.status == StatusCode::PARTIAL_CONTENT && !request.headers().contains_key(RANGE) {
            return Err(CacheError::ProtocolError(
                "partial content was returned for a request that did not ask for it".to_string(),
            ));
        }

        if response.status == StatusCode::CONTINUE && !expects_continue(request) {
            return Err(CacheError::ProtocolError(
                "the incoming request did not contain a 100-continue header, \
                 but a 100 response was received"
                    .to_string(),
            ));
        }

        if request.method() == Method::OPTIONS
            && response.status == StatusCode::OK
            && !has_entity
            && !response.headers.contains_key(CONTENT_LENGTH)
        {
            response
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }

        remove_identity_content_coding(response);

        if response.status == StatusCode::NOT_MODIFIED {
            for name in ENTITY_HEADERS_FOR_304.iter() {
                response.headers.remove(name);
            }
        }

        Ok(())
    }
}

fn expects_continue(request: &Request<()>) -> bool {
    request
        .headers()
        .get(EXPECT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("100-continue"))
        .unwrap_or(false)
}

fn remove_identity_content_coding(response: &mut ResponseHead) {
    let codings: Vec<String> = response
        .headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    if !codings.iter().any(|c| c.eq_ignore_ascii_case("identity")) {
        return;
    }

    response.headers.remove(CONTENT_ENCODING);
    let remaining: Vec<String> = codings
        .into_iter()
        .filter(|c| !c.eq_ignore_ascii_case("identity"))
        .collect();
    if !remaining.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&remaining.join(", ")) {
            response.headers.insert(CONTENT_ENCODING, value);
        }
    }
}
