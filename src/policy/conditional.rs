//! Builds the requests used to revalidate stored responses

use super::cache_control::parse_cache_control;
use crate::models::{CacheEntry, Variant};
use http::header::{
    HeaderValue, CACHE_CONTROL, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, IF_UNMODIFIED_SINCE,
    LAST_MODIFIED, PRAGMA,
};
use http::Request;
use std::collections::HashMap;

/// Copy the head of a request
///
/// Extensions are not carried over.
pub fn copy_request(request: &Request<()>) -> Request<()> {
    let mut copy = Request::new(());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    copy
}

/// Builder for conditional and unconditional revalidation requests
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalRequestBuilder;

impl ConditionalRequestBuilder {
    /// Conditional request validating a single stale entry
    ///
    /// Adds `If-None-Match` from the entry's `ETag` and `If-Modified-Since`
    /// from its `Last-Modified`. An entry demanding revalidation also gets
    /// `Cache-Control: max-age=0` so that intermediaries revalidate too.
    pub fn build_conditional_request(&self, request: &Request<()>, entry: &CacheEntry) -> Request<()> {
        let mut conditional = copy_request(request);
        let headers = conditional.headers_mut();

        if let Some(etag) = entry.headers().get(http::header::ETAG) {
            headers.insert(IF_NONE_MATCH, etag.clone());
        }
        if let Some(last_modified) = entry.headers().get(LAST_MODIFIED) {
            headers.insert(IF_MODIFIED_SINCE, last_modified.clone());
        }

        let cc = parse_cache_control(entry.headers());
        if cc.must_revalidate || cc.proxy_revalidate {
            headers.append(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        }

        conditional
    }

    /// Conditional request listing the validator of every known variant
    ///
    /// The entity tags are listed in sorted order so that the request is
    /// deterministic.
    pub fn build_conditional_request_from_variants(
        &self,
        request: &Request<()>,
        variants: &HashMap<String, Variant>,
    ) -> Request<()> {
        let mut conditional = copy_request(request);

        let mut etags: Vec<&str> = variants.keys().map(String::as_str).collect();
        etags.sort_unstable();

        if let Ok(value) = HeaderValue::from_str(&etags.join(", ")) {
            conditional.headers_mut().insert(IF_NONE_MATCH, value);
        }
        conditional
    }

    /// Request that bypasses every cache on the way to the origin
    ///
    /// All validators are removed and `no-cache` is demanded through both
    /// `Cache-Control` and `Pragma`.
    pub fn build_unconditional_request(&self, request: &Request<()>) -> Request<()> {
        let mut unconditional = copy_request(request);
        let headers = unconditional.headers_mut();

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        for name in [IF_RANGE, IF_MATCH, IF_NONE_MATCH, IF_UNMODIFIED_SINCE, IF_MODIFIED_SINCE] {
            headers.remove(name);
        }
        unconditional
    }
}
