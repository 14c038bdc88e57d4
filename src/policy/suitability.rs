//! Decides whether a stored response can answer a request as is

use super::cache_control::parse_cache_control;
use super::validity::CacheValidityPolicy;
use crate::models::{parse_date_header, CacheEntry};
use http::header::{IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, IF_UNMODIFIED_SINCE};
use http::{Method, Request, StatusCode};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Checks stored responses against the freshness and conditional
/// requirements of a request
#[derive(Debug, Clone)]
pub struct CachedResponseSuitabilityChecker {
    validity: CacheValidityPolicy,
}

impl CachedResponseSuitabilityChecker {
    pub fn new(validity: CacheValidityPolicy) -> Self {
        CachedResponseSuitabilityChecker { validity }
    }

    /// Determine if the entry may be served without contacting the backend
    ///
    /// # Arguments
    /// * `request` - The request to answer
    /// * `entry` - The stored response
    /// * `now` - The instant the decision is made for
    pub fn can_cached_response_be_used(&self, request: &Request<()>, entry: &CacheEntry, now: SystemTime) -> bool {
        if !self.is_fresh_enough(request, entry, now) {
            debug!("Cache entry is not fresh enough");
            return false;
        }

        if request.method() == Method::GET && !self.validity.content_length_matches(entry) {
            debug!("Cache entry Content-Length does not match stored body");
            return false;
        }

        if has_unsupported_conditional_headers(request) {
            debug!("Request contains unsupported conditional headers");
            return false;
        }

        let conditional = self.is_conditional(request);
        if !conditional && entry.status() == StatusCode::NOT_MODIFIED {
            debug!("Cache entry is a 304 and the request is not conditional");
            return false;
        }

        if conditional && !self.all_conditionals_match(request, entry, now) {
            return false;
        }

        if request.method() == Method::GET && entry.resource().is_none() && entry.status() == StatusCode::OK {
            debug!("Cache entry was stored from a HEAD request");
            return false;
        }

        let cc = parse_cache_control(request.headers());
        if cc.no_cache || cc.no_store {
            return false;
        }

        let age = self.validity.current_age(entry, now);
        let lifetime = self.validity.freshness_lifetime(entry);

        if let Some(max_age) = cc.max_age {
            if age > max_age {
                debug!("Cache entry was not suitable due to max age");
                return false;
            }
        }

        if let Some(max_stale) = cc.max_stale {
            if lifetime.saturating_add(max_stale) < age {
                debug!("Cache entry was not suitable due to max stale");
                return false;
            }
        }

        if let Some(min_fresh) = cc.min_fresh {
            if lifetime.saturating_sub(age) < min_fresh {
                debug!("Cache entry was not suitable due to min fresh");
                return false;
            }
        }

        true
    }

    /// Fresh, or stale within what the request's `max-stale` tolerates
    fn is_fresh_enough(&self, request: &Request<()>, entry: &CacheEntry, now: SystemTime) -> bool {
        if self.validity.is_response_fresh(entry, now) {
            return true;
        }
        if self.validity.must_revalidate(entry) || self.validity.proxy_revalidate(entry) {
            return false;
        }
        match parse_cache_control(request.headers()).max_stale {
            Some(max_stale) => self.validity.staleness(entry, now) <= max_stale,
            None => false,
        }
    }

    /// Whether the request carries a conditional the cache can evaluate
    pub fn is_conditional(&self, request: &Request<()>) -> bool {
        let headers = request.headers();
        headers.contains_key(IF_NONE_MATCH) || headers.contains_key(IF_MODIFIED_SINCE)
    }

    /// Whether every conditional in the request is satisfied by the entry
    ///
    /// When both `If-None-Match` and `If-Modified-Since` are present, both
    /// must match.
    pub fn all_conditionals_match(&self, request: &Request<()>, entry: &CacheEntry, now: SystemTime) -> bool {
        let headers = request.headers();
        let has_etag_validator = headers.contains_key(IF_NONE_MATCH);
        let has_date_validator = headers.contains_key(IF_MODIFIED_SINCE);

        let etag_matches = has_etag_validator && etag_validator_matches(request, entry);
        let date_matches = has_date_validator && last_modified_validator_matches(request, entry, now);

        match (has_etag_validator, has_date_validator) {
            (true, true) => etag_matches && date_matches,
            (true, false) => etag_matches,
            (false, true) => date_matches,
            (false, false) => false,
        }
    }
}

fn has_unsupported_conditional_headers(request: &Request<()>) -> bool {
    let headers = request.headers();
    headers.contains_key(IF_RANGE) || headers.contains_key(IF_MATCH) || headers.contains_key(IF_UNMODIFIED_SINCE)
}

/// Weak comparison of the entry's `ETag` against `If-None-Match`
fn etag_validator_matches(request: &Request<()>, entry: &CacheEntry) -> bool {
    let etag = match entry.etag() {
        Some(etag) => weak_tag(etag),
        None => return false,
    };

    request
        .headers()
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|candidate| candidate == "*" || weak_tag(candidate) == etag)
}

fn last_modified_validator_matches(request: &Request<()>, entry: &CacheEntry, now: SystemTime) -> bool {
    let last_modified = match entry.last_modified() {
        Some(last_modified) => last_modified,
        None => return false,
    };

    match parse_date_header(request.headers(), IF_MODIFIED_SINCE) {
        // a date in the future is invalid and never matches
        Some(since) if since <= now + Duration::from_secs(1) => last_modified <= since,
        _ => false,
    }
}

fn weak_tag(tag: &str) -> &str {
    tag.trim().strip_prefix("W/").unwrap_or(tag.trim())
}
