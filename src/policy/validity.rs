//! Age and freshness arithmetic for stored responses

use super::cache_control::parse_cache_control;
use crate::config::CacheConfig;
use crate::models::{parse_date_header, CacheEntry};
use http::header::{AGE, CONTENT_LENGTH, DATE, EXPIRES};
use http::Request;
use std::time::{Duration, SystemTime};

/// Age assigned when the age of a response cannot be determined
pub const MAX_AGE: Duration = Duration::from_secs(2_147_483_648);

/// Computes how old a stored response is and how long it stays fresh
#[derive(Debug, Clone)]
pub struct CacheValidityPolicy {
    shared_cache: bool,
    heuristic_caching_enabled: bool,
    heuristic_coefficient: f32,
    heuristic_default_lifetime: Duration,
}

impl CacheValidityPolicy {
    pub fn new(config: &CacheConfig) -> Self {
        CacheValidityPolicy {
            shared_cache: config.shared_cache,
            heuristic_caching_enabled: config.heuristic_caching_enabled,
            heuristic_coefficient: config.heuristic_coefficient,
            heuristic_default_lifetime: config.heuristic_default_lifetime(),
        }
    }

    /// Current age of the entry at `now`
    pub fn current_age(&self, entry: &CacheEntry, now: SystemTime) -> Duration {
        self.corrected_initial_age(entry)
            .saturating_add(resident_time(entry, now))
            .min(MAX_AGE)
    }

    /// How long the entry stays fresh after it was generated
    ///
    /// Explicit lifetimes come first (`s-maxage` in a shared cache,
    /// `max-age`, `Expires - Date`). Without one, a heuristic lifetime is
    /// used when enabled.
    pub fn freshness_lifetime(&self, entry: &CacheEntry) -> Duration {
        let cc = parse_cache_control(entry.headers());

        if self.shared_cache {
            if let Some(s_maxage) = cc.s_maxage {
                return s_maxage;
            }
        }
        if let Some(max_age) = cc.max_age {
            return max_age;
        }

        let expires = parse_date_header(entry.headers(), EXPIRES);
        if let (Some(expires), Some(date)) = (expires, entry.date()) {
            return expires.duration_since(date).unwrap_or(Duration::ZERO);
        }
        if entry.headers().contains_key(EXPIRES) {
            // an unparseable Expires means already expired
            return Duration::ZERO;
        }

        if self.heuristic_caching_enabled {
            return self.heuristic_freshness_lifetime(entry);
        }
        Duration::ZERO
    }

    fn heuristic_freshness_lifetime(&self, entry: &CacheEntry) -> Duration {
        match (entry.date(), entry.last_modified()) {
            (Some(date), Some(last_modified)) => match date.duration_since(last_modified) {
                Ok(elapsed) => elapsed.mul_f32(self.heuristic_coefficient),
                Err(_) => Duration::ZERO,
            },
            _ => self.heuristic_default_lifetime,
        }
    }

    pub fn is_response_fresh(&self, entry: &CacheEntry, now: SystemTime) -> bool {
        self.current_age(entry, now) < self.freshness_lifetime(entry)
    }

    /// How far past its freshness lifetime the entry is
    pub fn staleness(&self, entry: &CacheEntry, now: SystemTime) -> Duration {
        self.current_age(entry, now)
            .saturating_sub(self.freshness_lifetime(entry))
    }

    pub fn must_revalidate(&self, entry: &CacheEntry) -> bool {
        parse_cache_control(entry.headers()).must_revalidate
    }

    pub fn proxy_revalidate(&self, entry: &CacheEntry) -> bool {
        parse_cache_control(entry.headers()).proxy_revalidate
    }

    /// Whether a stale entry may stand in for an error response
    ///
    /// Either the request or the stored response must grant a
    /// `stale-if-error` window that the entry's staleness has not exceeded.
    pub fn may_return_stale_if_error(&self, request: &Request<()>, entry: &CacheEntry, now: SystemTime) -> bool {
        let staleness = self.staleness(entry, now);
        let request_window = parse_cache_control(request.headers()).stale_if_error;
        let entry_window = parse_cache_control(entry.headers()).stale_if_error;

        [request_window, entry_window]
            .into_iter()
            .flatten()
            .any(|window| staleness <= window)
    }

    /// Whether the entry or the request forbids serving the entry once stale
    ///
    /// The entry forbids it with `must-revalidate` (or `proxy-revalidate` in
    /// a shared cache). The request forbids it with `no-cache`, `max-age`,
    /// `min-fresh`, or a `max-stale` the entry has outgrown.
    pub fn stale_response_not_allowed(&self, request: &Request<()>, entry: &CacheEntry, now: SystemTime) -> bool {
        if self.must_revalidate(entry) || (self.shared_cache && self.proxy_revalidate(entry)) {
            return true;
        }

        let cc = parse_cache_control(request.headers());
        if cc.no_cache || cc.max_age.is_some() || cc.min_fresh.is_some() {
            return true;
        }
        match cc.max_stale {
            Some(max_stale) => self.staleness(entry, now) > max_stale,
            None => false,
        }
    }

    /// Whether a stored `Content-Length` agrees with the stored body
    pub fn content_length_matches(&self, entry: &CacheEntry) -> bool {
        let declared = match entry.header_str(CONTENT_LENGTH) {
            Some(value) => value.trim().parse::<usize>().ok(),
            None => return true,
        };
        match (declared, entry.body_length()) {
            (Some(declared), Some(actual)) => declared == actual,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn apparent_age(&self, entry: &CacheEntry) -> Duration {
        match entry.date() {
            Some(date) => entry
                .response_date()
                .duration_since(date)
                .unwrap_or(Duration::ZERO),
            None => MAX_AGE,
        }
    }

    fn age_header(&self, entry: &CacheEntry) -> Duration {
        let mut age = Duration::ZERO;
        for value in entry.headers().get_all(AGE) {
            let parsed = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| Duration::from_secs(secs).min(MAX_AGE))
                .unwrap_or(MAX_AGE);
            age = age.max(parsed);
        }
        age
    }

    fn corrected_initial_age(&self, entry: &CacheEntry) -> Duration {
        let corrected_received_age = self.apparent_age(entry).max(self.age_header(entry));
        let response_delay = entry
            .response_date()
            .duration_since(entry.request_date())
            .unwrap_or(Duration::ZERO);
        corrected_received_age.saturating_add(response_delay)
    }
}

fn resident_time(entry: &CacheEntry, now: SystemTime) -> Duration {
    now.duration_since(entry.response_date())
        .unwrap_or(Duration::ZERO)
}

/// Whether a revalidation response predates the entry it validates by more than `skew`
///
/// Responses or entries without a parseable `Date` are never too old.
pub fn revalidation_response_is_too_old(
    response_headers: &http::HeaderMap,
    entry: &CacheEntry,
    skew: Duration,
) -> bool {
    match (parse_date_header(response_headers, DATE), entry.date()) {
        (Some(response_date), Some(entry_date)) => entry_date
            .duration_since(response_date)
            .is_ok_and(|behind| behind > skew),
        _ => false,
    }
}
