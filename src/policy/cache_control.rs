//! Cache-Control and Pragma parsing

use http::header::{CACHE_CONTROL, PRAGMA};
use http::HeaderMap;
use std::time::Duration;

/// Parsed `Cache-Control` directives of a request or response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheControl {
    pub public: bool,
    pub private: bool,
    pub no_cache: bool,
    /// Field names listed in a `no-cache="..."` directive
    pub no_cache_fields: Vec<String>,
    pub no_store: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub only_if_cached: bool,
    pub max_age: Option<Duration>,
    pub s_maxage: Option<Duration>,
    /// `max-stale` without a value accepts any staleness and parses as `Duration::MAX`
    pub max_stale: Option<Duration>,
    pub min_fresh: Option<Duration>,
    pub stale_if_error: Option<Duration>,
}

impl CacheControl {
    /// Whether any directive grants the response an explicit lifetime or visibility
    pub fn is_explicitly_cacheable(&self) -> bool {
        self.public
            || self.max_age.is_some()
            || self.s_maxage.is_some()
            || self.must_revalidate
            || self.proxy_revalidate
    }
}

/// Parse every `Cache-Control` header in the map
///
/// Unknown directives are ignored. A malformed `max-age` or `s-maxage`
/// value parses as zero so that the response is treated as stale.
pub fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut cc = CacheControl::default();

    for value in headers.get_all(CACHE_CONTROL) {
        let Ok(s) = value.to_str() else {
            continue;
        };

        for directive in split_directives(s) {
            let (name, argument) = match directive.split_once('=') {
                Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
                None => (directive.trim(), None),
            };

            match name.to_ascii_lowercase().as_str() {
                "public" => cc.public = true,
                "private" => cc.private = true,
                "no-store" => cc.no_store = true,
                "must-revalidate" => cc.must_revalidate = true,
                "proxy-revalidate" => cc.proxy_revalidate = true,
                "only-if-cached" => cc.only_if_cached = true,
                "no-cache" => {
                    cc.no_cache = true;
                    if let Some(fields) = argument {
                        cc.no_cache_fields.extend(
                            fields
                                .split(',')
                                .map(|f| f.trim().to_ascii_lowercase())
                                .filter(|f| !f.is_empty()),
                        );
                    }
                }
                "max-age" => cc.max_age = Some(delta_seconds(argument).unwrap_or(Duration::ZERO)),
                "s-maxage" => cc.s_maxage = Some(delta_seconds(argument).unwrap_or(Duration::ZERO)),
                "max-stale" => {
                    cc.max_stale = match argument {
                        None => Some(Duration::MAX),
                        Some(_) => delta_seconds(argument),
                    }
                }
                "min-fresh" => cc.min_fresh = delta_seconds(argument),
                "stale-if-error" => cc.stale_if_error = delta_seconds(argument),
                _ => {}
            }
        }
    }
    cc
}

/// Whether the headers carry `Pragma: no-cache`
pub fn pragma_no_cache(headers: &HeaderMap) -> bool {
    headers
        .get_all(PRAGMA)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("no-cache"))
}

fn delta_seconds(argument: Option<&str>) -> Option<Duration> {
    argument?.parse::<u64>().ok().map(Duration::from_secs)
}

/// Split a header value on commas that are not inside a quoted string
fn split_directives(value: &str) -> Vec<&str> {
    let mut directives = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                directives.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    directives.push(&value[start..]);

    directives.into_iter().filter(|d| !d.trim().is_empty()).collect()
}
