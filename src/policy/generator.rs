//! Materializes client responses out of stored entries

use super::validity::CacheValidityPolicy;
use crate::body::Body;
use crate::error::Result;
use crate::models::CacheEntry;
use http::header::{
    HeaderValue, AGE, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_LOCATION, DATE, ETAG, EXPIRES, TRANSFER_ENCODING,
    VARY, WARNING,
};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use std::time::SystemTime;

/// `Warning` attached to a response served while stale
pub const STALE_WARNING: &str = "110 localhost \"Response is stale\"";

/// Add the staleness warning unless the response already carries it
pub fn add_stale_warning(headers: &mut HeaderMap) {
    let present = headers
        .get_all(WARNING)
        .iter()
        .any(|v| v.as_bytes() == STALE_WARNING.as_bytes());
    if !present {
        headers.append(WARNING, HeaderValue::from_static(STALE_WARNING));
    }
}

/// Generates responses from cache entries
#[derive(Debug, Clone)]
pub struct CachedResponseGenerator {
    validity: CacheValidityPolicy,
}

impl CachedResponseGenerator {
    pub fn new(validity: CacheValidityPolicy) -> Self {
        CachedResponseGenerator { validity }
    }

    /// Build the full response stored in `entry`
    ///
    /// The response carries the stored status and headers plus an `Age`
    /// header. Responses to HEAD get no body; all others get the stored body
    /// and a matching `Content-Length`.
    ///
    /// # Returns
    /// * `Err(CacheError::StorageError)` if the stored body cannot be read
    pub fn generate_response(&self, request: &Request<()>, entry: &CacheEntry, now: SystemTime) -> Result<Response<Body>> {
        let mut headers = entry.headers().clone();

        let body = match entry.resource() {
            Some(resource) if request.method() != Method::HEAD => {
                let content = resource.get()?;
                headers.remove(TRANSFER_ENCODING);
                headers.insert(CONTENT_LENGTH, HeaderValue::from(content.len()));
                Body::Full(content)
            }
            _ => Body::empty(),
        };

        let age = self.validity.current_age(entry, now).as_secs();
        if age > 0 {
            headers.insert(AGE, HeaderValue::from(age));
        }

        let mut response = Response::new(body);
        *response.status_mut() = entry.status();
        *response.headers_mut() = headers;
        Ok(response)
    }

    /// Build a 304 answering a conditional request from `entry`
    pub fn generate_not_modified_response(&self, entry: &CacheEntry) -> Response<Body> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        let headers = response.headers_mut();

        match entry.headers().get(DATE) {
            Some(date) => {
                headers.insert(DATE, date.clone());
            }
            None => {
                if let Ok(date) = HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now())) {
                    headers.insert(DATE, date);
                }
            }
        }

        for name in [ETAG, CONTENT_LOCATION, EXPIRES, CACHE_CONTROL, VARY] {
            for value in entry.headers().get_all(&name) {
                headers.append(name.clone(), value.clone());
            }
        }

        response
    }
}
