//! Policy collaborators consulted by the caching executor
//!
//! Every policy is a plain value built from [`CacheConfig`](crate::config::CacheConfig).
//! None of them performs I/O.

pub mod cache_control;
pub mod conditional;
pub mod generator;
pub mod request;
pub mod response;
pub mod suitability;
pub mod validity;

pub use cache_control::{parse_cache_control, CacheControl};
pub use conditional::{copy_request, ConditionalRequestBuilder};
pub use generator::{add_stale_warning, CachedResponseGenerator};
pub use request::{CacheableRequestPolicy, RequestProtocolCompliance, RequestProtocolError};
pub use response::{ResponseCachingPolicy, ResponseProtocolCompliance};
pub use suitability::CachedResponseSuitabilityChecker;
pub use validity::{revalidation_response_is_too_old, CacheValidityPolicy};
