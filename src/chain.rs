//! The next handler in the request pipeline

use crate::body::Body;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

/// Forwards a request towards the origin
///
/// The caching executor calls `proceed` zero or more times per request.
/// Each call owns its request, so conditional and unconditional variants
/// of the same request can be sent independently.
#[async_trait]
pub trait ExecChain: Send + Sync {
    /// Send the request with an optional entity and return the response head
    /// along with its (possibly still streaming) body
    async fn proceed(&self, request: Request<()>, entity: Option<Bytes>) -> Result<Response<Body>>;
}
