//! Backend invocation, response buffering and commit

use super::{generate_via_header, CachingExec, Exchange};
use crate::body::Body;
use crate::error::Result;
use crate::models::{date_is_after, ResponseHead};
use crate::policy::copy_request;
use bytes::BytesMut;
use http::header::{IF_MODIFIED_SINCE, LAST_MODIFIED, VIA};
use http::{Request, Response, StatusCode};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Call-site specific hook into a backend call
///
/// The plain backend call accepts every response. Revalidation and variant
/// negotiation use it to take over responses (a 304, a stale-if-error
/// candidate, a response that is too old) instead of streaming them to the
/// client.
pub(crate) trait BackendCallback: Send {
    /// Whether the response may go on to the cacheability policy
    ///
    /// Called once, with the compliant response head, before the body is read.
    fn cache_response(&mut self, response: &ResponseHead) -> bool;

    /// Whether a response refused by [`cache_response`](Self::cache_response)
    /// should still be streamed to the client
    ///
    /// Returning `false` takes the response over: its body is discarded and
    /// the call yields [`BackendOutcome::Intercepted`].
    fn forward_response(&self, response: &ResponseHead) -> bool;
}

/// Accepts every backend response
#[derive(Debug, Default)]
pub(crate) struct PlainCallback;

impl BackendCallback for PlainCallback {
    fn cache_response(&mut self, _response: &ResponseHead) -> bool {
        true
    }

    fn forward_response(&self, _response: &ResponseHead) -> bool {
        true
    }
}

/// Result of a single backend call
#[derive(Debug)]
pub(crate) enum BackendOutcome {
    /// A response for the client, either passed through or built from a new entry
    Response(Response<Body>),
    /// The callback took the response over; only its head is kept
    Intercepted(ResponseHead),
}

/// In-flight state of a cacheable backend response
///
/// Owned by exactly one backend call and dropped once the entry is committed
/// or caching is abandoned.
struct ResponseState {
    head: ResponseHead,
    request_date: SystemTime,
    response_date: SystemTime,
    buffer: BytesMut,
}

impl CachingExec {
    /// Forward a request to the backend with the plain callback
    pub(crate) async fn call_backend(&self, exchange: &Exchange<'_>, request: Request<()>) -> Result<Response<Body>> {
        match self
            .call_backend_with(exchange, request, &mut PlainCallback)
            .await?
        {
            BackendOutcome::Response(response) => Ok(response),
            BackendOutcome::Intercepted(head) => Ok(head.into_response(Body::empty())),
        }
    }

    /// Forward a request to the backend, consulting `callback` on the response
    ///
    /// A cacheable response is buffered in full and committed to the store.
    /// If the body outgrows `max_object_size`, caching is abandoned and the
    /// response streams to the client instead.
    pub(crate) async fn call_backend_with(
        &self,
        exchange: &Exchange<'_>,
        request: Request<()>,
        callback: &mut dyn BackendCallback,
    ) -> Result<BackendOutcome> {
        let scope = exchange.scope;
        let request_date = SystemTime::now();

        debug!("Calling the backend: method={}, uri={}", request.method(), request.uri());
        self.metrics.record_backend_call();

        let response = scope
            .guard(exchange.chain.proceed(copy_request(&request), exchange.entity.clone()))
            .await?;
        let response_date = SystemTime::now();

        let (parts, body) = response.into_parts();
        let mut head = ResponseHead::from_parts(parts);
        head.headers.append(VIA, generate_via_header(head.version));
        self.response_compliance
            .ensure_protocol_compliance(&request, &mut head, body.has_entity())?;

        if let Err(e) = scope
            .guard(
                self.cache
                    .flush_invalidated_for_response(&exchange.target, &request, &head),
            )
            .await
        {
            if e.is_interrupted() {
                return Err(e);
            }
            warn!("Unable to flush invalidated entries from cache: {}", e);
        }

        // a response the call site takes over leaves storage to the call site
        if !callback.cache_response(&head) {
            if callback.forward_response(&head) {
                return Ok(BackendOutcome::Response(head.into_response(body)));
            }
            debug!("Backend response taken over: status={}", head.status);
            return Ok(BackendOutcome::Intercepted(head));
        }

        if !self.response_policy.is_response_cacheable(&request, &head) {
            debug!("Backend response is not cacheable: status={}", head.status);
            if let Err(e) = scope
                .guard(self.cache.flush_for(&exchange.target, &request))
                .await
            {
                if e.is_interrupted() {
                    return Err(e);
                }
                warn!("Unable to flush invalid cache entries: {}", e);
            }
            return Ok(BackendOutcome::Response(head.into_response(body)));
        }

        debug!("Backend response is cacheable: status={}", head.status);
        store_request_if_modified_since_for_304(&request, &mut head);

        let state = ResponseState {
            head,
            request_date,
            response_date,
            buffer: BytesMut::new(),
        };
        self.buffer_and_commit(exchange, request, state, body)
            .await
            .map(BackendOutcome::Response)
    }

    async fn buffer_and_commit(
        &self,
        exchange: &Exchange<'_>,
        request: Request<()>,
        mut state: ResponseState,
        mut body: Body,
    ) -> Result<Response<Body>> {
        let has_entity = body.has_entity();

        while let Some(chunk) = exchange.scope.interruptible(body.next_chunk()).await? {
            let chunk = chunk?;
            self.metrics.record_bytes_from_backend(chunk.len() as u64);
            state.buffer.extend_from_slice(&chunk);

            if state.buffer.len() > self.config.max_object_size {
                debug!(
                    "Backend response content length exceeds maximum: {} > {}",
                    state.buffer.len(),
                    self.config.max_object_size
                );
                self.metrics.record_oversized_response();
                return Ok(self.replay_oversized(exchange, state, body));
            }
        }

        let content = has_entity.then(|| state.buffer.freeze());
        self.commit(exchange, request, state.head, content, state.request_date, state.response_date)
            .await
    }

    /// Stream the buffered prefix and the rest of the body to the client
    ///
    /// Once the prefix is replayed, chunks flow through a bounded channel, so
    /// a slow client slows down reading from the backend again.
    fn replay_oversized(&self, exchange: &Exchange<'_>, state: ResponseState, mut body: Body) -> Response<Body> {
        let (tx, replay) = Body::channel(self.config.stream_buffer_chunks);
        let prefix = state.buffer.freeze();
        let scope = exchange.scope.clone();

        tokio::spawn(async move {
            if tx.send(Ok(prefix)).await.is_err() {
                return;
            }
            loop {
                match scope.interruptible(body.next_chunk()).await {
                    Ok(Some(chunk)) => {
                        if tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        state.head.into_response(replay)
    }

    /// Commit a fully buffered response, unless a newer entry won the race
    async fn commit(
        &self,
        exchange: &Exchange<'_>,
        request: Request<()>,
        head: ResponseHead,
        content: Option<bytes::Bytes>,
        request_date: SystemTime,
        response_date: SystemTime,
    ) -> Result<Response<Body>> {
        let scope = exchange.scope;
        let existing = scope
            .guard(self.cache.get_entry(&exchange.target, &request))
            .await?;

        if let Some(existing) = existing {
            if date_is_after(existing.date(), head.date()) {
                debug!("Backend already contains fresher cache entry");
                return self.materialize(&request, &existing, SystemTime::now());
            }
        }

        let entry = scope
            .guard(self.cache.create_entry(
                &exchange.target,
                &request,
                &head,
                content,
                request_date,
                response_date,
            ))
            .await?;
        self.metrics.record_entry_committed();
        debug!("Backend response successfully cached");

        self.materialize(&request, &entry, SystemTime::now())
    }
}

/// Record the validator a cacheable 304 answered, since the 304 itself
/// carries no `Last-Modified`
fn store_request_if_modified_since_for_304(request: &Request<()>, head: &mut ResponseHead) {
    if head.status != StatusCode::NOT_MODIFIED || head.headers.contains_key(LAST_MODIFIED) {
        return;
    }
    if let Some(since) = request.headers().get(IF_MODIFIED_SINCE) {
        head.headers.insert(LAST_MODIFIED, since.clone());
    }
}
