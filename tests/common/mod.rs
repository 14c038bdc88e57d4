// Shared helpers for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_cache_exec::{Body, CacheConfig, CacheError, CachingExec, ExecChain, ExecScope, HttpHost, InMemoryHttpCache, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// A request as the backend saw it
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub entity: Option<Bytes>,
}

type Responder = dyn Fn(usize, &SeenRequest) -> Pin<Box<dyn Future<Output = Result<Response<Body>>> + Send>>
    + Send
    + Sync;

/// Backend double answering each call with a scripted response
pub struct ScriptedChain {
    calls: AtomicUsize,
    seen: Mutex<Vec<SeenRequest>>,
    responder: Box<Responder>,
}

impl ScriptedChain {
    /// Answer every call with the response built by `respond(call_index, request)`
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(usize, &SeenRequest) -> Response<Body> + Send + Sync + 'static,
    {
        ScriptedChain::new_async(move |call, seen| {
            let response = respond(call, seen);
            Box::pin(async move { Ok::<_, CacheError>(response) })
        })
    }

    pub fn new_async<F>(respond: F) -> Self
    where
        F: Fn(usize, &SeenRequest) -> Pin<Box<dyn Future<Output = Result<Response<Body>>> + Send>>
            + Send
            + Sync
            + 'static,
    {
        ScriptedChain {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            responder: Box::new(respond),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecChain for ScriptedChain {
    async fn proceed(&self, request: Request<()>, entity: Option<Bytes>) -> Result<Response<Body>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let seen = SeenRequest {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            entity,
        };
        self.seen.lock().unwrap().push(seen.clone());
        (self.responder)(call, &seen).await
    }
}

pub fn host() -> HttpHost {
    HttpHost::new("http", "example.com", None)
}

pub fn http_date(offset_secs: i64) -> String {
    let now = SystemTime::now();
    let at = if offset_secs >= 0 {
        now + Duration::from_secs(offset_secs as u64)
    } else {
        now - Duration::from_secs(offset_secs.unsigned_abs())
    };
    httpdate::fmt_http_date(at)
}

/// Build a backend response with a full body
pub fn response(status: StatusCode, headers: &[(&str, String)], body: &[u8]) -> Response<Body> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }
    let body = if body.is_empty() && status == StatusCode::NOT_MODIFIED {
        Body::empty()
    } else {
        Body::Full(Bytes::copy_from_slice(body))
    };
    builder.body(body).unwrap()
}

/// Build a backend response whose body arrives in `chunk_size` pieces
pub fn streamed_response(status: StatusCode, headers: &[(&str, String)], body: Vec<u8>, chunk_size: usize) -> Response<Body> {
    let (tx, streamed) = Body::channel(4);
    tokio::spawn(async move {
        for chunk in body.chunks(chunk_size.max(1)) {
            if tx.send(Ok(Bytes::copy_from_slice(chunk))).await.is_err() {
                break;
            }
        }
    });

    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }
    builder.body(streamed).unwrap()
}

pub fn executor(config: CacheConfig) -> (CachingExec, Arc<InMemoryHttpCache>) {
    let cache = Arc::new(InMemoryHttpCache::new());
    let exec = CachingExec::new(cache.clone(), Arc::new(config));
    (exec, cache)
}

pub fn scope() -> ExecScope {
    let (scope, _cancel) = ExecScope::new(host());
    scope
}

pub fn get(uri: &str) -> Request<()> {
    Request::get(uri).body(()).unwrap()
}
