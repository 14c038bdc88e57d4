mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::*;
use http::header::{HeaderValue, CACHE_CONTROL, DATE};
use http::{Request, Response, StatusCode};
use http_cache_exec::{
    Body, CacheConfig, CacheEntry, CacheError, CacheResponseStatus, CachingExec, ExecScope, HttpCache, HttpHost,
    InMemoryHttpCache, Resource, ResponseHead, Result, Variant,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn fresh_headers() -> Vec<(&'static str, String)> {
    vec![("date", http_date(0)), ("cache-control", "max-age=600".to_string())]
}

#[tokio::test]
async fn test_newer_entry_committed_meanwhile_wins() {
    let (exec, cache) = executor(CacheConfig::default());
    let racing = cache.clone();

    // while the backend is busy, another request commits a newer response
    let chain = ScriptedChain::new_async(move |_, _| {
        let racing = racing.clone();
        Box::pin(async move {
            let head = ResponseHead::new(StatusCode::OK)
                .with_header(DATE, HeaderValue::from_str(&http_date(0)).unwrap())
                .with_header(CACHE_CONTROL, HeaderValue::from_static("max-age=600"));
            let now = SystemTime::now();
            racing
                .create_entry(&host(), &get("/race"), &head, Some(Bytes::from_static(b"newer")), now, now)
                .await?;

            Ok::<_, CacheError>(response(
                StatusCode::OK,
                &[("date", http_date(-50)), ("cache-control", "max-age=600".to_string())],
                b"older",
            ))
        })
    });

    let response = exec.execute(get("/race"), None, &scope(), &chain).await.unwrap();
    assert_eq!(response.into_body().collect().await.unwrap(), "newer");

    let stored = cache.get_entry(&host(), &get("/race")).await.unwrap().unwrap();
    assert_eq!(stored.resource().unwrap().get().unwrap(), "newer");
    assert_eq!(exec.metrics().get_stats().entries_committed, 0);
}

#[tokio::test]
async fn test_concurrent_requests_all_complete() {
    let (exec, cache) = executor(CacheConfig::default());
    let exec = Arc::new(exec);
    let chain = Arc::new(ScriptedChain::new(|_, _| response(StatusCode::OK, &fresh_headers(), b"shared")));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let exec = exec.clone();
        let chain = chain.clone();
        handles.push(tokio::spawn(async move {
            let scope = scope();
            let response = exec.execute(get("/shared"), None, &scope, chain.as_ref()).await?;
            response.into_body().collect().await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "shared");
    }
    assert!(chain.calls() >= 1);
    assert_eq!(cache.get_stats().total_entries, 1);
}

#[tokio::test]
async fn test_cancellation_interrupts_backend_call() {
    let (exec, _cache) = executor(CacheConfig::default());
    let chain = ScriptedChain::new_async(|_, _| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, CacheError>(response(StatusCode::OK, &fresh_headers(), b"late"))
        })
    });

    let (scope, cancel) = ExecScope::new(host());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let err = exec.execute(get("/slow"), None, &scope, &chain).await.unwrap_err();
    assert!(err.is_interrupted());
    assert_eq!(chain.calls(), 1);
}

#[tokio::test]
async fn test_cancellation_while_buffering_body_stores_nothing() {
    let (exec, cache) = executor(CacheConfig::default());
    let chain = ScriptedChain::new(|_, _| {
        let (tx, body) = Body::channel(4);
        tokio::spawn(async move {
            let _ = tx.send(Ok(Bytes::from_static(b"partial"))).await;
            // the rest of the body never arrives
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(tx);
        });
        let mut response = Response::new(body);
        for (name, value) in fresh_headers() {
            response
                .headers_mut()
                .insert(name, HeaderValue::from_str(&value).unwrap());
        }
        response
    });

    let (scope, cancel) = ExecScope::new(host());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let err = exec.execute(get("/partial"), None, &scope, &chain).await.unwrap_err();
    assert!(err.is_interrupted());
    assert_eq!(chain.calls(), 1);
    assert!(cache.get_entry(&host(), &get("/partial")).await.unwrap().is_none());
    assert_eq!(cache.get_stats().total_entries, 0);
    assert_eq!(exec.metrics().get_stats().entries_committed, 0);
}

#[tokio::test]
async fn test_cancellation_during_commit_stores_nothing() {
    let stalled = Arc::new(FaultyCache {
        commit_delay: Some(Duration::from_secs(3600)),
        ..Default::default()
    });
    let exec = CachingExec::new(stalled.clone(), Arc::new(CacheConfig::default()));
    let chain = ScriptedChain::new(|_, _| response(StatusCode::OK, &fresh_headers(), b"body"));

    let (scope, cancel) = ExecScope::new(host());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let err = exec.execute(get("/stalled"), None, &scope, &chain).await.unwrap_err();
    assert!(err.is_interrupted());
    assert_eq!(chain.calls(), 1);
    assert_eq!(stalled.inner.get_stats().total_entries, 0);
    assert_eq!(exec.metrics().get_stats().entries_committed, 0);
}

#[tokio::test]
async fn test_cancelled_before_start_never_calls_backend() {
    let (exec, _cache) = executor(CacheConfig::default());
    let chain = ScriptedChain::new(|_, _| response(StatusCode::OK, &fresh_headers(), b"x"));

    let (scope, cancel) = ExecScope::new(host());
    cancel.cancel();

    let err = exec.execute(get("/never"), None, &scope, &chain).await.unwrap_err();
    assert!(matches!(err, CacheError::Interrupted));
    assert_eq!(chain.calls(), 0);
}

/// Body that can no longer be read back
#[derive(Debug)]
struct LostResource;

impl Resource for LostResource {
    fn get(&self) -> Result<Bytes> {
        Err(CacheError::storage("resource file is gone"))
    }

    fn length(&self) -> usize {
        0
    }
}

/// Store wrapper with injectable faults
#[derive(Default)]
struct FaultyCache {
    inner: InMemoryHttpCache,
    /// Entries lose their bodies on the way out
    lose_bodies: bool,
    /// Writes of new entries stall this long
    commit_delay: Option<Duration>,
}

#[async_trait]
impl HttpCache for FaultyCache {
    async fn flush_for(&self, host: &HttpHost, request: &Request<()>) -> Result<()> {
        self.inner.flush_for(host, request).await
    }

    async fn flush_invalidated_for(&self, host: &HttpHost, request: &Request<()>) -> Result<()> {
        self.inner.flush_invalidated_for(host, request).await
    }

    async fn flush_invalidated_for_response(
        &self,
        host: &HttpHost,
        request: &Request<()>,
        response: &ResponseHead,
    ) -> Result<()> {
        self.inner.flush_invalidated_for_response(host, request, response).await
    }

    async fn get_entry(&self, host: &HttpHost, request: &Request<()>) -> Result<Option<Arc<CacheEntry>>> {
        let entry = self.inner.get_entry(host, request).await?;
        if !self.lose_bodies {
            return Ok(entry);
        }
        Ok(entry.map(|entry| {
            Arc::new(CacheEntry::new(
                entry.request_date(),
                entry.response_date(),
                entry.status(),
                entry.headers().clone(),
                Some(Arc::new(LostResource) as Arc<dyn Resource>),
            ))
        }))
    }

    async fn get_variants(&self, host: &HttpHost, request: &Request<()>) -> Result<HashMap<String, Variant>> {
        self.inner.get_variants(host, request).await
    }

    async fn create_entry(
        &self,
        host: &HttpHost,
        request: &Request<()>,
        response: &ResponseHead,
        content: Option<Bytes>,
        request_sent: SystemTime,
        response_received: SystemTime,
    ) -> Result<Arc<CacheEntry>> {
        if let Some(delay) = self.commit_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner
            .create_entry(host, request, response, content, request_sent, response_received)
            .await
    }

    async fn update_entry(
        &self,
        host: &HttpHost,
        request: &Request<()>,
        stale_entry: &CacheEntry,
        response: &ResponseHead,
        request_sent: SystemTime,
        response_received: SystemTime,
    ) -> Result<Arc<CacheEntry>> {
        self.inner
            .update_entry(host, request, stale_entry, response, request_sent, response_received)
            .await
    }

    async fn update_variant_entry(
        &self,
        host: &HttpHost,
        request: &Request<()>,
        stale_entry: &CacheEntry,
        response: &ResponseHead,
        request_sent: SystemTime,
        response_received: SystemTime,
        cache_key: &str,
    ) -> Result<Arc<CacheEntry>> {
        self.inner
            .update_variant_entry(host, request, stale_entry, response, request_sent, response_received, cache_key)
            .await
    }

    async fn reuse_variant(&self, host: &HttpHost, request: &Request<()>, variant: &Variant) -> Result<()> {
        self.inner.reuse_variant(host, request, variant).await
    }
}

fn lossy_executor() -> CachingExec {
    let lossy = Arc::new(FaultyCache {
        lose_bodies: true,
        ..Default::default()
    });
    CachingExec::new(lossy, Arc::new(CacheConfig::default()))
}

#[tokio::test]
async fn test_unreadable_entry_falls_back_to_backend() {
    let exec = lossy_executor();
    let chain = ScriptedChain::new(|call, _| {
        let body = if call == 0 { "first" } else { "second" };
        response(StatusCode::OK, &fresh_headers(), body.as_bytes())
    });

    let first = exec.execute(get("/lost"), None, &scope(), &chain).await.unwrap();
    assert_eq!(first.into_body().collect().await.unwrap(), "first");

    let scope = scope();
    let response = exec.execute(get("/lost"), None, &scope, &chain).await.unwrap();

    assert_eq!(response.into_body().collect().await.unwrap(), "second");
    assert_eq!(scope.context().cache_response_status(), CacheResponseStatus::Failure);
    assert_eq!(chain.calls(), 2);
    assert_eq!(exec.metrics().get_stats().cache_failures, 1);
}

#[tokio::test]
async fn test_unreadable_entry_with_only_if_cached_answers_504() {
    let exec = lossy_executor();
    let chain = ScriptedChain::new(|_, _| response(StatusCode::OK, &fresh_headers(), b"body"));

    exec.execute(get("/lost"), None, &scope(), &chain).await.unwrap();

    let request = Request::get("/lost")
        .header("cache-control", "only-if-cached")
        .body(())
        .unwrap();
    let response = exec.execute(request, None, &scope(), &chain).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(chain.calls(), 1);
}
