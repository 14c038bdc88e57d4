mod common;

use common::*;
use http::{Request, StatusCode};
use http_cache_exec::{CacheConfig, CacheResponseStatus, HttpCache};

fn encoded(encoding: &str) -> Request<()> {
    Request::get("/page")
        .header("accept-encoding", encoding)
        .body(())
        .unwrap()
}

fn variant_headers(etag: &str) -> Vec<(&'static str, String)> {
    vec![
        ("date", http_date(0)),
        ("cache-control", "max-age=600".to_string()),
        ("vary", "Accept-Encoding".to_string()),
        ("etag", etag.to_string()),
    ]
}

fn not_modified(etag: Option<&str>) -> http::Response<http_cache_exec::Body> {
    let mut headers = vec![("date", http_date(0))];
    if let Some(etag) = etag {
        headers.push(("etag", etag.to_string()));
    }
    response(StatusCode::NOT_MODIFIED, &headers, b"")
}

#[tokio::test]
async fn test_negotiation_selects_variant_by_etag() {
    let (exec, cache) = executor(CacheConfig::default());
    let chain = ScriptedChain::new(|call, _| match call {
        0 => response(StatusCode::OK, &variant_headers("\"v1\""), b"gzip body"),
        1 => response(StatusCode::OK, &variant_headers("\"v2\""), b"br body"),
        _ => response(
            StatusCode::NOT_MODIFIED,
            &[
                ("date", http_date(0)),
                ("etag", "\"v2\"".to_string()),
                ("cache-control", "max-age=900".to_string()),
            ],
            b"",
        ),
    });

    let gzip = exec.execute(encoded("gzip"), None, &scope(), &chain).await.unwrap();
    assert_eq!(gzip.into_body().collect().await.unwrap(), "gzip body");

    let br = exec.execute(encoded("br"), None, &scope(), &chain).await.unwrap();
    assert_eq!(br.into_body().collect().await.unwrap(), "br body");
    assert_eq!(chain.seen()[1].headers["if-none-match"], "\"v1\"");

    let gzip_before = cache.get_entry(&host(), &encoded("gzip")).await.unwrap().unwrap();

    let negotiated_scope = scope();
    let negotiated = exec
        .execute(encoded("identity"), None, &negotiated_scope, &chain)
        .await
        .unwrap();
    assert_eq!(negotiated.status(), StatusCode::OK);
    assert_eq!(negotiated.into_body().collect().await.unwrap(), "br body");
    assert_eq!(chain.seen()[2].headers["if-none-match"], "\"v1\", \"v2\"");
    assert_eq!(
        negotiated_scope.context().cache_response_status(),
        CacheResponseStatus::Validated
    );

    // only the matched variant took the 304's headers
    let gzip_after = cache.get_entry(&host(), &encoded("gzip")).await.unwrap().unwrap();
    assert_eq!(gzip_after.headers(), gzip_before.headers());
    assert_eq!(gzip_after.response_date(), gzip_before.response_date());
    assert_eq!(gzip_after.headers()["cache-control"], "max-age=600");
    let br_after = cache.get_entry(&host(), &encoded("br")).await.unwrap().unwrap();
    assert_eq!(br_after.headers()["cache-control"], "max-age=900");

    let reused_scope = scope();
    let reused = exec
        .execute(encoded("identity"), None, &reused_scope, &chain)
        .await
        .unwrap();
    assert_eq!(reused.into_body().collect().await.unwrap(), "br body");
    assert_eq!(reused_scope.context().cache_response_status(), CacheResponseStatus::CacheHit);

    let gzip_again = exec.execute(encoded("gzip"), None, &scope(), &chain).await.unwrap();
    assert_eq!(gzip_again.into_body().collect().await.unwrap(), "gzip body");

    assert_eq!(chain.calls(), 3);
}

#[tokio::test]
async fn test_negotiation_304_with_unknown_etag_falls_back() {
    let (exec, _cache) = executor(CacheConfig::default());
    let chain = ScriptedChain::new(|call, _| match call {
        0 => response(StatusCode::OK, &variant_headers("\"v1\""), b"gzip body"),
        1 => not_modified(Some("\"unknown\"")),
        _ => response(StatusCode::OK, &variant_headers("\"v3\""), b"deflate body"),
    });

    exec.execute(encoded("gzip"), None, &scope(), &chain).await.unwrap();
    let response = exec.execute(encoded("deflate"), None, &scope(), &chain).await.unwrap();

    assert_eq!(response.into_body().collect().await.unwrap(), "deflate body");
    assert_eq!(chain.calls(), 3);
    assert!(!chain.seen()[2].headers.contains_key("if-none-match"));
}

#[tokio::test]
async fn test_negotiation_304_without_etag_falls_back() {
    let (exec, _cache) = executor(CacheConfig::default());
    let chain = ScriptedChain::new(|call, _| match call {
        0 => response(StatusCode::OK, &variant_headers("\"v1\""), b"gzip body"),
        1 => not_modified(None),
        _ => response(StatusCode::OK, &variant_headers("\"v3\""), b"deflate body"),
    });

    exec.execute(encoded("gzip"), None, &scope(), &chain).await.unwrap();
    let response = exec.execute(encoded("deflate"), None, &scope(), &chain).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.into_body().collect().await.unwrap(), "deflate body");
    assert_eq!(chain.calls(), 3);
}

#[tokio::test]
async fn test_negotiation_answers_304_when_client_conditional_matches() {
    let (exec, _cache) = executor(CacheConfig::default());
    let chain = ScriptedChain::new(|call, _| match call {
        0 => response(StatusCode::OK, &variant_headers("\"v1\""), b"gzip body"),
        1 => response(StatusCode::OK, &variant_headers("\"v2\""), b"br body"),
        _ => not_modified(Some("\"v2\"")),
    });

    exec.execute(encoded("gzip"), None, &scope(), &chain).await.unwrap();
    exec.execute(encoded("br"), None, &scope(), &chain).await.unwrap();

    let request = Request::get("/page")
        .header("accept-encoding", "identity")
        .header("if-none-match", "\"v2\"")
        .body(())
        .unwrap();
    let response = exec.execute(request, None, &scope(), &chain).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()["etag"], "\"v2\"");
    assert_eq!(chain.seen()[2].headers["if-none-match"], "\"v1\", \"v2\"");
    assert_eq!(chain.calls(), 3);
}

#[tokio::test]
async fn test_negotiation_304_older_than_variant_retries_unconditionally() {
    let (exec, _cache) = executor(CacheConfig::default());
    let chain = ScriptedChain::new(|call, _| match call {
        0 => response(StatusCode::OK, &variant_headers("\"v1\""), b"gzip body"),
        1 => response(
            StatusCode::NOT_MODIFIED,
            &[("date", http_date(-60)), ("etag", "\"v1\"".to_string())],
            b"",
        ),
        _ => response(StatusCode::OK, &variant_headers("\"v3\""), b"identity body"),
    });

    exec.execute(encoded("gzip"), None, &scope(), &chain).await.unwrap();

    let retried_scope = scope();
    let response = exec
        .execute(encoded("identity"), None, &retried_scope, &chain)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.into_body().collect().await.unwrap(), "identity body");
    assert_eq!(chain.calls(), 3);

    let seen = chain.seen();
    assert_eq!(seen[1].headers["if-none-match"], "\"v1\"");
    assert!(!seen[2].headers.contains_key("if-none-match"));
    assert_eq!(seen[2].headers["cache-control"], "no-cache");
    assert_ne!(
        retried_scope.context().cache_response_status(),
        CacheResponseStatus::Validated
    );
}
