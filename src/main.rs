//! HTTP Cache Exec demo client
//!
//! Loads configuration, sets up logging and fetches a URL twice through the
//! caching executor, logging how each request was answered.

use anyhow::{Context, Result};
use http::Request;
use http_cache_exec::{CacheConfig, CachingExec, ExecScope, HttpHost, InMemoryHttpCache, UpstreamClient};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Main entry point
///
/// # Usage
/// ```bash
/// # Fetch with the default config (http_cache.yaml, if present)
/// cargo run -- http://example.com/
///
/// # Fetch with a custom config
/// cargo run -- http://example.com/ /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let mut args = env::args().skip(1);
    let url = args
        .next()
        .context("usage: http-cache-exec <url> [config.yaml]")?;
    let config_path = args.next().unwrap_or_else(|| "http_cache.yaml".to_string());

    let config = if Path::new(&config_path).exists() {
        info!("Loading configuration from: {}", config_path);
        CacheConfig::from_file(&config_path)
            .with_context(|| format!("failed to load configuration from {}", config_path))?
    } else {
        warn!("Configuration file {} not found, using defaults", config_path);
        CacheConfig::default()
    };
    info!("  - Max object size: {} bytes", config.max_object_size);
    info!("  - Shared cache: {}", config.shared_cache);
    info!("  - Heuristic caching: {}", config.heuristic_caching_enabled);

    let config = Arc::new(config);
    let upstream = UpstreamClient::new(&config)?;
    let cache = Arc::new(InMemoryHttpCache::new());
    let exec = CachingExec::new(cache.clone(), config);

    let route = url
        .parse::<http::Uri>()
        .ok()
        .and_then(|uri| HttpHost::from_uri(&uri))
        .context("URL must be absolute")?;

    for attempt in 1..=2 {
        let (scope, _cancel) = ExecScope::new(route.clone());
        let request = Request::get(url.as_str()).body(())?;
        let response = exec.execute(request, None, &scope, &upstream).await?;
        let status = response.status();
        let length = response.into_body().collect().await?.len();

        info!(
            "Request {}: status={}, bytes={}, cache={:?}",
            attempt,
            status,
            length,
            scope.context().cache_response_status()
        );
    }

    let stats = exec.metrics().get_stats();
    info!(
        "Requests: {}, hits: {}, misses: {}, backend calls: {}",
        stats.total_requests, stats.cache_hits, stats.cache_misses, stats.backend_calls
    );
    let cache_stats = cache.get_stats();
    info!("Cache entries: {}, bytes: {}", cache_stats.total_entries, cache_stats.total_bytes);

    Ok(())
}
