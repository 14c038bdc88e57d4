//! `reqwest` backed implementation of the next handler

use crate::body::Body;
use crate::chain::ExecChain;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Sends requests to the origin over HTTP
///
/// Response bodies are streamed chunk by chunk into a bounded [`Body`]
/// channel, so a consumer that stops reading also stops the download.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http_client: Client,
    /// Capacity of the body channel, in chunks
    channel_capacity: usize,
}

impl UpstreamClient {
    /// Create a new UpstreamClient
    ///
    /// # Returns
    /// * `Err(CacheError::ConfigError)` if the HTTP client cannot be built
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| CacheError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(UpstreamClient {
            http_client,
            channel_capacity: config.stream_buffer_chunks,
        })
    }

    fn build_request(&self, request: &Request<()>, entity: Option<Bytes>) -> reqwest::RequestBuilder {
        let mut builder = self
            .http_client
            .request(request.method().clone(), request.uri().to_string())
            .headers(request.headers().clone());

        if let Some(entity) = entity {
            builder = builder.body(entity);
        }
        builder
    }
}

#[async_trait]
impl ExecChain for UpstreamClient {
    async fn proceed(&self, request: Request<()>, entity: Option<Bytes>) -> Result<Response<Body>> {
        debug!("Forwarding request upstream: method={}, uri={}", request.method(), request.uri());

        let mut upstream = self
            .build_request(&request, entity)
            .send()
            .await
            .map_err(|e| CacheError::backend(format!("Request failed: {}", e)))?;

        let status = upstream.status();
        let version = upstream.version();
        let headers = std::mem::take(upstream.headers_mut());

        debug!("Upstream responded: status={}, uri={}", status, request.uri());

        let body = if upstream.content_length() == Some(0) {
            Body::Full(Bytes::new())
        } else {
            let (tx, body) = Body::channel(self.channel_capacity);
            tokio::spawn(async move {
                loop {
                    match upstream.chunk().await {
                        Ok(Some(chunk)) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx
                                .send(Err(CacheError::backend(format!("Failed to read response body: {}", e))))
                                .await;
                            break;
                        }
                    }
                }
            });
            body
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
