//! HTTP transport implementation backed by `reqwest`.

use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use std::time::Instant;

use crate::error::TransportError;

use super::protocol::{CoordinatorRequest, CoordinatorResponse, HttpTransport, TransportConfig};

/// Transport that sends coordinator requests over a pooled `reqwest` client.
///
/// The client is cheap to clone and safe to share between executions.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidRequest` if the proxy URL is invalid,
    /// or `TransportError::Tls` if the TLS backend cannot be initialized.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(std::time::Duration::from_secs(90));

        if config.use_tls && !config.validate_server_certificate {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                TransportError::InvalidRequest(format!("invalid proxy '{}': {}", proxy, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Tls(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: CoordinatorRequest) -> Result<CoordinatorResponse, TransportError> {
        let started = Instant::now();
        let method = request.method.clone();
        let url = request.url.clone();

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(TransportError::from)?;
        let status = response.status();
        let headers = response.headers().clone();

        debug!(
            "[TRINO_HTTP] {} {} -> {} in {}ms",
            method,
            url.path(),
            status.as_u16(),
            started.elapsed().as_millis()
        );

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed();

        Ok(CoordinatorResponse::new(status, headers, body))
    }
}
