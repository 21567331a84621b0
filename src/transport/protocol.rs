//! Transport protocol abstraction trait.
//!
//! This module defines the `HttpTransport` trait that abstracts the HTTP client
//! used to talk to the coordinator, together with the transport-neutral request
//! and response types that flow through it.

use crate::error::{TransportError, TrinoError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Streamed response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Parameters for building a transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Coordinator host
    pub host: String,
    /// Coordinator port
    pub port: u16,
    /// Use TLS/SSL
    pub use_tls: bool,
    /// Validate the server certificate chain
    pub validate_server_certificate: bool,
    /// Timeout for a single request/response exchange
    pub request_timeout: Duration,
    /// Timeout for establishing a TCP/TLS connection
    pub connect_timeout: Duration,
    /// Optional proxy URL applied to all requests
    pub proxy: Option<String>,
}

impl TransportConfig {
    /// Create new transport parameters.
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            use_tls: false,
            validate_server_certificate: true,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            proxy: None,
        }
    }

    /// Set whether to use TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the coordinator base URL from parameters.
    pub fn base_url(&self) -> Result<Url, TransportError> {
        let scheme = if self.use_tls { "https" } else { "http" };
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        Url::parse(&format!("{}://{}:{}", scheme, host, self.port))
            .map_err(|e| TransportError::InvalidRequest(format!("invalid coordinator address: {}", e)))
    }
}

/// An outgoing request to the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute target URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Optional text body
    pub body: Option<String>,
}

impl CoordinatorRequest {
    /// Statement submission: `POST` with the statement text as body.
    pub fn submit(url: Url, statement: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            method: Method::POST,
            url,
            headers,
            body: Some(statement.to_string()),
        }
    }

    /// Continuation poll: `GET` on a coordinator-issued URI.
    pub fn poll(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Cancellation notice: `DELETE` on the current URI.
    pub fn cancel(url: Url) -> Self {
        Self {
            method: Method::DELETE,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Merge a set of headers into the request, replacing existing values.
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Get a header value as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set a single header value.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }
}

/// A coordinator response with a streamed body.
pub struct CoordinatorResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    body: BodyStream,
}

impl CoordinatorResponse {
    /// Create a response from a body stream.
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create a response from an in-memory body.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let chunk: Bytes = body.into();
        Self::new(status, headers, stream::once(async move { Ok::<Bytes, TransportError>(chunk) }).boxed())
    }

    /// Consume the response, returning the body stream.
    pub fn into_body(self) -> BodyStream {
        self.body
    }

    /// Read the complete body of this response.
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        let mut body = self.body;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    /// Read the body as UTF-8 text (lossy).
    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read and deserialize a JSON body.
    ///
    /// The whole body is buffered before parsing. A statement response holds
    /// one result batch, so memory per call is bounded by the coordinator's
    /// batch size rather than by the size of the full result.
    ///
    /// Body read failures surface as `TrinoError::Transport`, malformed JSON as
    /// `TrinoError::Protocol`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, TrinoError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl std::fmt::Debug for CoordinatorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"<stream>")
            .finish()
    }
}

/// HTTP transport used to reach the coordinator.
///
/// Implementations must be safe for concurrent use: several executions on the
/// same connection send requests through one shared transport.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and return the response head with a streamed body.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` for connection, TLS, timeout or I/O faults.
    /// Non-success HTTP statuses are returned as responses, not errors.
    async fn send(&self, request: CoordinatorRequest) -> Result<CoordinatorResponse, TransportError>;
}
