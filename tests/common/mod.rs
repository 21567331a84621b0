//! Common test utilities for trino-rs integration tests.
//!
//! # Scripted Coordinator
//!
//! Most integration tests run against [`MockCoordinator`], an in-process
//! [`HttpTransport`] that answers statement submissions and polls from a
//! script and records every request it sees. `DELETE` requests are always
//! acknowledged with `204 No Content` and do not consume the script.
//!
//! # Live Coordinator
//!
//! Tests marked `#[ignore]` talk to a real coordinator, e.g.
//!
//! ```bash
//! docker run -d --name trino-test -p 8080:8080 trinodb/trino:latest
//! ```
//!
//! | Default Constant | Environment Variable | Default Value |
//! |------------------|----------------------|---------------|
//! | `DEFAULT_HOST`   | `TRINO_HOST`         | "localhost"   |
//! | `DEFAULT_PORT`   | `TRINO_PORT`         | 8080          |
//! | `DEFAULT_USER`   | `TRINO_USER`         | "trino"       |
//!
//! ```bash
//! cargo test --test integration_tests -- --ignored
//! TRINO_HOST=10.0.0.5 cargo test --test integration_tests -- --ignored
//! ```

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value as Json};
use std::collections::VecDeque;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use trino_rs::transport::{CoordinatorRequest, CoordinatorResponse, HttpTransport};
use trino_rs::{Connection, ConnectionBuilder, ConnectionConfig, TransportError};

// ============================================================================
// Connection Constants with Default Values
// ============================================================================

/// Host the scripted coordinator pretends to be.
pub const MOCK_HOST: &str = "mock-coordinator";

/// Default host for a live coordinator.
pub const DEFAULT_HOST: &str = "localhost";

/// Default port for a live coordinator.
pub const DEFAULT_PORT: u16 = 8080;

/// Default user for a live coordinator.
pub const DEFAULT_USER: &str = "trino";

const ENV_TRINO_HOST: &str = "TRINO_HOST";
const ENV_TRINO_PORT: &str = "TRINO_PORT";
const ENV_TRINO_USER: &str = "TRINO_USER";

// ============================================================================
// Configuration Helpers
// ============================================================================

/// Get the live coordinator host from environment or use default.
pub fn get_host() -> String {
    env::var(ENV_TRINO_HOST).unwrap_or_else(|_| DEFAULT_HOST.to_string())
}

/// Get the live coordinator port from environment or use default.
pub fn get_port() -> u16 {
    env::var(ENV_TRINO_PORT)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Get the live coordinator user from environment or use default.
pub fn get_user() -> String {
    env::var(ENV_TRINO_USER).unwrap_or_else(|_| DEFAULT_USER.to_string())
}

/// Continuation URI number `n` of the scripted query.
pub fn next_uri(n: usize) -> String {
    format!(
        "http://{}:8080/v1/statement/executing/20240101_000000_00001_mock/y{}/{}",
        MOCK_HOST, n, n
    )
}

/// A `QueryResults` body with the given continuation.
pub fn batch(next: Option<usize>) -> Json {
    let mut body = json!({
        "id": "20240101_000000_00001_mock",
        "infoUri": format!("http://{}:8080/ui/query.html?20240101_000000_00001_mock", MOCK_HOST),
        "stats": {"state": if next.is_some() { "RUNNING" } else { "FINISHED" }},
    });
    if let Some(n) = next {
        body["nextUri"] = json!(next_uri(n));
    }
    body
}

/// A `QueryResults` body carrying one integer column and `rows`.
pub fn int_batch(rows: &[i64], next: Option<usize>) -> Json {
    let mut body = batch(next);
    body["columns"] = json!([{"name": "n", "type": "bigint"}]);
    body["data"] = Json::Array(rows.iter().map(|v| json!([v])).collect());
    body
}

/// Builder pointed at the scripted coordinator.
pub fn mock_builder() -> ConnectionBuilder {
    ConnectionConfig::builder()
        .host(MOCK_HOST)
        .port(8080)
        .user("tester")
        .access_token("test-token")
}

/// Open a connection over the given scripted coordinator.
pub async fn open_mock_connection(
    coordinator: &Arc<MockCoordinator>,
    configure: impl FnOnce(ConnectionBuilder) -> ConnectionBuilder,
) -> Connection {
    let config = configure(mock_builder())
        .build()
        .expect("test configuration should be valid");
    let mut connection = Connection::with_transport(config, Arc::clone(coordinator) as Arc<dyn HttpTransport>);
    connection
        .open()
        .await
        .expect("opening a scripted connection should succeed");
    connection
}

// ============================================================================
// Scripted Coordinator
// ============================================================================

/// One scripted answer.
pub enum Reply {
    /// `200 OK` with a JSON body
    Json(Json),
    /// `200 OK` with a JSON body and extra response headers
    JsonWithHeaders(Json, Vec<(&'static str, &'static str)>),
    /// Arbitrary status with a text body
    Status(u16, &'static str),
    /// Transport-level failure
    Fault(TransportError),
    /// Never answers
    Hang,
    /// Answer after a delay
    Delayed(Duration, Box<Reply>),
}

/// A request as seen by the coordinator.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub at: Instant,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// In-process coordinator answering from a script.
pub struct MockCoordinator {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockCoordinator {
    pub fn scripted(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Requests received with `method`.
    pub fn requests_with(&self, method: Method) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` requests with `method` were received.
    pub async fn wait_for(&self, method: Method, count: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.requests_with(method.clone()).len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "timed out waiting for {} {} requests",
            count,
            method
        );
    }

    fn record(&self, request: &CoordinatorRequest) {
        self.requests.lock().push(RecordedRequest {
            method: request.method.clone(),
            url: request.url.to_string(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            at: Instant::now(),
        });
    }
}

fn respond(reply: Reply) -> futures_util::future::BoxFuture<'static, Result<CoordinatorResponse, TransportError>> {
    Box::pin(async move {
        match reply {
            Reply::Json(body) => json_response(body, Vec::new()),
            Reply::JsonWithHeaders(body, headers) => json_response(body, headers),
            Reply::Status(code, body) => Ok(CoordinatorResponse::from_bytes(
                StatusCode::from_u16(code).expect("valid status code"),
                HeaderMap::new(),
                body,
            )),
            Reply::Fault(err) => Err(err),
            Reply::Hang => std::future::pending().await,
            Reply::Delayed(delay, reply) => {
                tokio::time::sleep(delay).await;
                respond(*reply).await
            }
        }
    })
}

fn json_response(
    body: Json,
    extra: Vec<(&'static str, &'static str)>,
) -> Result<CoordinatorResponse, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("content-type"),
        HeaderValue::from_static("application/json"),
    );
    for (name, value) in extra {
        headers.append(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    let bytes = serde_json::to_vec(&body).expect("serializable body");
    Ok(CoordinatorResponse::from_bytes(StatusCode::OK, headers, bytes))
}

#[async_trait]
impl HttpTransport for MockCoordinator {
    async fn send(&self, request: CoordinatorRequest) -> Result<CoordinatorResponse, TransportError> {
        self.record(&request);
        if request.method == Method::DELETE {
            return Ok(CoordinatorResponse::from_bytes(
                StatusCode::NO_CONTENT,
                HeaderMap::new(),
                "",
            ));
        }
        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(Reply::Status(500, "script exhausted"));
        respond(reply).await
    }
}
