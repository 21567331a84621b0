//! Connection lifecycle and coordinator session state.
//!
//! A [`Connection`] owns the transport for one coordinator and every
//! execution started through it. The [`SessionContext`] tracks catalog,
//! schema and session properties, including changes the coordinator
//! announces through response headers, and renders them as request headers.

use crate::connection::params::ConnectionConfig;
use crate::error::{CancelReason, ConnectionError, TransportError, TrinoError};
use crate::query::execution::{spawn_execution, ExecutionContext, ExecutionShared};
use crate::query::QueryExecution;
use crate::transport::messages::headers;
use crate::transport::{CoordinatorRequest, HttpTransport, ReqwestTransport, ServerInfo};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const CLIENT_USER_AGENT: &str = concat!("trino-rs/", env!("CARGO_PKG_VERSION"));

/// Characters left unescaped in session property values.
const SESSION_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Point-in-time view of the session state sent with each submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    /// Session properties, ordered by name
    pub properties: BTreeMap<String, String>,
}

/// Mutable session state shared by a connection and its executions.
#[derive(Debug, Default)]
pub struct SessionContext {
    state: RwLock<SessionSnapshot>,
}

impl SessionContext {
    /// Seed the session from the connection configuration.
    pub fn new(config: &ConnectionConfig) -> Self {
        let snapshot = SessionSnapshot {
            catalog: config.catalog.clone(),
            schema: config.schema.clone(),
            properties: config
                .session_properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Current session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.read().clone()
    }

    /// Headers for a statement submission.
    pub fn submit_headers(&self, config: &ConnectionConfig) -> Result<HeaderMap, TrinoError> {
        let snapshot = self.snapshot();
        let mut map = self.poll_headers(config)?;

        put(&mut map, headers::SOURCE, &config.source)?;
        if let Some(catalog) = &snapshot.catalog {
            put(&mut map, headers::CATALOG, catalog)?;
        }
        if let Some(schema) = &snapshot.schema {
            put(&mut map, headers::SCHEMA, schema)?;
        }
        if !snapshot.properties.is_empty() {
            let encoded = snapshot
                .properties
                .iter()
                .map(|(name, value)| format!("{}={}", name, utf8_percent_encode(value, SESSION_VALUE)))
                .collect::<Vec<_>>()
                .join(",");
            put(&mut map, headers::SESSION, &encoded)?;
        }
        if let Some(info) = &config.client_info {
            put(&mut map, headers::CLIENT_INFO, info)?;
        }
        if !config.client_tags.is_empty() {
            put(&mut map, headers::CLIENT_TAGS, &config.client_tags.join(","))?;
        }
        if let Some(time_zone) = &config.time_zone {
            put(&mut map, headers::TIME_ZONE, time_zone)?;
        }

        Ok(map)
    }

    /// Headers for continuation polls and cancel notices.
    pub fn poll_headers(&self, config: &ConnectionConfig) -> Result<HeaderMap, TrinoError> {
        let mut map = HeaderMap::new();
        put(&mut map, headers::USER, &config.user)?;
        map.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        Ok(map)
    }

    /// Apply the session changes announced in coordinator response headers.
    pub fn apply_response_headers(&self, response: &HeaderMap) {
        let has_changes = [
            headers::SET_CATALOG,
            headers::SET_SCHEMA,
            headers::SET_SESSION,
            headers::CLEAR_SESSION,
        ]
        .iter()
        .any(|name| response.contains_key(*name));
        if !has_changes {
            return;
        }

        let mut state = self.state.write();
        if let Some(catalog) = header_str(response.get(headers::SET_CATALOG)) {
            debug!("[TRINO_SESSION] Catalog set to {}", catalog);
            state.catalog = Some(catalog.to_string());
        }
        if let Some(schema) = header_str(response.get(headers::SET_SCHEMA)) {
            debug!("[TRINO_SESSION] Schema set to {}", schema);
            state.schema = Some(schema.to_string());
        }
        for value in response.get_all(headers::SET_SESSION) {
            let Some((name, raw)) = header_str(Some(value)).and_then(|v| v.split_once('=')) else {
                warn!("[TRINO_SESSION] Ignoring malformed session header");
                continue;
            };
            let value = percent_decode_str(raw.trim()).decode_utf8_lossy().into_owned();
            debug!("[TRINO_SESSION] Session property {} set", name.trim());
            state.properties.insert(name.trim().to_string(), value);
        }
        for value in response.get_all(headers::CLEAR_SESSION) {
            if let Some(name) = header_str(Some(value)) {
                debug!("[TRINO_SESSION] Session property {} cleared", name);
                state.properties.remove(name);
            }
        }
    }
}

fn put(map: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), TrinoError> {
    let header = HeaderValue::from_str(value).map_err(|e| ConnectionError::InvalidParameter {
        parameter: name.to_string(),
        message: format!("value cannot be sent as a header: {}", e),
    })?;
    map.insert(HeaderName::from_static(name), header);
    Ok(())
}

fn header_str(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Configured, not yet opened
    Created,
    /// Ready to execute statements
    Open,
    /// Closed; cannot be reopened
    Closed,
}

struct OpenConnection {
    transport: Arc<dyn HttpTransport>,
    session: Arc<SessionContext>,
    server_info: Option<ServerInfo>,
}

struct ExecutionEntry {
    shared: Arc<ExecutionShared>,
    handle: JoinHandle<()>,
}

/// A client connection to one coordinator.
///
/// # Example
///
/// ```no_run
/// use trino_rs::{Connection, ConnectionConfig};
/// use std::str::FromStr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConnectionConfig::from_str("trino://analyst@localhost:8080/tpch/tiny")?;
/// let mut connection = Connection::new(config);
/// connection.open().await?;
///
/// let mut execution = connection.execute("SELECT count(*) FROM nation")?;
/// let rows = execution.fetch_all().await?;
/// println!("{}", rows[0]);
///
/// connection.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    config: ConnectionConfig,
    injected_transport: Option<Arc<dyn HttpTransport>>,
    state: ConnectionState,
    open: Option<OpenConnection>,
    executions: Mutex<HashMap<u64, ExecutionEntry>>,
    next_execution_id: AtomicU64,
}

impl Connection {
    /// Create a connection that builds its own HTTP transport on `open`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            injected_transport: None,
            state: ConnectionState::Created,
            open: None,
            executions: Mutex::new(HashMap::new()),
            next_execution_id: AtomicU64::new(0),
        }
    }

    /// Create a connection that uses the given transport.
    pub fn with_transport(config: ConnectionConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let mut connection = Self::new(config);
        connection.injected_transport = Some(transport);
        connection
    }

    /// Connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Mutable access to the configuration before the connection is opened.
    ///
    /// # Errors
    ///
    /// Returns `TrinoError::InvalidOperation` once the connection was opened.
    pub fn config_mut(&mut self) -> Result<&mut ConnectionConfig, TrinoError> {
        if self.state != ConnectionState::Created {
            return Err(TrinoError::InvalidOperation(format!(
                "cannot reconfigure a connection in state {:?}",
                self.state
            )));
        }
        Ok(&mut self.config)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether statements can be executed.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Coordinator details, when the connection was verified on open.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.open.as_ref().and_then(|open| open.server_info.as_ref())
    }

    /// Current session state, if open.
    pub fn session(&self) -> Option<SessionSnapshot> {
        self.open.as_ref().map(|open| open.session.snapshot())
    }

    /// Number of executions that have not reached a terminal state.
    pub fn active_executions(&self) -> usize {
        self.executions
            .lock()
            .values()
            .filter(|entry| !entry.shared.state().is_terminal())
            .count()
    }

    /// Open the connection.
    ///
    /// Validates the authentication strategy and sets up the transport. With
    /// `verify_on_open`, also probes the coordinator's info endpoint.
    ///
    /// # Errors
    ///
    /// - `TrinoError::InvalidCredential` if the credentials are unusable or
    ///   rejected by the probe
    /// - `TrinoError::Transport` if the transport cannot be set up or the
    ///   probe fails
    /// - `TrinoError::InvalidOperation` if already opened or closed
    pub async fn open(&mut self) -> Result<(), TrinoError> {
        if self.state != ConnectionState::Created {
            return Err(TrinoError::InvalidOperation(format!(
                "cannot open a connection in state {:?}",
                self.state
            )));
        }

        self.config.auth.validate()?;
        self.config.statement_url()?;

        let transport: Arc<dyn HttpTransport> = match &self.injected_transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(ReqwestTransport::new(&self.config.transport_config())?),
        };
        let session = Arc::new(SessionContext::new(&self.config));

        let server_info = if self.config.verify_on_open {
            Some(self.probe(transport.as_ref(), &session).await?)
        } else {
            None
        };

        info!("[TRINO_CONN] Opened connection to {}", self.config);
        self.open = Some(OpenConnection {
            transport,
            session,
            server_info,
        });
        self.state = ConnectionState::Open;
        Ok(())
    }

    async fn probe(
        &self,
        transport: &dyn HttpTransport,
        session: &SessionContext,
    ) -> Result<ServerInfo, TrinoError> {
        let mut request = CoordinatorRequest::poll(self.config.info_url()?)
            .with_headers(&session.poll_headers(&self.config)?);
        self.config.auth.decorate(&mut request)?;

        let response = transport.send(request).await?;
        let status = response.status;
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(TrinoError::InvalidCredential(format!(
                    "coordinator rejected the credentials ({})",
                    status.as_u16()
                )))
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::HttpStatus {
                    status: status.as_u16(),
                    message: body.trim().chars().take(256).collect(),
                }
                .into())
            }
            _ => {
                let info: ServerInfo = response.json().await?;
                debug!(
                    "[TRINO_CONN] Coordinator version {} (starting={})",
                    info.node_version.version, info.starting
                );
                Ok(info)
            }
        }
    }

    /// Start executing a statement.
    ///
    /// Returns immediately; the statement is submitted and polled on a
    /// background task of the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `TrinoError::InvalidOperation` if the connection is not open
    /// or no Tokio runtime is running.
    pub fn execute(&self, statement: &str) -> Result<QueryExecution, TrinoError> {
        let open = match (&self.state, &self.open) {
            (ConnectionState::Open, Some(open)) => open,
            (ConnectionState::Closed, _) => {
                return Err(TrinoError::InvalidOperation(
                    "connection is closed".to_string(),
                ))
            }
            _ => {
                return Err(TrinoError::InvalidOperation(
                    "connection is not open".to_string(),
                ))
            }
        };
        let runtime = Handle::try_current().map_err(|_| {
            TrinoError::InvalidOperation("execute must be called within a Tokio runtime".to_string())
        })?;

        let ctx = ExecutionContext {
            transport: Arc::clone(&open.transport),
            auth: Arc::clone(&self.config.auth),
            decoder: Arc::clone(&self.config.decoder),
            session: Arc::clone(&open.session),
            statement_url: self.config.statement_url()?,
            submit_headers: open.session.submit_headers(&self.config)?,
            poll_headers: open.session.poll_headers(&self.config)?,
            retry: self.config.retry,
            min_poll_delay: self.config.min_poll_delay,
            statement_timeout: self.config.statement_timeout,
            max_buffered_batches: self.config.max_buffered_batches,
        };

        let id = self.next_execution_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (execution, handle) = spawn_execution(&runtime, id, statement.to_string(), ctx);

        let mut executions = self.executions.lock();
        executions.retain(|_, entry| !entry.handle.is_finished());
        executions.insert(
            id,
            ExecutionEntry {
                shared: execution.shared(),
                handle,
            },
        );
        debug!(
            "[TRINO_CONN] Started execution #{} ({} active)",
            id,
            executions.len()
        );

        Ok(execution)
    }

    /// Close the connection.
    ///
    /// Cancels every active execution, waits for their tasks to finish and
    /// releases the transport. Closing a closed connection is a no-op.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;

        let entries: Vec<ExecutionEntry> = self
            .executions
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &entries {
            entry.shared.request_cancel(CancelReason::ConnectionClosed);
        }

        let count = entries.len();
        for entry in entries {
            let id = entry.shared.id();
            if let Err(e) = entry.handle.await {
                warn!("[TRINO_CONN] Execution #{} task ended abnormally: {}", id, e);
            }
        }

        self.open = None;
        info!(
            "[TRINO_CONN] Closed connection to {} ({} executions)",
            self.config, count
        );
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for entry in self.executions.get_mut().values() {
            entry.shared.request_cancel(CancelReason::ConnectionClosed);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("executions", &self.executions.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::auth::BearerAuth;
    use crate::error::ErrorKind;
    use crate::transport::CoordinatorResponse;
    use async_trait::async_trait;
    use mockall::mock;
    use reqwest::Method;

    mock! {
        pub Transport {}

        #[async_trait]
        impl HttpTransport for Transport {
            async fn send(&self, request: CoordinatorRequest) -> Result<CoordinatorResponse, TransportError>;
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::builder()
            .host("coordinator")
            .user("analyst")
            .source("reporting")
            .catalog("hive")
            .schema("sales")
            .session_property("query_max_run_time", "2h")
            .session_property("optimize_hash_generation", "true")
            .client_tag("nightly")
            .client_tag("etl")
            .time_zone("Europe/Berlin")
            .build()
            .unwrap()
    }

    fn response(status: u16, body: &'static str) -> Result<CoordinatorResponse, TransportError> {
        Ok(CoordinatorResponse::from_bytes(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            body,
        ))
    }

    #[test]
    fn test_submit_headers() {
        let config = config();
        let session = SessionContext::new(&config);
        let map = session.submit_headers(&config).unwrap();

        assert_eq!(map.get(headers::USER).unwrap(), "analyst");
        assert_eq!(map.get(headers::SOURCE).unwrap(), "reporting");
        assert_eq!(map.get(headers::CATALOG).unwrap(), "hive");
        assert_eq!(map.get(headers::SCHEMA).unwrap(), "sales");
        assert_eq!(
            map.get(headers::SESSION).unwrap(),
            "optimize_hash_generation=true,query_max_run_time=2h"
        );
        assert_eq!(map.get(headers::CLIENT_TAGS).unwrap(), "nightly,etl");
        assert_eq!(map.get(headers::TIME_ZONE).unwrap(), "Europe/Berlin");
        assert!(map
            .get(USER_AGENT)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("trino-rs/"));
    }

    #[test]
    fn test_session_values_are_percent_encoded() {
        let config = ConnectionConfig::builder()
            .host("coordinator")
            .session_property("spill_path", "/tmp/a b,c=d")
            .build()
            .unwrap();
        let session = SessionContext::new(&config);
        let map = session.submit_headers(&config).unwrap();
        assert_eq!(
            map.get(headers::SESSION).unwrap(),
            "spill_path=%2Ftmp%2Fa%20b%2Cc%3Dd"
        );
    }

    #[test]
    fn test_poll_headers_are_minimal() {
        let config = config();
        let map = SessionContext::new(&config).poll_headers(&config).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(headers::USER).unwrap(), "analyst");
    }

    #[test]
    fn test_apply_response_headers() {
        let config = config();
        let session = SessionContext::new(&config);

        let mut response = HeaderMap::new();
        response.insert(headers::SET_SCHEMA, HeaderValue::from_static("marketing"));
        response.append(
            headers::SET_SESSION,
            HeaderValue::from_static("join_distribution_type=BROADCAST"),
        );
        response.append(
            headers::SET_SESSION,
            HeaderValue::from_static("spill_path=%2Fdata%20x"),
        );
        response.insert(
            headers::CLEAR_SESSION,
            HeaderValue::from_static("query_max_run_time"),
        );
        session.apply_response_headers(&response);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.catalog.as_deref(), Some("hive"));
        assert_eq!(snapshot.schema.as_deref(), Some("marketing"));
        assert_eq!(
            snapshot.properties.get("join_distribution_type").map(String::as_str),
            Some("BROADCAST")
        );
        assert_eq!(
            snapshot.properties.get("spill_path").map(String::as_str),
            Some("/data x")
        );
        assert!(!snapshot.properties.contains_key("query_max_run_time"));

        let map = session.submit_headers(&config).unwrap();
        assert_eq!(map.get(headers::SCHEMA).unwrap(), "marketing");
    }

    #[test]
    fn test_header_injection_rejected() {
        let config = ConnectionConfig::builder()
            .host("coordinator")
            .client_info("line\nbreak")
            .build()
            .unwrap();
        let err = SessionContext::new(&config)
            .submit_headers(&config)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_execute_requires_open() {
        let connection = Connection::with_transport(config(), Arc::new(MockTransport::new()));
        let err = connection.execute("select 1").unwrap_err();
        assert!(matches!(err, TrinoError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_open_rejects_blank_token() {
        let mut config = config();
        config.auth = Arc::new(BearerAuth::new("   "));
        let mut connection = Connection::with_transport(config, Arc::new(MockTransport::new()));

        let err = connection.open().await.unwrap_err();
        assert!(matches!(err, TrinoError::InvalidCredential(_)));
        assert_eq!(connection.state(), ConnectionState::Created);
    }

    #[tokio::test]
    async fn test_open_twice_fails() {
        let mut connection = Connection::with_transport(config(), Arc::new(MockTransport::new()));
        connection.open().await.unwrap();
        assert!(connection.is_open());
        assert!(matches!(
            connection.open().await,
            Err(TrinoError::InvalidOperation(_))
        ));
        assert!(connection.config_mut().is_err());
    }

    #[tokio::test]
    async fn test_open_probe_rejected_credentials() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.method == Method::GET && req.url.path() == "/v1/info")
            .times(1)
            .returning(|_| response(401, "Unauthorized"));

        let mut config = config();
        config.verify_on_open = true;
        let mut connection = Connection::with_transport(config, Arc::new(transport));

        let err = connection.open().await.unwrap_err();
        assert!(matches!(err, TrinoError::InvalidCredential(_)));
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn test_open_probe_reads_server_info() {
        let mut transport = MockTransport::new();
        transport.expect_send().times(1).returning(|_| {
            response(
                200,
                r#"{"nodeVersion":{"version":"435"},"coordinator":true,"starting":false}"#,
            )
        });

        let mut config = config();
        config.verify_on_open = true;
        let mut connection = Connection::with_transport(config, Arc::new(transport));
        connection.open().await.unwrap();

        assert_eq!(connection.server_info().unwrap().node_version.version, "435");
    }

    #[tokio::test]
    async fn test_open_probe_server_error() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| response(500, "internal error"));

        let mut config = config();
        config.verify_on_open = true;
        let mut connection = Connection::with_transport(config, Arc::new(transport));

        let err = connection.open().await.unwrap_err();
        assert!(matches!(
            err,
            TrinoError::Transport(TransportError::HttpStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let mut connection = Connection::with_transport(config(), Arc::new(MockTransport::new()));
        connection.open().await.unwrap();
        connection.close().await;
        connection.close().await;

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.session().is_none());
        assert!(matches!(
            connection.execute("select 1"),
            Err(TrinoError::InvalidOperation(_))
        ));
        assert!(matches!(
            connection.open().await,
            Err(TrinoError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_execute_outside_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut connection = Connection::with_transport(config(), Arc::new(MockTransport::new()));
        runtime.block_on(connection.open()).unwrap();

        let err = connection.execute("select 1").unwrap_err();
        assert!(matches!(err, TrinoError::InvalidOperation(_)));
    }
}
