//! Connection configuration parsing and validation.
//!
//! This module handles parsing connection strings and building connection
//! configuration with validation.

use crate::connection::auth::{Authenticator, BasicAuth, BearerAuth, NoAuth};
use crate::error::{ConnectionError, TransportError};
use crate::query::RetryPolicy;
use crate::transport::TransportConfig;
use crate::types::{RowDecoder, TypedValueDecoder};
use percent_encoding::percent_decode_str;
use reqwest::Url;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_USER: &str = "trino";
const DEFAULT_SOURCE: &str = "trino-rs";

/// Configuration of a coordinator connection.
///
/// Immutable while the owning connection is open.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Coordinator host address
    pub host: String,

    /// Coordinator port (default: 8080)
    pub port: u16,

    /// Enable TLS/SSL encryption
    pub use_tls: bool,

    /// TLS certificate validation mode
    pub validate_server_certificate: bool,

    /// Optional HTTP(S) proxy URL
    pub proxy: Option<String>,

    /// Session user, sent as `X-Trino-User`
    pub user: String,

    /// Client source name, sent as `X-Trino-Source`
    pub source: String,

    /// Default catalog
    pub catalog: Option<String>,

    /// Default schema
    pub schema: Option<String>,

    /// Session properties
    pub session_properties: HashMap<String, String>,

    /// Free-form client info
    pub client_info: Option<String>,

    /// Client tags for resource group selection
    pub client_tags: Vec<String>,

    /// Session time zone, e.g. `UTC`
    pub time_zone: Option<String>,

    /// Timeout of a single HTTP exchange
    pub request_timeout: Duration,

    /// Timeout for establishing a connection
    pub connect_timeout: Duration,

    /// Overall bound on one statement's execution
    pub statement_timeout: Option<Duration>,

    /// Retry policy for continuation polls
    pub retry: RetryPolicy,

    /// Lower bound on the delay between polls
    pub min_poll_delay: Duration,

    /// Batches buffered ahead of the cursor before polling pauses
    pub max_buffered_batches: usize,

    /// Probe `GET /v1/info` when the connection opens
    pub verify_on_open: bool,

    /// Row decoder
    pub decoder: Arc<dyn RowDecoder>,

    /// Authentication strategy
    pub auth: Arc<dyn Authenticator>,
}

impl ConnectionConfig {
    /// Create a new ConnectionBuilder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Transport settings derived from this configuration.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.use_tls,
            validate_server_certificate: self.validate_server_certificate,
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            proxy: self.proxy.clone(),
        }
    }

    /// Absolute URL of the statement submission endpoint.
    pub fn statement_url(&self) -> Result<Url, TransportError> {
        self.endpoint("/v1/statement")
    }

    /// Absolute URL of the coordinator info endpoint.
    pub fn info_url(&self) -> Result<Url, TransportError> {
        self.endpoint("/v1/info")
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.transport_config()
            .base_url()?
            .join(path)
            .map_err(|e| TransportError::InvalidRequest(format!("invalid endpoint {}: {}", path, e)))
    }
}

impl FromStr for ConnectionConfig {
    type Err = ConnectionError;

    /// Parse a connection string in the format:
    /// `trino://[user[:password]@]host[:port][/catalog[/schema]][?param=value&...]`
    ///
    /// A password in the URL selects basic authentication; the
    /// `access_token` parameter selects bearer authentication.
    ///
    /// # Examples
    ///
    /// ```
    /// # use trino_rs::connection::ConnectionConfig;
    /// # use std::str::FromStr;
    /// // Basic connection
    /// let config = ConnectionConfig::from_str("trino://localhost:8080")?;
    ///
    /// // With catalog, schema and a bearer token
    /// let config = ConnectionConfig::from_str(
    ///     "trino://alice@trino.example.com:443/hive/sales?ssl=true&access_token=eyJ..."
    /// )?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = s.trim();

        let url = url.strip_prefix("trino://").ok_or_else(|| {
            ConnectionError::ParseError("Connection string must start with 'trino://'".to_string())
        })?;

        // Split into main part and query string
        let (main_part, query_string) = match url.split_once('?') {
            Some((main, query)) => (main, Some(query)),
            None => (url, None),
        };

        let params = parse_query_params(query_string)?;

        // Split main part into auth@host/path
        let (auth_part, host_part) = match main_part.rfind('@') {
            Some(pos) => (Some(&main_part[..pos]), &main_part[pos + 1..]),
            None => (None, main_part),
        };

        let (host_port, path) = match host_part.split_once('/') {
            Some((host, path)) => (host, Some(path)),
            None => (host_part, None),
        };

        let (host, port) = parse_host_port(host_port)?;

        let mut builder = ConnectionBuilder::new().host(&host);
        if let Some(port) = port {
            builder = builder.port(port);
        }

        if let Some(path) = path {
            let mut segments = path.split('/').filter(|s| !s.is_empty());
            if let Some(catalog) = segments.next() {
                builder = builder.catalog(&decode(catalog, "catalog")?);
            }
            if let Some(schema) = segments.next() {
                builder = builder.schema(&decode(schema, "schema")?);
            }
            if segments.next().is_some() {
                return Err(ConnectionError::ParseError(format!(
                    "Unexpected path segments after catalog and schema: /{}",
                    path
                )));
            }
        }

        if let Some(auth) = auth_part {
            let (user, password) = parse_auth(auth)?;
            builder = builder.user(&user);
            if let Some(password) = password {
                builder = builder.basic_auth(&user, &password);
            }
        }

        builder = apply_query_params(builder, params)?;

        builder.build()
    }
}

// Prevent credentials from being displayed in debug or display output
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field(
                "validate_server_certificate",
                &self.validate_server_certificate,
            )
            .field("proxy", &self.proxy)
            .field("user", &self.user)
            .field("source", &self.source)
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .field("session_properties", &self.session_properties)
            .field("client_info", &self.client_info)
            .field("client_tags", &self.client_tags)
            .field("time_zone", &self.time_zone)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .field("retry", &self.retry)
            .field("min_poll_delay", &self.min_poll_delay)
            .field("max_buffered_batches", &self.max_buffered_batches)
            .field("verify_on_open", &self.verify_on_open)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trino://{}@{}:{}", self.user, self.host, self.port)?;
        if let Some(catalog) = &self.catalog {
            write!(f, "/{}", catalog)?;
            if let Some(schema) = &self.schema {
                write!(f, "/{}", schema)?;
            }
        }
        if self.use_tls {
            write!(f, "?ssl=true")?;
        }
        Ok(())
    }
}

/// Builder for constructing ConnectionConfig with validation.
#[derive(Clone, Default)]
pub struct ConnectionBuilder {
    host: Option<String>,
    port: Option<u16>,
    use_tls: Option<bool>,
    validate_server_certificate: Option<bool>,
    proxy: Option<String>,
    user: Option<String>,
    source: Option<String>,
    catalog: Option<String>,
    schema: Option<String>,
    session_properties: HashMap<String, String>,
    client_info: Option<String>,
    client_tags: Vec<String>,
    time_zone: Option<String>,
    request_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    min_poll_delay: Option<Duration>,
    max_buffered_batches: Option<usize>,
    verify_on_open: Option<bool>,
    decoder: Option<Arc<dyn RowDecoder>>,
    auth: Option<Arc<dyn Authenticator>>,
}

impl ConnectionBuilder {
    /// Create a new ConnectionBuilder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the coordinator host.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the coordinator port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Enable or disable TLS/SSL.
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = Some(use_tls);
        self
    }

    /// Enable or disable server certificate validation.
    pub fn validate_server_certificate(mut self, validate: bool) -> Self {
        self.validate_server_certificate = Some(validate);
        self
    }

    /// Route all requests through a proxy.
    pub fn proxy(mut self, proxy: &str) -> Self {
        self.proxy = Some(proxy.to_string());
        self
    }

    /// Set the session user.
    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    /// Set the client source name.
    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Set the default catalog.
    pub fn catalog(mut self, catalog: &str) -> Self {
        self.catalog = Some(catalog.to_string());
        self
    }

    /// Set the default schema.
    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    /// Add a session property.
    pub fn session_property(mut self, name: &str, value: &str) -> Self {
        self.session_properties
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Set the client info string.
    pub fn client_info(mut self, info: &str) -> Self {
        self.client_info = Some(info.to_string());
        self
    }

    /// Add a client tag.
    pub fn client_tag(mut self, tag: &str) -> Self {
        self.client_tags.push(tag.to_string());
        self
    }

    /// Set the session time zone.
    pub fn time_zone(mut self, time_zone: &str) -> Self {
        self.time_zone = Some(time_zone.to_string());
        self
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bound the total execution time of each statement.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Set the retry policy for continuation polls.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the minimum delay between polls.
    pub fn min_poll_delay(mut self, delay: Duration) -> Self {
        self.min_poll_delay = Some(delay);
        self
    }

    /// Set how many batches may be buffered ahead of the cursor.
    pub fn max_buffered_batches(mut self, batches: usize) -> Self {
        self.max_buffered_batches = Some(batches);
        self
    }

    /// Probe the coordinator when the connection opens.
    pub fn verify_on_open(mut self, verify: bool) -> Self {
        self.verify_on_open = Some(verify);
        self
    }

    /// Use a custom row decoder.
    pub fn decoder(mut self, decoder: Arc<dyn RowDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Set the authentication strategy.
    pub fn auth(mut self, auth: impl Authenticator + 'static) -> Self {
        self.auth = Some(Arc::new(auth));
        self
    }

    /// Authenticate with a bearer access token.
    pub fn access_token(self, token: &str) -> Self {
        self.auth(BearerAuth::new(token))
    }

    /// Authenticate with user and password.
    pub fn basic_auth(self, user: &str, password: &str) -> Self {
        self.auth(BasicAuth::new(user, password))
    }

    /// Build the ConnectionConfig with validation.
    ///
    /// Credentials are not checked here; that happens when the connection
    /// opens.
    pub fn build(self) -> Result<ConnectionConfig, ConnectionError> {
        let host = self.host.ok_or_else(|| invalid("host", "Host is required"))?;
        if host.trim().is_empty() {
            return Err(invalid("host", "Host cannot be empty"));
        }

        let port = self.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(invalid("port", "Port must be greater than 0"));
        }

        let user = self.user.unwrap_or_else(|| DEFAULT_USER.to_string());
        if user.is_empty() {
            return Err(invalid("user", "User cannot be empty"));
        }

        if self.schema.is_some() && self.catalog.is_none() {
            return Err(invalid("schema", "A schema requires a catalog"));
        }

        for name in self.session_properties.keys() {
            if name.is_empty() || name.contains(['=', ',']) || name.trim() != name {
                return Err(invalid(
                    "session_properties",
                    &format!("Invalid session property name '{}'", name),
                ));
            }
        }

        let request_timeout = self.request_timeout.unwrap_or(Duration::from_secs(30));
        if request_timeout.is_zero() {
            return Err(invalid("request_timeout", "Request timeout must be positive"));
        }

        if self.statement_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid(
                "statement_timeout",
                "Statement timeout must be positive",
            ));
        }

        let max_buffered_batches = self.max_buffered_batches.unwrap_or(4);
        if max_buffered_batches == 0 {
            return Err(invalid(
                "max_buffered_batches",
                "At least one batch must be bufferable",
            ));
        }

        Ok(ConnectionConfig {
            host,
            port,
            use_tls: self.use_tls.unwrap_or(false),
            validate_server_certificate: self.validate_server_certificate.unwrap_or(true),
            proxy: self.proxy,
            user,
            source: self.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            catalog: self.catalog,
            schema: self.schema,
            session_properties: self.session_properties,
            client_info: self.client_info,
            client_tags: self.client_tags,
            time_zone: self.time_zone,
            request_timeout,
            connect_timeout: self.connect_timeout.unwrap_or(Duration::from_secs(10)),
            statement_timeout: self.statement_timeout,
            retry: self.retry.unwrap_or_default(),
            min_poll_delay: self.min_poll_delay.unwrap_or(Duration::ZERO),
            max_buffered_batches,
            verify_on_open: self.verify_on_open.unwrap_or(false),
            decoder: self
                .decoder
                .unwrap_or_else(|| Arc::new(TypedValueDecoder)),
            auth: self.auth.unwrap_or_else(|| Arc::new(NoAuth)),
        })
    }
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

fn invalid(parameter: &str, message: &str) -> ConnectionError {
    ConnectionError::InvalidParameter {
        parameter: parameter.to_string(),
        message: message.to_string(),
    }
}

fn decode(raw: &str, what: &str) -> Result<String, ConnectionError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| ConnectionError::ParseError(format!("Failed to decode {}: {}", what, e)))
}

/// Parse query parameters from URL query string.
fn parse_query_params(query: Option<&str>) -> Result<Vec<(String, String)>, ConnectionError> {
    let mut params = Vec::new();

    if let Some(query) = query {
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }

            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConnectionError::ParseError(format!("Invalid query parameter format: {}", pair))
            })?;

            params.push((decode(key, "key")?, decode(value, "value")?));
        }
    }

    Ok(params)
}

/// Parse authentication part (user[:password]).
fn parse_auth(auth: &str) -> Result<(String, Option<String>), ConnectionError> {
    match auth.split_once(':') {
        Some((user, pass)) => Ok((decode(user, "user")?, Some(decode(pass, "password")?))),
        None => Ok((decode(auth, "user")?, None)),
    }
}

/// Parse host and optional port.
fn parse_host_port(host_port: &str) -> Result<(String, Option<u16>), ConnectionError> {
    // IPv6 address format [host]:port
    if let Some(rest) = host_port.strip_prefix('[') {
        let close_bracket = rest
            .find(']')
            .ok_or_else(|| ConnectionError::ParseError(format!("Invalid host: {}", host_port)))?;
        let host = rest[..close_bracket].to_string();
        let port_part = &rest[close_bracket + 1..];

        let port = match port_part.strip_prefix(':') {
            Some(stripped) => Some(parse_port(stripped)?),
            None if port_part.is_empty() => None,
            None => {
                return Err(ConnectionError::ParseError(format!(
                    "Invalid host: {}",
                    host_port
                )))
            }
        };
        return Ok((host, port));
    }

    match host_port.rsplit_once(':') {
        Some((host, port_str)) => Ok((host.to_string(), Some(parse_port(port_str)?))),
        None => Ok((host_port.to_string(), None)),
    }
}

fn parse_port(port: &str) -> Result<u16, ConnectionError> {
    port.parse()
        .map_err(|_| ConnectionError::ParseError(format!("Invalid port: {}", port)))
}

/// Apply query parameters to builder.
fn apply_query_params(
    mut builder: ConnectionBuilder,
    params: Vec<(String, String)>,
) -> Result<ConnectionBuilder, ConnectionError> {
    let mut has_password = builder.auth.is_some();

    for (key, value) in params {
        match key.as_str() {
            "ssl" | "tls" => {
                builder = builder.use_tls(parse_bool(&key, &value)?);
            }
            "validate_certificate" | "verify_certificate" => {
                builder = builder.validate_server_certificate(parse_bool(&key, &value)?);
            }
            "user" => {
                builder = builder.user(&value);
            }
            "source" => {
                builder = builder.source(&value);
            }
            "access_token" => {
                if has_password {
                    return Err(invalid(
                        "access_token",
                        "An access token cannot be combined with a password",
                    ));
                }
                has_password = true;
                builder = builder.access_token(&value);
            }
            "request_timeout" => {
                builder = builder.request_timeout(parse_duration(&key, &value)?);
            }
            "connect_timeout" => {
                builder = builder.connect_timeout(parse_duration(&key, &value)?);
            }
            "statement_timeout" => {
                builder = builder.statement_timeout(parse_duration(&key, &value)?);
            }
            "client_info" => {
                builder = builder.client_info(&value);
            }
            "client_tags" => {
                for tag in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                    builder = builder.client_tag(tag);
                }
            }
            "time_zone" => {
                builder = builder.time_zone(&value);
            }
            "proxy" => {
                builder = builder.proxy(&value);
            }
            _ => match key.strip_prefix("session_") {
                Some(name) if !name.is_empty() => {
                    builder = builder.session_property(name, &value);
                }
                _ => return Err(invalid(&key, "Unknown connection parameter")),
            },
        }
    }

    Ok(builder)
}

/// Parse boolean value from string.
fn parse_bool(key: &str, s: &str) -> Result<bool, ConnectionError> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, &format!("Invalid boolean value: {}", s))),
    }
}

/// Parse a duration given in seconds, or with an `ms`, `s` or `m` suffix.
fn parse_duration(key: &str, s: &str) -> Result<Duration, ConnectionError> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| invalid(key, &format!("Invalid duration value: {}", s)))
}
