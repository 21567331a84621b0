//! Error types for trino-rs.
//!
//! Errors are organized by functional area and collected under [`TrinoError`].
//! Every error is `Clone` so that a failed execution can report the same
//! terminal error on each subsequent cursor call.

use std::fmt;
use thiserror::Error;

/// Top-level error type encompassing all possible errors.
#[derive(Error, Debug, Clone)]
pub enum TrinoError {
    /// Credential material is missing or malformed
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Network, TLS, timeout or HTTP status fault
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Coordinator response violated the expected protocol structure
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A wire value could not be converted into a typed value
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The coordinator reported that the query failed
    #[error(transparent)]
    Query(#[from] QueryFailure),

    /// The execution was cancelled before it finished
    #[error("Query cancelled: {0}")]
    Cancelled(CancelReason),

    /// The operation is not allowed in the current connection state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The cursor is not positioned on a row
    #[error("Invalid cursor state: {0}")]
    InvalidCursorState(String),

    /// Column schema has not been received yet
    #[error("Column schema is not yet available")]
    SchemaNotYetAvailable,

    /// Connection configuration errors
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Errors related to connection configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Invalid connection parameters
    #[error("Invalid connection parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Connection string parsing error
    #[error("Failed to parse connection string: {0}")]
    ParseError(String),
}

/// Errors related to the HTTP transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not establish a connection to the coordinator
    #[error("Connection failed: {0}")]
    Connect(String),

    /// TLS/SSL error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Coordinator answered with an unexpected HTTP status
    #[error("Unexpected HTTP status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Failure while reading a response body
    #[error("Failed to read response body: {0}")]
    Body(String),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any other network I/O error
    #[error("Network I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the same request may be sent again.
    ///
    /// TLS failures and malformed requests never succeed on retry; HTTP 502,
    /// 503 and 504 are coordinator back-pressure and are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect(_)
            | TransportError::Timeout(_)
            | TransportError::Body(_)
            | TransportError::Io(_) => true,
            TransportError::HttpStatus { status, .. } => matches!(status, 502..=504),
            TransportError::Tls(_) | TransportError::InvalidRequest(_) => false,
        }
    }
}

/// Errors related to decoding wire values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Unsupported Trino type
    #[error("Unsupported Trino type: {trino_type}")]
    UnsupportedType { trino_type: String },

    /// Failed to convert value
    #[error("Failed to convert value at row {row}, column {column}: {message}")]
    ValueConversionFailed {
        row: usize,
        column: usize,
        message: String,
    },

    /// Row shape does not match the column schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    /// Arrow error
    #[error("Arrow error: {0}")]
    ArrowError(String),
}

/// Failure reported by the coordinator in a result batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Query failed ({error_name}): {message}")]
pub struct QueryFailure {
    /// Human-readable message
    pub message: String,
    /// Numeric error code
    pub error_code: i32,
    /// Symbolic error name, e.g. `SYNTAX_ERROR`
    pub error_name: String,
    /// Error category, e.g. `USER_ERROR`
    pub error_type: String,
    /// SQLSTATE, when the coordinator sends one
    pub sql_state: Option<String>,
    /// Line and column of the offending token
    pub location: Option<(u32, u32)>,
}

/// Why an execution reached the cancelled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled the execution
    Caller,
    /// The overall statement timeout expired
    Timeout,
    /// The owning connection was closed
    ConnectionClosed,
    /// The caller dropped the execution before it finished
    Abandoned,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Caller => write!(f, "cancelled by caller"),
            CancelReason::Timeout => write!(f, "statement timeout expired"),
            CancelReason::ConnectionClosed => write!(f, "connection closed"),
            CancelReason::Abandoned => write!(f, "execution dropped"),
        }
    }
}

/// Stable error codes for callers that branch on error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCredential,
    Transport,
    Protocol,
    Decode,
    Query,
    Cancelled,
    InvalidOperation,
    InvalidCursorState,
    SchemaNotYetAvailable,
    InvalidArgument,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidCredential => write!(f, "INVALID_CREDENTIAL"),
            ErrorKind::Transport => write!(f, "TRANSPORT"),
            ErrorKind::Protocol => write!(f, "PROTOCOL"),
            ErrorKind::Decode => write!(f, "DECODE"),
            ErrorKind::Query => write!(f, "QUERY"),
            ErrorKind::Cancelled => write!(f, "CANCELLED"),
            ErrorKind::InvalidOperation => write!(f, "INVALID_OPERATION"),
            ErrorKind::InvalidCursorState => write!(f, "INVALID_CURSOR_STATE"),
            ErrorKind::SchemaNotYetAvailable => write!(f, "SCHEMA_NOT_YET_AVAILABLE"),
            ErrorKind::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
        }
    }
}

impl TrinoError {
    /// Map to a stable error code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrinoError::InvalidCredential(_) => ErrorKind::InvalidCredential,
            TrinoError::Transport(_) => ErrorKind::Transport,
            TrinoError::Protocol(_) => ErrorKind::Protocol,
            TrinoError::Decode(_) => ErrorKind::Decode,
            TrinoError::Query(_) => ErrorKind::Query,
            TrinoError::Cancelled(_) => ErrorKind::Cancelled,
            TrinoError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            TrinoError::InvalidCursorState(_) => ErrorKind::InvalidCursorState,
            TrinoError::SchemaNotYetAvailable => ErrorKind::SchemaNotYetAvailable,
            TrinoError::Connection(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Whether the error is a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TrinoError::Cancelled(_))
    }
}

// Conversions from external error types
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = error_chain(&err);
        if err.is_timeout() {
            TransportError::Timeout(message)
        } else if err.is_connect() {
            if message.to_ascii_lowercase().contains("certificate") {
                TransportError::Tls(message)
            } else {
                TransportError::Connect(message)
            }
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(message)
        } else if err.is_builder() {
            TransportError::InvalidRequest(message)
        } else {
            TransportError::Io(message)
        }
    }
}

impl From<serde_json::Error> for TrinoError {
    fn from(err: serde_json::Error) -> Self {
        TrinoError::Protocol(format!("malformed coordinator response: {}", err))
    }
}

impl From<arrow::error::ArrowError> for DecodeError {
    fn from(err: arrow::error::ArrowError) -> Self {
        DecodeError::ArrowError(err.to_string())
    }
}

/// Render an error together with its sources, outermost first.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::HttpStatus {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("Service Unavailable"));
    }

    #[test]
    fn test_transport_retry_classification() {
        assert!(TransportError::Connect("refused".to_string()).is_retryable());
        assert!(TransportError::Timeout("30s".to_string()).is_retryable());
        assert!(TransportError::HttpStatus {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!TransportError::HttpStatus {
            status: 404,
            message: String::new()
        }
        .is_retryable());
        assert!(!TransportError::Tls("bad certificate".to_string()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad header".to_string()).is_retryable());
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::ValueConversionFailed {
            row: 5,
            column: 2,
            message: "Invalid number format".to_string(),
        };
        assert!(err.to_string().contains("row 5"));
        assert!(err.to_string().contains("column 2"));
    }

    #[test]
    fn test_query_failure_display() {
        let failure = QueryFailure {
            message: "line 1:8: Column 'x' cannot be resolved".to_string(),
            error_code: 47,
            error_name: "COLUMN_NOT_FOUND".to_string(),
            error_type: "USER_ERROR".to_string(),
            sql_state: None,
            location: Some((1, 8)),
        };
        let err = TrinoError::from(failure);
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(err.to_string().contains("COLUMN_NOT_FOUND"));
        assert!(err.to_string().contains("cannot be resolved"));
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            TrinoError::InvalidCredential("empty".to_string()).kind(),
            ErrorKind::InvalidCredential
        );
        assert_eq!(
            TrinoError::Cancelled(CancelReason::Timeout).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            TrinoError::from(ConnectionError::ParseError("bad".to_string())).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            TrinoError::SchemaNotYetAvailable.kind(),
            ErrorKind::SchemaNotYetAvailable
        );
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::Transport.to_string(), "TRANSPORT");
        assert_eq!(ErrorKind::Cancelled.to_string(), "CANCELLED");
    }

    #[test]
    fn test_cancelled_error_reason() {
        let err = TrinoError::Cancelled(CancelReason::ConnectionClosed);
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("connection closed"));
    }

    #[test]
    fn test_serde_error_becomes_protocol_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = TrinoError::from(parse_err);
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
