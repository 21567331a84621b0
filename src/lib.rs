//! # trino-rs
//!
//! Async client driver for Trino-style distributed query coordinators.
//!
//! This library speaks the coordinator's HTTP statement protocol: statements
//! are submitted with `POST /v1/statement` and their results are followed
//! through the chain of continuation URIs the coordinator hands back. Rows
//! are decoded into typed values and can be converted into Apache Arrow
//! record batches.
//!
//! ## Example
//!
//! ```no_run
//! # use trino_rs::*;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Configure and open a connection
//! let config = ConnectionConfig::builder()
//!     .host("localhost")
//!     .port(8080)
//!     .user("analyst")
//!     .catalog("tpch")
//!     .schema("tiny")
//!     .build()?;
//! let mut connection = Connection::new(config);
//! connection.open().await?;
//!
//! // Execute a query and walk its rows
//! let mut execution = connection.execute("SELECT name, regionkey FROM nation")?;
//! while execution.advance().await? {
//!     let row = execution.current()?;
//!     println!("{} -> {:?}", row.get_str(0).unwrap_or("?"), row.get_i64(1));
//! }
//!
//! // Close connection
//! connection.close().await;
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod arrow_conversion;
pub mod connection;
pub mod error;
pub mod query;
pub mod transport;
pub mod types;

// Re-export public API
pub use arrow_conversion::ArrowConverter;
pub use connection::{
    Authenticator, BasicAuth, BearerAuth, Connection, ConnectionBuilder, ConnectionConfig,
    ConnectionState, NoAuth,
};
pub use error::{
    CancelReason, ConnectionError, DecodeError, ErrorKind, QueryFailure, TransportError,
    TrinoError,
};
pub use query::{
    CancelHandle, ExecutionState, ExecutionStatus, QueryExecution, ResultCursor, RetryPolicy,
};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{Row, TrinoType, TypeMapper, Value};
