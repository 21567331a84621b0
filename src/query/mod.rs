//! Statement execution and result consumption.
//!
//! This module provides the execution state machine that drives a statement
//! through the coordinator's continuation protocol, and the cursor that
//! exposes its rows.
//!
//! # Overview
//!
//! The query module is organized into:
//! - `execution` - submission, polling, cancellation and terminal states
//! - `cursor` - forward-only row iteration over an execution
//! - `retry` - backoff policy for transient poll failures
//!
//! # Example
//!
//! ```no_run
//! use trino_rs::{Connection, ConnectionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::builder().host("localhost").build()?;
//! let mut connection = Connection::new(config);
//! connection.open().await?;
//!
//! let mut execution = connection.execute("SELECT * FROM tpch.tiny.nation")?;
//! while execution.advance().await? {
//!     println!("{}", execution.current()?);
//! }
//!
//! connection.close().await;
//! # Ok(())
//! # }
//! ```

pub mod cursor;
pub mod execution;
pub mod retry;

pub use cursor::ResultCursor;
pub use execution::{CancelHandle, ExecutionState, ExecutionStatus, QueryExecution};
pub use retry::RetryPolicy;
