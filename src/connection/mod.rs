//! Connection management for Trino coordinators.
//!
//! This module provides connection configuration and parsing, authentication
//! strategies, session state tracking and the connection lifecycle.
//!
//! # Example
//!
//! ```no_run
//! # use trino_rs::connection::{ConnectionBuilder, ConnectionConfig};
//! # use std::str::FromStr;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Using ConnectionBuilder
//! let config = ConnectionBuilder::new()
//!     .host("localhost")
//!     .port(8443)
//!     .use_tls(true)
//!     .user("analyst")
//!     .access_token("eyJhbGciOi...")
//!     .catalog("hive")
//!     .schema("sales")
//!     .request_timeout(std::time::Duration::from_secs(10))
//!     .build()?;
//!
//! // Or parse from connection string
//! let config = ConnectionConfig::from_str(
//!     "trino://analyst@localhost:8443/hive/sales?ssl=true&request_timeout=10"
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod params;
pub mod session;

pub use auth::{Authenticator, BasicAuth, BearerAuth, NoAuth};
pub use params::{ConnectionBuilder, ConnectionConfig};
pub use session::{Connection, ConnectionState, SessionContext, SessionSnapshot};
