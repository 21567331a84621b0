//! Transport layer for coordinator communication.
//!
//! The query engine talks to the coordinator only through the
//! [`HttpTransport`] trait, so tests and embedders can substitute their own
//! transport.
//!
//! # Architecture
//!
//! The transport layer is organized into:
//! - `protocol` - Transport trait and request/response types
//! - `messages` - Wire message types of the statement protocol
//! - `http` - `reqwest`-based transport implementation
//!
//! # Example
//!
//! ```no_run
//! use trino_rs::transport::{CoordinatorRequest, HttpTransport, ReqwestTransport, TransportConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransportConfig::new("localhost".to_string(), 8080);
//! let transport = ReqwestTransport::new(&config)?;
//!
//! let url = config.base_url()?.join("/v1/info")?;
//! let response = transport.send(CoordinatorRequest::poll(url)).await?;
//! println!("coordinator answered {}", response.status);
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod messages;
pub mod protocol;

// Re-export commonly used types
pub use http::ReqwestTransport;
pub use messages::{Column, QueryResults, ServerInfo, StatementStats, Warning};
pub use protocol::{
    BodyStream, CoordinatorRequest, CoordinatorResponse, HttpTransport, TransportConfig,
};
