//! restfuzz transport layer
//!
//! This crate provides:
//! - [`Transport`]: the async `send(Request) -> Response` seam the engine drives
//! - [`http`]: a `ureq`-backed transport with timeouts and auth header injection
//! - [`mock`]: a scripted in-process transport for tests
//!
//! An HTTP error status is a normal [`Response`]; only failures to obtain a
//! response at all are reported as [`TransportError`].
//!
//! # Example
//!
//! ```ignore
//! use restfuzz_transport::{HttpTransport, Transport};
//!
//! let transport = HttpTransport::new("http://localhost:8080")
//!     .with_header("Authorization", "Bearer token");
//! let response = transport.send(&request).await?;
//! ```

pub mod http;
pub mod mock;

use std::fmt;

use restfuzz_types::{Request, Response};

pub use http::HttpTransport;
pub use mock::MockTransport;

/// Failure to obtain any HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The request still carried an unresolved placeholder.
    Unresolved(String),
    /// Connection could not be established or was reset.
    Connect(String),
    /// No response within the request timeout.
    Timeout,
    /// Response could not be read.
    Body(String),
    /// The blocking worker died.
    Worker(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unresolved(key) => {
                write!(f, "request has unresolved placeholder '{}'", key)
            }
            TransportError::Connect(msg) => write!(f, "connection failed: {}", msg),
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::Body(msg) => write!(f, "failed to read response body: {}", msg),
            TransportError::Worker(msg) => write!(f, "transport worker failed: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Sends fully resolved requests to the system under test.
///
/// Implementations must be cheap to share across workers (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, TransportError>;

    /// Short name for logging.
    fn name(&self) -> &str;
}
