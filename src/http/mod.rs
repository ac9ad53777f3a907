//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TLS connection (net::listener)
//!     → hyper-util auto builder (HTTP/1.1 or HTTP/2)
//!     → server.rs (request ID, tracing, handlers)
//!     → Send to client
//! ```

pub mod server;

pub use server::{endpoint_router, EndpointStatus};
