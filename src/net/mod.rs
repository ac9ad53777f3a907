//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming unix socket connection
//!     → listener.rs (private temp dir, accept loop)
//!     → tls.rs (mutual TLS handshake against the trust bundle)
//!     → connection.rs (lifecycle tracking)
//!     → Hand off to the HTTP router
//! ```
//!
//! # Design Decisions
//! - The listen address is never network-reachable
//! - Each connection tracked for logs and metrics
//! - TLS material follows the identity source without restarts

pub mod connection;
pub mod listener;
pub mod tls;

pub use listener::{ListenerError, ListenerHandle, ListenerOptions, SecureListener};
pub use tls::{client_config, server_config, TlsError};
