//! Mesh registry client.
//!
//! # Data Flow
//! ```text
//! RegistrationSpec (name, service, labels, listen URL)
//!     → client.rs (validate, build record, expiry)
//!     → clientinfo.rs (node/pod/cluster labels)
//!     → authorize.rs (policy check before any call)
//!     → sendfd.rs (unix:// → inode:// when the transport takes files)
//!     → RegistryTransport (http.rs over mTLS, memory.rs in-process)
//! ```
//!
//! # Design Decisions
//! - Every chain element is itself a `RegistryTransport`
//! - Registration is not retried; deregistration is best-effort for callers

use std::io;
use std::path::Path;

use async_trait::async_trait;

pub mod authorize;
pub mod client;
pub mod clientinfo;
pub mod http;
pub mod memory;
pub mod sendfd;
pub mod types;

pub use authorize::{Operation, PermitAll, PolicyEvaluator};
pub use client::{RegistrationClient, RegistrationClientBuilder};
pub use http::HttpRegistry;
pub use memory::InMemoryRegistry;
pub use types::{PolicySet, RegistrationRecord, RegistrationSpec, ServiceLabels};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry connect URL is required")]
    MissingConnectUrl,

    #[error("invalid registry URL {0}")]
    InvalidUrl(String),

    #[error("unsupported registry URL scheme {0}")]
    UnsupportedScheme(String),

    #[error("no registry transport configured")]
    MissingTransport,

    #[error("registration {0} must not be empty")]
    InvalidSpec(&'static str),

    #[error("{operation} denied: {reason}")]
    Denied { operation: Operation, reason: String },

    #[error("failed to connect to registry at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("registry TLS handshake failed: {0}")]
    Tls(#[source] io::Error),

    #[error("registry HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to build registry request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("failed to read registry response: {0}")]
    Body(String),

    #[error("registry rejected the call with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid registry payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to hand off socket file: {0}")]
    FileHandoff(#[source] io::Error),

    #[error("failed to register {name}: {source}")]
    Register {
        name: String,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("failed to unregister {name}: {source}")]
    Unregister {
        name: String,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("registry call cancelled")]
    Cancelled,
}

/// One hop of the registry client chain, or the transport at its end.
#[async_trait]
pub trait RegistryTransport: Send + Sync + 'static {
    async fn register(&self, record: RegistrationRecord) -> Result<RegistrationRecord, RegistryError>;

    async fn unregister(&self, record: RegistrationRecord) -> Result<(), RegistryError>;

    /// Set when the transport can receive files directly.
    fn file_handoff(&self) -> Option<&dyn FileHandoff> {
        None
    }
}

/// Hands a local file to the registry side.
pub trait FileHandoff: Send + Sync {
    /// Returns the `inode://` URL the file is known by afterwards.
    fn hand_off(&self, path: &Path) -> Result<String, RegistryError>;
}
