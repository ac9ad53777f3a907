//! Firewall network-service endpoint.

pub mod config;
pub mod dataplane;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod resilience;

pub use config::EndpointConfig;
pub use lifecycle::{LifecycleError, Orchestrator, Shutdown};
