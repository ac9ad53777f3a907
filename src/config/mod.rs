//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → NSM_* environment overlay
//!     → validation.rs (semantic checks)
//!     → acl.rs (rules appended from the ACL file)
//!     → EndpointConfig (validated, immutable)
//!     → handed to the orchestrator
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod acl;
pub mod loader;
pub mod schema;
pub mod validation;

pub use acl::AclRule;
pub use loader::{env_usage, load_config, ConfigError};
pub use schema::{DataplaneConfig, EndpointConfig, IdentityConfig, ObservabilityConfig};
