//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the endpoint.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::acl::AclRule;

/// Root configuration for the endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Endpoint name registered with the mesh registry.
    pub name: String,

    /// Socket file name created inside the listener's private directory.
    pub listen_on: String,

    /// Registry URL (`unix://`, `tcp://` or `https://`).
    pub connect_to: String,

    /// Maximum lifetime of issued tokens; drives registration expiry.
    #[serde(with = "humantime_serde")]
    pub max_token_lifetime: Duration,

    /// Policy file locations for the registry client authorization filter.
    pub registry_client_policies: Vec<String>,

    /// Name of the provided network service.
    pub service_name: String,

    /// Endpoint labels.
    pub labels: BTreeMap<String, String>,

    /// Path to the ACL rules file.
    pub acl_config_path: PathBuf,

    /// Configured ACL rules.
    pub acl_rules: Vec<AclRule>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR).
    pub log_level: String,

    /// Upper bound for each drain step (deregistration, subsystem stop).
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// Workload identity files.
    pub identity: IdentityConfig,

    /// Dataplane process settings.
    pub dataplane: DataplaneConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "firewall-server".to_string(),
            listen_on: "listen.on.sock".to_string(),
            connect_to: "unix:///var/lib/networkservicemesh/nsm.io.sock".to_string(),
            max_token_lifetime: Duration::from_secs(10 * 60),
            registry_client_policies: vec![
                "etc/nsm/opa/common/.*.rego".to_string(),
                "etc/nsm/opa/registry/.*.rego".to_string(),
                "etc/nsm/opa/client/.*.rego".to_string(),
            ],
            service_name: String::new(),
            labels: BTreeMap::new(),
            acl_config_path: PathBuf::from("/etc/firewall/config.yaml"),
            acl_rules: Vec::new(),
            log_level: "INFO".to_string(),
            drain_timeout: Duration::from_secs(5),
            identity: IdentityConfig::default(),
            dataplane: DataplaneConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Locations of the PEM files written by the workload identity helper.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Leaf certificate chain (PEM).
    pub cert_path: PathBuf,

    /// Private key of the leaf certificate (PEM).
    pub key_path: PathBuf,

    /// Trust bundle (PEM).
    pub bundle_path: PathBuf,

    /// Reload the files when they change on disk.
    pub watch: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("/run/spiffe/svid.pem"),
            key_path: PathBuf::from("/run/spiffe/svid_key.pem"),
            bundle_path: PathBuf::from("/run/spiffe/bundle.pem"),
            watch: true,
        }
    }
}

/// Dataplane process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataplaneConfig {
    /// Executable that runs the dataplane.
    pub command: String,

    /// Arguments passed to the dataplane executable.
    pub args: Vec<String>,

    /// API socket the dataplane accepts connections on.
    pub api_socket: PathBuf,
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            command: "vpp".to_string(),
            args: vec!["-c".to_string(), "/etc/vpp/helper/vpp.conf".to_string()],
            api_socket: PathBuf::from("/var/run/vpp/api.sock"),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
