//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::schema::EndpointConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix shared by every environment variable the endpoint reads.
pub const ENV_PREFIX: &str = "NSM_";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {message}")]
    Env { var: String, message: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Environment variables read by [`apply_env`], with their descriptions.
pub const ENV_USAGE: &[(&str, &str)] = &[
    ("NSM_CONFIG_FILE", "Path to an optional TOML configuration file"),
    ("NSM_NAME", "Name of the endpoint"),
    ("NSM_LISTEN_ON", "Socket file name the endpoint listens on"),
    ("NSM_CONNECT_TO", "URL of the registry to connect to"),
    ("NSM_MAX_TOKEN_LIFETIME", "Maximum lifetime of tokens (e.g. 10m)"),
    ("NSM_REGISTRY_CLIENT_POLICIES", "Comma-separated policy file paths for the registry client"),
    ("NSM_SERVICE_NAME", "Name of the provided network service"),
    ("NSM_LABELS", "Endpoint labels as key:value pairs separated by commas"),
    ("NSM_ACL_CONFIG_PATH", "Path to the ACL rules file"),
    ("NSM_LOG_LEVEL", "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"),
    ("NSM_DRAIN_TIMEOUT", "Upper bound for each shutdown step (e.g. 5s)"),
    ("NSM_IDENTITY_CERT_PATH", "PEM certificate chain of the workload identity"),
    ("NSM_IDENTITY_KEY_PATH", "PEM private key of the workload identity"),
    ("NSM_IDENTITY_BUNDLE_PATH", "PEM trust bundle of the workload identity"),
    ("NSM_DATAPLANE_API_SOCKET", "API socket of the dataplane process"),
    ("NSM_METRICS_ADDRESS", "Bind address of the metrics endpoint; setting it enables metrics"),
];

/// Render [`ENV_USAGE`] as a table.
pub fn env_usage() -> String {
    let width = ENV_USAGE.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut out = String::from("This application is configured via the environment. The following variables can be used:\n");
    for (key, description) in ENV_USAGE {
        out.push_str(&format!("  {key:<width$}  {description}\n"));
    }
    out
}

/// Load configuration: optional TOML file, then the process environment,
/// then validation.
pub fn load_config(path: Option<&Path>) -> Result<EndpointConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => EndpointConfig::default(),
    };

    apply_env(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn parse_file(path: &Path) -> Result<EndpointConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Overlay `NSM_*` variables from `vars` onto `config`.
///
/// Unknown `NSM_*` keys are ignored.
pub fn apply_env<I>(config: &mut EndpointConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(field) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match field {
            "NAME" => config.name = value,
            "LISTEN_ON" => config.listen_on = value,
            "CONNECT_TO" => config.connect_to = value,
            "MAX_TOKEN_LIFETIME" => config.max_token_lifetime = parse_duration(&key, &value)?,
            "REGISTRY_CLIENT_POLICIES" => config.registry_client_policies = split_list(&value),
            "SERVICE_NAME" => config.service_name = value,
            "LABELS" => config.labels = parse_labels(&key, &value)?,
            "ACL_CONFIG_PATH" => config.acl_config_path = value.into(),
            "LOG_LEVEL" => config.log_level = value,
            "DRAIN_TIMEOUT" => config.drain_timeout = parse_duration(&key, &value)?,
            "IDENTITY_CERT_PATH" => config.identity.cert_path = value.into(),
            "IDENTITY_KEY_PATH" => config.identity.key_path = value.into(),
            "IDENTITY_BUNDLE_PATH" => config.identity.bundle_path = value.into(),
            "DATAPLANE_API_SOCKET" => config.dataplane.api_socket = value.into(),
            "METRICS_ADDRESS" => {
                config.observability.metrics_address = value;
                config.observability.metrics_enabled = true;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_duration(var: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Env {
        var: var.to_string(),
        message: e.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_labels(
    var: &str,
    value: &str,
) -> Result<std::collections::BTreeMap<String, String>, ConfigError> {
    let mut labels = std::collections::BTreeMap::new();
    for pair in split_list(value) {
        let Some((k, v)) = pair.split_once(':') else {
            return Err(ConfigError::Env {
                var: var.to_string(),
                message: format!("label {pair:?} is not key:value"),
            });
        };
        labels.insert(k.trim().to_string(), v.trim().to_string());
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_env_overlay() {
        let mut config = EndpointConfig::default();
        apply_env(
            &mut config,
            vars(&[
                ("NSM_NAME", "fw1"),
                ("NSM_SERVICE_NAME", "firewall"),
                ("NSM_LABELS", "app:fw, tier:edge"),
                ("NSM_MAX_TOKEN_LIFETIME", "30s"),
                ("NSM_REGISTRY_CLIENT_POLICIES", "a.rego,b.rego"),
                ("NSM_METRICS_ADDRESS", "127.0.0.1:9100"),
                ("HOME", "/root"),
                ("NSM_UNKNOWN", "ignored"),
            ]),
        )
        .unwrap();

        assert_eq!(config.name, "fw1");
        assert_eq!(config.service_name, "firewall");
        assert_eq!(config.labels.get("app").map(String::as_str), Some("fw"));
        assert_eq!(config.labels.get("tier").map(String::as_str), Some("edge"));
        assert_eq!(config.max_token_lifetime, Duration::from_secs(30));
        assert_eq!(config.registry_client_policies, vec!["a.rego", "b.rego"]);
        assert!(config.observability.metrics_enabled);
        assert_eq!(config.observability.metrics_address, "127.0.0.1:9100");
    }

    #[test]
    fn test_env_bad_duration() {
        let mut config = EndpointConfig::default();
        let err = apply_env(&mut config, vars(&[("NSM_DRAIN_TIMEOUT", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "NSM_DRAIN_TIMEOUT"));
    }

    #[test]
    fn test_env_bad_label() {
        let mut config = EndpointConfig::default();
        let err = apply_env(&mut config, vars(&[("NSM_LABELS", "app")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_parse_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
name = "fw-toml"
service_name = "firewall"
drain_timeout = "2s"

[labels]
app = "fw"

[dataplane]
command = "/usr/bin/vpp"
"#
        )
        .unwrap();

        let config = parse_file(file.path()).unwrap();
        assert_eq!(config.name, "fw-toml");
        assert_eq!(config.drain_timeout, Duration::from_secs(2));
        assert_eq!(config.dataplane.command, "/usr/bin/vpp");
        assert_eq!(config.dataplane.args.len(), 2);
        assert_eq!(config.listen_on, "listen.on.sock");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = parse_file(Path::new("/nonexistent/endpoint.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_usage_lists_every_variable() {
        let usage = env_usage();
        for (key, _) in ENV_USAGE {
            assert!(usage.contains(key));
        }
    }
}
