//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate required identifiers and the registry URL
//! - Validate value ranges (token lifetime > 0, known log level)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EndpointConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use url::Url;

use crate::config::schema::EndpointConfig;
use crate::observability::logging::parse_level;

/// Registry URL schemes the endpoint can dial.
pub const SUPPORTED_SCHEMES: [&str; 3] = ["unix", "tcp", "https"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Empty(&'static str),
    PathSeparator { field: &'static str, value: String },
    InvalidUrl { value: String, reason: String },
    UnsupportedScheme(String),
    InvalidLogLevel(String),
    ZeroTokenLifetime,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Empty(field) => write!(f, "{field} must not be empty"),
            ValidationError::PathSeparator { field, value } => {
                write!(f, "{field} {value:?} must not contain a path separator")
            }
            ValidationError::InvalidUrl { value, reason } => {
                write!(f, "connect_to {value:?} is not a valid URL: {reason}")
            }
            ValidationError::UnsupportedScheme(scheme) => {
                write!(f, "connect_to scheme {scheme:?} is not one of unix, tcp, https")
            }
            ValidationError::InvalidLogLevel(level) => write!(f, "unknown log level {level:?}"),
            ValidationError::ZeroTokenLifetime => write!(f, "max_token_lifetime must be positive"),
        }
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &EndpointConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (field, value) in [
        ("name", &config.name),
        ("service_name", &config.service_name),
        ("listen_on", &config.listen_on),
        ("connect_to", &config.connect_to),
    ] {
        if value.trim().is_empty() {
            errors.push(ValidationError::Empty(field));
        }
    }

    for (field, value) in [("name", &config.name), ("listen_on", &config.listen_on)] {
        if value.contains(std::path::MAIN_SEPARATOR) || value.contains('/') {
            errors.push(ValidationError::PathSeparator {
                field,
                value: value.clone(),
            });
        }
    }

    if !config.connect_to.trim().is_empty() {
        match Url::parse(&config.connect_to) {
            Ok(url) if !SUPPORTED_SCHEMES.contains(&url.scheme()) => {
                errors.push(ValidationError::UnsupportedScheme(url.scheme().to_string()));
            }
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::InvalidUrl {
                value: config.connect_to.clone(),
                reason: e.to_string(),
            }),
        }
    }

    if config.registry_client_policies.is_empty() {
        errors.push(ValidationError::Empty("registry_client_policies"));
    }

    if parse_level(&config.log_level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(config.log_level.clone()));
    }

    if config.max_token_lifetime.is_zero() {
        errors.push(ValidationError::ZeroTokenLifetime);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn valid() -> EndpointConfig {
        EndpointConfig {
            service_name: "firewall".to_string(),
            ..EndpointConfig::default()
        }
    }

    #[test]
    fn test_defaults_with_service_are_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn test_default_lacks_service_name() {
        let errors = validate_config(&EndpointConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::Empty("service_name")]);
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid();
        config.name = "a/b".to_string();
        config.connect_to = "ftp://registry".to_string();
        config.log_level = "LOUD".to_string();
        config.max_token_lifetime = Duration::ZERO;
        config.registry_client_policies.clear();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::UnsupportedScheme("ftp".to_string())));
        assert!(errors.contains(&ValidationError::ZeroTokenLifetime));
        assert!(errors.contains(&ValidationError::Empty("registry_client_policies")));
    }

    #[test]
    fn test_accepts_supported_schemes() {
        for url in ["unix:///var/lib/nsm.sock", "tcp://127.0.0.1:5002", "https://registry:443"] {
            let mut config = valid();
            config.connect_to = url.to_string();
            assert_eq!(validate_config(&config), Ok(()), "{url}");
        }
    }

    #[test]
    fn test_rejects_garbage_url() {
        let mut config = valid();
        config.connect_to = "not a url".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidUrl { .. }));
    }
}
