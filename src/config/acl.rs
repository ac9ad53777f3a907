//! ACL rule records.
//!
//! Rules are read from a YAML map of `rule name → rule`. They are handed to
//! the firewall chain as opaque records; nothing here interprets them.

use std::collections::BTreeMap;
use std::fs;

use serde::{Deserialize, Serialize};

use crate::config::schema::EndpointConfig;

/// A single access rule, keyed the way the rules file spells it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AclRule {
    /// 0 = deny, 1 = permit, 2 = permit and reflect.
    #[serde(rename = "ispermit")]
    pub is_permit: u8,

    #[serde(rename = "srcprefix", skip_serializing_if = "Option::is_none")]
    pub src_prefix: Option<String>,

    #[serde(rename = "dstprefix", skip_serializing_if = "Option::is_none")]
    pub dst_prefix: Option<String>,

    /// IP protocol number (0 = any).
    pub proto: u8,

    #[serde(rename = "srcportoricmptypefirst")]
    pub srcport_or_icmptype_first: u16,

    #[serde(rename = "srcportoricmptypelast")]
    pub srcport_or_icmptype_last: u16,

    #[serde(rename = "dstportoricmpcodefirst")]
    pub dstport_or_icmpcode_first: u16,

    #[serde(rename = "dstportoricmpcodelast")]
    pub dstport_or_icmpcode_last: u16,

    #[serde(rename = "tcpflagsmask")]
    pub tcp_flags_mask: u8,

    #[serde(rename = "tcpflagsvalue")]
    pub tcp_flags_value: u8,
}

/// Parse a rules document. Rules come back ordered by name.
pub fn parse_acl_rules(raw: &str) -> Result<Vec<AclRule>, serde_yaml::Error> {
    let rules: BTreeMap<String, AclRule> = serde_yaml::from_str(raw)?;
    Ok(rules.into_values().collect())
}

impl EndpointConfig {
    /// Append the rules from `acl_config_path`.
    ///
    /// Read and parse failures are logged and leave the rule list untouched.
    pub fn load_acl_rules(&mut self) {
        let path = &self.acl_config_path;

        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(acl = "config", path = %path.display(), error = %e, "Error reading config file");
                return;
            }
        };
        tracing::info!(acl = "config", "Read config file successfully");

        let rules = match parse_acl_rules(&raw) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!(acl = "config", path = %path.display(), error = %e, "Error parsing config file");
                return;
            }
        };
        tracing::info!(acl = "config", count = rules.len(), "Parsed acl rules successfully");

        self.acl_rules.extend(rules);
        tracing::info!(acl = "config", rules = ?self.acl_rules, "Result rules");
    }
}
