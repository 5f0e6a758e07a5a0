use chrono::{DateTime, SubsecRound, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::firewall::RuleEntry;
use crate::network::{validate_interface_name, DeclarativeConfig, InterfaceState};

/// Format tag written into every persisted snapshot.
pub const SCHEMA_VERSION: &str = "1.0";

/// Point-in-time record of interface, rule and declarative network state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "version", default = "current_version")]
    pub schema_version: String,
    /// Set by the store when the snapshot is written
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interfaces: IndexMap<String, InterfaceState>,
    #[serde(default)]
    pub network_config: DeclarativeConfig,
    #[serde(default)]
    pub firewall_rules: Vec<RuleEntry>,
}

fn current_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            schema_version: current_version(),
            captured_at: None,
            interfaces: IndexMap::new(),
            network_config: DeclarativeConfig::default(),
            firewall_rules: Vec::new(),
        }
    }
}

impl Snapshot {
    /// Copy of this snapshot carrying the save-time metadata.
    pub fn stamped(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot {
            schema_version: current_version(),
            captured_at: Some(now.trunc_subsecs(0)),
            ..self.clone()
        }
    }

    pub fn is_supported_version(&self) -> bool {
        is_supported_version(&self.schema_version)
    }
}

/// Versions sharing the major component of [`SCHEMA_VERSION`] are readable.
pub fn is_supported_version(version: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_string);
    major(version) == major(SCHEMA_VERSION)
}

/// A broken data model invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    #[error("loopback interface must not be part of a snapshot")]
    LoopbackInterface,

    #[error("invalid interface name: {name}")]
    InvalidInterfaceName { name: String },

    #[error("interface {interface}: invalid address {address}")]
    InvalidAddress { interface: String, address: String },

    #[error("interface {interface}: address {address} listed under the wrong family")]
    WrongAddressFamily { interface: String, address: String },

    #[error("interface {interface}: invalid hardware address {mac}")]
    InvalidHardwareAddress { interface: String, mac: String },

    #[error("rule '{rule}': tcp/udp rules need a destination port")]
    MissingPort { rule: String },

    #[error("rule '{rule}': a destination port needs protocol tcp or udp")]
    UnexpectedPort { rule: String },

    #[error("rule '{rule}': port 0 is not a valid destination port")]
    InvalidPort { rule: String },

    #[error("rule '{rule}': invalid source address {source_address}")]
    InvalidSource {
        rule: String,
        source_address: String,
    },

    #[error("malformed firewall rule {entry}")]
    MalformedRule { entry: String },

    #[error("network config lacks the network.ethernets container")]
    MissingAddressingContainer,

    #[error("unsupported snapshot version {version}")]
    UnsupportedVersion { version: String },
}

/// Check `snapshot` against the data model invariants. An empty result means
/// the snapshot is valid.
pub fn validate(snapshot: &Snapshot) -> Vec<Violation> {
    let mut violations = Vec::new();

    if !snapshot.is_supported_version() {
        violations.push(Violation::UnsupportedVersion {
            version: snapshot.schema_version.clone(),
        });
    }

    for (name, state) in &snapshot.interfaces {
        if let Err(violation) = validate_interface_name(name) {
            violations.push(violation);
        }
        violations.extend(state.validate(name));
    }

    if !snapshot.network_config.has_addressing_container() {
        violations.push(Violation::MissingAddressingContainer);
    }

    violations.extend(
        snapshot
            .firewall_rules
            .iter()
            .filter_map(|entry| entry.validate().err()),
    );

    violations
}
