use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::SharedTypeError;
use crate::snapshot::Violation;

/// Packet-filter chain of the `filter` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    #[serde(rename = "INPUT")]
    Input,
    #[serde(rename = "OUTPUT")]
    Output,
    #[serde(rename = "FORWARD")]
    Forward,
}

impl Chain {
    /// All chains, in the order they are listed and captured.
    pub const ALL: [Chain; 3] = [Chain::Input, Chain::Output, Chain::Forward];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Input => "INPUT",
            Chain::Output => "OUTPUT",
            Chain::Forward => "FORWARD",
        }
    }
}

impl FromStr for Chain {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INPUT" => Ok(Chain::Input),
            "OUTPUT" => Ok(Chain::Output),
            "FORWARD" => Ok(Chain::Forward),
            _ => Err(SharedTypeError::InvalidValue {
                field: "chain",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }

    /// Whether rules using this protocol must match on a destination port.
    pub fn requires_port(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl FromStr for Protocol {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            _ => Err(SharedTypeError::InvalidValue {
                field: "protocol",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "ACCEPT")]
    Accept,
    #[serde(rename = "DROP")]
    Drop,
    #[serde(rename = "REJECT")]
    Reject,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Accept => "ACCEPT",
            Action::Drop => "DROP",
            Action::Reject => "REJECT",
        }
    }
}

impl FromStr for Action {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACCEPT" => Ok(Action::Accept),
            "DROP" => Ok(Action::Drop),
            "REJECT" => Ok(Action::Reject),
            _ => Err(SharedTypeError::InvalidValue {
                field: "action",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single packet-filter rule as persisted in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub chain: Chain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    /// Destination port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Source address or network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Rule {
    pub fn new(chain: Chain, action: Action) -> Self {
        Self {
            chain,
            protocol: None,
            port: None,
            source: None,
            action,
            description: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the rule against the data model invariants.
    pub fn validate(&self) -> Result<(), Violation> {
        match (self.protocol, self.port) {
            (Some(protocol), None) if protocol.requires_port() => {
                return Err(Violation::MissingPort {
                    rule: self.to_string(),
                });
            }
            (protocol, Some(_)) if !protocol.map(|p| p.requires_port()).unwrap_or(false) => {
                return Err(Violation::UnexpectedPort {
                    rule: self.to_string(),
                });
            }
            (_, Some(0)) => {
                return Err(Violation::InvalidPort {
                    rule: self.to_string(),
                });
            }
            _ => {}
        }

        if let Some(source) = &self.source {
            let valid = source.parse::<IpNet>().is_ok() || source.parse::<IpAddr>().is_ok();
            if !valid {
                return Err(Violation::InvalidSource {
                    rule: self.to_string(),
                    source_address: source.clone(),
                });
            }
        }

        Ok(())
    }

    /// Compare the matching part of two rules, ignoring the description.
    pub fn same_spec(&self, other: &Rule) -> bool {
        self.chain == other.chain
            && self.protocol == other.protocol
            && self.port == other.port
            && self.action == other.action
            && normalize_source(self.source.as_deref()) == normalize_source(other.source.as_deref())
    }
}

/// iptables reports host sources as /32 (or /128) networks.
fn normalize_source(source: Option<&str>) -> Option<IpNet> {
    let source = source?;
    source
        .parse::<IpNet>()
        .ok()
        .or_else(|| {
            let addr = source.parse::<IpAddr>().ok()?;
            let prefix = if addr.is_ipv4() { 32 } else { 128 };
            IpNet::new(addr, prefix).ok()
        })
        .map(|net| net.trunc())
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.chain)?;
        if let Some(protocol) = self.protocol {
            write!(f, " -p {}", protocol)?;
        }
        if let Some(port) = self.port {
            write!(f, " --dport {}", port)?;
        }
        if let Some(source) = &self.source {
            write!(f, " -s {}", source)?;
        }
        write!(f, " -j {}", self.action)
    }
}

/// Entry of a snapshot's rule list. Entries that do not parse as a [`Rule`]
/// are kept verbatim so the remaining rules can still be restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleEntry {
    Rule(Rule),
    Malformed(serde_json::Value),
}

impl RuleEntry {
    pub fn as_rule(&self) -> Option<&Rule> {
        match self {
            RuleEntry::Rule(rule) => Some(rule),
            RuleEntry::Malformed(_) => None,
        }
    }

    /// The rule, if it parsed and satisfies the data model invariants.
    pub fn validate(&self) -> Result<&Rule, Violation> {
        match self {
            RuleEntry::Rule(rule) => rule.validate().map(|()| rule),
            RuleEntry::Malformed(value) => Err(Violation::MalformedRule {
                entry: value.to_string(),
            }),
        }
    }
}

impl From<Rule> for RuleEntry {
    fn from(rule: Rule) -> Self {
        RuleEntry::Rule(rule)
    }
}

impl fmt::Display for RuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleEntry::Rule(rule) => rule.fmt(f),
            RuleEntry::Malformed(value) => write!(f, "{}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rule_fields_case_insensitively() {
        assert_eq!("input".parse::<Chain>().unwrap(), Chain::Input);
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("reject".parse::<Action>().unwrap(), Action::Reject);
        assert!("PREROUTING".parse::<Chain>().is_err());
        assert!("sctp".parse::<Protocol>().is_err());
    }

    #[test]
    fn tcp_and_udp_require_port() {
        let rule = Rule::new(Chain::Input, Action::Accept).with_protocol(Protocol::Tcp);
        assert!(matches!(rule.validate(), Err(Violation::MissingPort { .. })));

        let rule = rule.with_port(22);
        assert!(rule.validate().is_ok());

        let icmp = Rule::new(Chain::Input, Action::Drop).with_protocol(Protocol::Icmp);
        assert!(icmp.validate().is_ok());
    }

    #[test]
    fn port_without_tcp_or_udp_is_rejected() {
        let rule = Rule::new(Chain::Input, Action::Accept).with_port(80);
        assert!(matches!(
            rule.validate(),
            Err(Violation::UnexpectedPort { .. })
        ));
    }

    #[test]
    fn source_must_be_address_or_network() {
        let rule = Rule::new(Chain::Input, Action::Drop).with_source("10.0.0.0/8");
        assert!(rule.validate().is_ok());

        let rule = Rule::new(Chain::Input, Action::Drop).with_source("not-an-ip");
        assert!(matches!(
            rule.validate(),
            Err(Violation::InvalidSource { .. })
        ));
    }

    #[test]
    fn same_spec_ignores_description_and_host_prefix() {
        let saved = Rule::new(Chain::Input, Action::Accept)
            .with_protocol(Protocol::Tcp)
            .with_port(22)
            .with_source("192.168.1.10")
            .with_description("Allow SSH");
        let live = Rule::new(Chain::Input, Action::Accept)
            .with_protocol(Protocol::Tcp)
            .with_port(22)
            .with_source("192.168.1.10/32");

        assert!(saved.same_spec(&live));
        assert!(!saved.same_spec(&live.clone().with_port(2222)));
    }

    #[test]
    fn serialized_rule_omits_absent_fields() {
        let rule = Rule::new(Chain::Forward, Action::Drop).with_protocol(Protocol::Icmp);
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"chain": "FORWARD", "protocol": "icmp", "action": "DROP"})
        );
        assert_eq!(rule.to_string(), "FORWARD -p icmp -j DROP");
    }

    #[test]
    fn unparsable_entries_are_kept_verbatim() {
        let entries: Vec<RuleEntry> = serde_json::from_value(serde_json::json!([
            {"chain": "INPUT", "protocol": "tcp", "port": 22, "action": "ACCEPT"},
            {"chain": "INPUT", "protocol": "tcp", "port": "8080", "action": "ACCEPT"},
            {"chain": "input", "action": "DROP"},
            {"chain": "INPUT", "protocol": "all", "action": "ACCEPT"}
        ]))
        .unwrap();

        assert_eq!(entries.len(), 4);
        assert!(entries[0].validate().is_ok());
        for entry in &entries[1..] {
            assert!(entry.as_rule().is_none());
            assert!(matches!(
                entry.validate(),
                Err(Violation::MalformedRule { .. })
            ));
        }

        let json = serde_json::to_value(&entries[1]).unwrap();
        assert_eq!(json["port"], "8080");
    }
}
