use std::net::IpAddr;

use ipnet::IpNet;
use mac_address::MacAddress;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{SharedResult, SharedTypeError};
use crate::snapshot::Violation;

/// Name of the loopback interface, never part of a snapshot.
pub const LOOPBACK: &str = "lo";

/// Placeholder used when an interface has no hardware address.
pub const NOT_AVAILABLE: &str = "N/A";

/// Top-level key of the declarative document.
pub const NETWORK_KEY: &str = "network";

/// Addressing-mode container inside the `network` section.
pub const ETHERNETS_KEY: &str = "ethernets";

/// Declarative format version written for new documents.
pub const DECLARATIVE_VERSION: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    #[serde(rename = "UP", alias = "Up")]
    Up,
    #[serde(rename = "DOWN", alias = "Down")]
    Down,
}

impl LinkStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, LinkStatus::Up)
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Up => f.write_str("UP"),
            LinkStatus::Down => f.write_str("DOWN"),
        }
    }
}

/// Link state and addressing of one interface at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceState {
    pub status: LinkStatus,
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub ipv6: Vec<String>,
    #[serde(default = "not_available")]
    pub mac: String,
}

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

impl InterfaceState {
    pub fn new(status: LinkStatus) -> Self {
        Self {
            status,
            ipv4: Vec::new(),
            ipv6: Vec::new(),
            mac: not_available(),
        }
    }

    pub fn with_ipv4(mut self, address: impl Into<String>) -> Self {
        self.ipv4.push(address.into());
        self
    }

    pub fn with_ipv6(mut self, address: impl Into<String>) -> Self {
        self.ipv6.push(address.into());
        self
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = mac.into();
        self
    }

    /// Addresses worth persisting as static configuration: all IPv4
    /// addresses plus IPv6 addresses outside fe80::/10.
    pub fn routable_addresses(&self) -> Vec<String> {
        self.ipv4
            .iter()
            .chain(self.ipv6.iter().filter(|addr| {
                matches!(
                    addr.parse::<IpNet>().map(|net| net.addr()),
                    Ok(IpAddr::V6(v6)) if v6.segments()[0] & 0xffc0 != 0xfe80
                )
            }))
            .cloned()
            .collect()
    }

    /// Check addresses and hardware address of the interface `name`.
    pub fn validate(&self, name: &str) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (addresses, want_v4) in [(&self.ipv4, true), (&self.ipv6, false)] {
            for address in addresses {
                match address.parse::<IpNet>() {
                    Ok(net) if matches!(net.addr(), IpAddr::V4(_)) == want_v4 => {}
                    Ok(_) => violations.push(Violation::WrongAddressFamily {
                        interface: name.to_string(),
                        address: address.clone(),
                    }),
                    Err(_) => violations.push(Violation::InvalidAddress {
                        interface: name.to_string(),
                        address: address.clone(),
                    }),
                }
            }
        }

        if self.mac != NOT_AVAILABLE && self.mac.parse::<MacAddress>().is_err() {
            violations.push(Violation::InvalidHardwareAddress {
                interface: name.to_string(),
                mac: self.mac.clone(),
            });
        }

        violations
    }
}

/// Check a kernel interface name.
pub fn validate_interface_name(name: &str) -> Result<(), Violation> {
    if name == LOOPBACK {
        return Err(Violation::LoopbackInterface);
    }

    let valid = !name.is_empty()
        && name.len() <= 15
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(Violation::InvalidInterfaceName {
            name: name.to_string(),
        })
    }
}

/// Declarative (netplan) network document.
///
/// The document is kept as a generic JSON mapping so that fields this crate
/// does not model survive a capture/restore cycle unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclarativeConfig(Map<String, Value>);

impl Default for DeclarativeConfig {
    fn default() -> Self {
        let mut map = Map::new();
        map.insert(
            NETWORK_KEY.to_string(),
            json!({ "version": DECLARATIVE_VERSION, ETHERNETS_KEY: {} }),
        );
        Self(map)
    }
}

impl DeclarativeConfig {
    /// Build a document from a parsed value. `null` (an empty YAML file)
    /// yields the default document.
    pub fn from_value(value: Value) -> SharedResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(SharedTypeError::Unsupported(format!(
                "network config must be a mapping, got {}",
                other
            ))),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    fn network(&self) -> Option<&Map<String, Value>> {
        self.0.get(NETWORK_KEY).and_then(Value::as_object)
    }

    /// Whether the `network.ethernets` container is present.
    pub fn has_addressing_container(&self) -> bool {
        self.ethernets().is_some()
    }

    /// Add `network`, `network.version` and `network.ethernets` where missing.
    /// Existing content is left untouched.
    pub fn ensure_structure(&mut self) {
        self.update_ethernets(|_| ());
    }

    /// Run `f` on `network.ethernets`, creating the path where missing.
    /// A non-mapping value on the path is replaced by an empty mapping.
    fn update_ethernets<R>(&mut self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let network = self.0.entry(NETWORK_KEY.to_string()).or_insert(Value::Null);
        update_object(network, |network| {
            network
                .entry("version".to_string())
                .or_insert_with(|| json!(DECLARATIVE_VERSION));
            let ethernets = network
                .entry(ETHERNETS_KEY.to_string())
                .or_insert(Value::Null);
            update_object(ethernets, f)
        })
    }

    /// True when the document configures nothing: no `network` section, or
    /// one holding only `version` and an empty `ethernets` container.
    pub fn is_empty(&self) -> bool {
        if self.0.keys().any(|key| key != NETWORK_KEY) {
            return false;
        }

        match self.network() {
            None => true,
            Some(network) => network.iter().all(|(key, value)| match key.as_str() {
                "version" => true,
                ETHERNETS_KEY => value.as_object().map(Map::is_empty).unwrap_or(true),
                _ => false,
            }),
        }
    }

    pub fn ethernets(&self) -> Option<&Map<String, Value>> {
        self.network()
            .and_then(|network| network.get(ETHERNETS_KEY))
            .and_then(Value::as_object)
    }

    /// Names of interfaces with an addressing entry.
    pub fn interface_names(&self) -> Vec<String> {
        self.ethernets()
            .map(|ethernets| ethernets.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ethernet(&self, interface: &str) -> Option<&Map<String, Value>> {
        self.ethernets()
            .and_then(|ethernets| ethernets.get(interface))
            .and_then(Value::as_object)
    }

    /// Static addresses configured for `interface`. Both plain strings and
    /// the single-key mapping form (`{"10.0.0.1/24": {lifetime: 0}}`) count.
    pub fn addresses_for(&self, interface: &str) -> Vec<String> {
        let Some(addresses) = self
            .ethernet(interface)
            .and_then(|entry| entry.get("addresses"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        addresses
            .iter()
            .filter_map(|address| match address {
                Value::String(address) => Some(address.clone()),
                Value::Object(map) => map.keys().next().cloned(),
                _ => None,
            })
            .collect()
    }

    /// Replace the entry of `interface` with a static configuration.
    pub fn configure_static(
        &mut self,
        interface: &str,
        address: &str,
        gateway: Option<&str>,
        nameservers: &[String],
    ) {
        let mut entry = Map::new();
        entry.insert("dhcp4".to_string(), Value::Bool(false));
        entry.insert("addresses".to_string(), json!([address]));
        if let Some(gateway) = gateway {
            entry.insert(
                "routes".to_string(),
                json!([{ "to": "default", "via": gateway }]),
            );
        }
        if !nameservers.is_empty() {
            entry.insert(
                "nameservers".to_string(),
                json!({ "addresses": nameservers }),
            );
        }

        self.update_ethernets(|ethernets| {
            ethernets.insert(interface.to_string(), Value::Object(entry));
        });
    }

    /// Switch `interface` to DHCP, dropping its static IPv4 settings and
    /// keeping everything else in its entry.
    pub fn configure_dhcp(&mut self, interface: &str) {
        self.update_ethernets(|ethernets| {
            let entry = ethernets
                .entry(interface.to_string())
                .or_insert(Value::Null);
            update_object(entry, |entry| {
                for key in ["addresses", "gateway4", "nameservers", "routes"] {
                    entry.remove(key);
                }
                entry.insert("dhcp4".to_string(), Value::Bool(true));
            });
        });
    }

    /// Record `addresses` as a static entry for `interface` unless the
    /// document already has an entry for it. Returns whether an entry was
    /// added.
    pub fn adopt_addresses(&mut self, interface: &str, addresses: &[String]) -> bool {
        if addresses.is_empty() {
            return false;
        }

        self.update_ethernets(|ethernets| {
            if ethernets.contains_key(interface) {
                return false;
            }

            ethernets.insert(
                interface.to_string(),
                json!({ "dhcp4": false, "addresses": addresses }),
            );
            true
        })
    }
}

/// Run `f` on the mapping held in `slot`, which keeps its position in the
/// parent. Anything other than a mapping is replaced by an empty one.
fn update_object<R>(slot: &mut Value, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
    let mut object = match std::mem::take(slot) {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    let result = f(&mut object);
    *slot = Value::Object(object);
    result
}
