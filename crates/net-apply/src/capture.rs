//! Read-only capture of the live network state

use indexmap::IndexMap;
use log::{debug, info, warn};

use netstate_core::Backends;
use netstate_types::{
    validate_interface_name, DeclarativeConfig, InterfaceState, RuleEntry, Snapshot, Violation,
    LOOPBACK, NOT_AVAILABLE,
};

/// Builds a [`Snapshot`] from the backends without changing anything.
pub struct StateCapturer {
    backends: Backends,
    adopt_unmanaged: bool,
}

impl StateCapturer {
    pub fn new(backends: Backends) -> Self {
        Self {
            backends,
            adopt_unmanaged: true,
        }
    }

    /// Capture the declarative document exactly as found, without recording
    /// addresses of interfaces it does not manage.
    pub fn without_adoption(mut self) -> Self {
        self.adopt_unmanaged = false;
        self
    }

    /// Capture the current state. Backend failures degrade to empty parts of
    /// the snapshot; the result always validates.
    pub async fn capture(&self) -> Snapshot {
        let interfaces = self.capture_interfaces().await;
        let firewall_rules = self.capture_rules().await;
        let mut network_config = self.capture_declarative().await;

        if self.adopt_unmanaged {
            for (name, state) in &interfaces {
                if network_config.adopt_addresses(name, &state.routable_addresses()) {
                    debug!("Recorded unmanaged addresses of {} as static", name);
                }
            }
        }

        info!(
            "Captured {} interfaces and {} firewall rules",
            interfaces.len(),
            firewall_rules.len()
        );

        Snapshot {
            interfaces,
            network_config,
            firewall_rules,
            ..Snapshot::default()
        }
    }

    async fn capture_interfaces(&self) -> IndexMap<String, InterfaceState> {
        let states = match self.backends.interfaces.list_interface_states().await {
            Ok(states) => states,
            Err(e) => {
                warn!("Failed to read interfaces: {}", e);
                return IndexMap::new();
            }
        };

        let mut interfaces = IndexMap::new();
        for (name, state) in states {
            if name == LOOPBACK {
                continue;
            }
            if let Err(violation) = validate_interface_name(&name) {
                warn!("Skipping interface: {}", violation);
                continue;
            }
            interfaces.insert(name.clone(), sanitize(&name, state));
        }
        interfaces
    }

    async fn capture_rules(&self) -> Vec<RuleEntry> {
        let rules = match self.backends.rules.list_all_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Failed to read firewall rules: {}", e);
                return Vec::new();
            }
        };

        rules
            .into_iter()
            .filter(|rule| match rule.validate() {
                Ok(()) => true,
                Err(violation) => {
                    warn!("Skipping firewall rule: {}", violation);
                    false
                }
            })
            .map(RuleEntry::from)
            .collect()
    }

    async fn capture_declarative(&self) -> DeclarativeConfig {
        match self.backends.declarative.load_current_config().await {
            Ok(mut config) => {
                config.ensure_structure();
                config
            }
            Err(e) => {
                warn!("Failed to read netplan configuration: {}", e);
                DeclarativeConfig::default()
            }
        }
    }
}

/// Drop addresses and hardware addresses that would not validate.
fn sanitize(name: &str, mut state: InterfaceState) -> InterfaceState {
    for violation in state.validate(name) {
        warn!("Interface {}: {}", name, violation);
        match violation {
            Violation::InvalidAddress { address, .. }
            | Violation::WrongAddressFamily { address, .. } => {
                state.ipv4.retain(|a| *a != address);
                state.ipv6.retain(|a| *a != address);
            }
            Violation::InvalidHardwareAddress { .. } => state.mac = NOT_AVAILABLE.to_string(),
            _ => {}
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use netstate_core::{
        BackendError, MockDeclarativeBackend, MockInterfaceBackend, MockRuleBackend,
    };
    use netstate_types::{validate, Action, Chain, LinkStatus, Protocol, Rule};
    use serde_json::json;

    fn unavailable(backend: &str) -> netstate_core::NetworkError {
        BackendError::Unavailable {
            backend: backend.to_string(),
            reason: "not installed".to_string(),
        }
        .into()
    }

    fn live_interfaces() -> IndexMap<String, InterfaceState> {
        let mut states = IndexMap::new();
        states.insert(
            "lo".to_string(),
            InterfaceState::new(LinkStatus::Up).with_ipv4("127.0.0.1/8"),
        );
        states.insert(
            "eth0".to_string(),
            InterfaceState::new(LinkStatus::Up)
                .with_ipv4("192.168.1.50/24")
                .with_ipv6("fe80::1/64")
                .with_mac("52:54:00:12:34:56"),
        );
        states.insert(
            "eth1".to_string(),
            InterfaceState::new(LinkStatus::Down)
                .with_ipv4("not-an-address")
                .with_mac("garbage"),
        );
        states
    }

    #[tokio::test]
    async fn test_capture_with_failing_backends() {
        let mut interfaces = MockInterfaceBackend::new();
        interfaces
            .expect_list_interface_states()
            .returning(|| Err(unavailable("ip")));
        let mut rules = MockRuleBackend::new();
        rules
            .expect_list_all_rules()
            .returning(|| Err(unavailable("iptables")));
        let mut declarative = MockDeclarativeBackend::new();
        declarative
            .expect_load_current_config()
            .returning(|| Err(unavailable("netplan")));

        let backends = Backends::new(Arc::new(interfaces), Arc::new(rules), Arc::new(declarative));
        let snapshot = StateCapturer::new(backends).capture().await;

        assert!(snapshot.interfaces.is_empty());
        assert!(snapshot.firewall_rules.is_empty());
        assert_eq!(snapshot.network_config, DeclarativeConfig::default());
        assert!(validate(&snapshot).is_empty());
    }

    #[tokio::test]
    async fn test_capture_filters_live_state() {
        let mut interfaces = MockInterfaceBackend::new();
        interfaces
            .expect_list_interface_states()
            .times(1)
            .returning(|| Ok(live_interfaces()));
        let mut rules = MockRuleBackend::new();
        rules.expect_list_all_rules().times(1).returning(|| {
            Ok(vec![
                Rule::new(Chain::Input, Action::Accept)
                    .with_protocol(Protocol::Tcp)
                    .with_port(22),
                Rule::new(Chain::Input, Action::Accept).with_protocol(Protocol::Tcp),
            ])
        });
        let mut declarative = MockDeclarativeBackend::new();
        declarative
            .expect_load_current_config()
            .times(1)
            .returning(|| Ok(DeclarativeConfig::default()));

        let backends = Backends::new(Arc::new(interfaces), Arc::new(rules), Arc::new(declarative));
        let snapshot = StateCapturer::new(backends).capture().await;

        assert_eq!(
            snapshot.interfaces.keys().collect::<Vec<_>>(),
            vec!["eth0", "eth1"]
        );
        let eth1 = &snapshot.interfaces["eth1"];
        assert!(eth1.ipv4.is_empty());
        assert_eq!(eth1.mac, NOT_AVAILABLE);
        assert_eq!(snapshot.firewall_rules.len(), 1);
        assert!(validate(&snapshot).is_empty());

        // link-local addresses are not adopted
        assert_eq!(
            snapshot.network_config.addresses_for("eth0"),
            vec!["192.168.1.50/24"]
        );
        assert!(snapshot.network_config.ethernet("eth1").is_none());
    }

    #[tokio::test]
    async fn test_capture_keeps_existing_ethernets_entry() {
        let mut interfaces = MockInterfaceBackend::new();
        interfaces
            .expect_list_interface_states()
            .returning(|| Ok(live_interfaces()));
        let mut rules = MockRuleBackend::new();
        rules.expect_list_all_rules().returning(|| Ok(vec![]));
        let mut declarative = MockDeclarativeBackend::new();
        declarative.expect_load_current_config().returning(|| {
            Ok(DeclarativeConfig::from_value(json!({
                "network": {"version": 2, "ethernets": {"eth0": {"dhcp4": true}}}
            }))
            .unwrap())
        });

        let backends = Backends::new(Arc::new(interfaces), Arc::new(rules), Arc::new(declarative));
        let capturer = StateCapturer::new(backends.clone());
        let snapshot = capturer.capture().await;
        assert_eq!(
            snapshot.network_config.ethernet("eth0").unwrap()["dhcp4"],
            true
        );
        assert!(snapshot.network_config.addresses_for("eth0").is_empty());

        let raw = StateCapturer::new(backends).without_adoption().capture().await;
        assert_eq!(raw.network_config.interface_names(), vec!["eth0"]);
    }
}
