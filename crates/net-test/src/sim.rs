//! In-memory host used by end-to-end scenarios
//!
//! [`SimulatedSystem`] implements all three backend traits over shared state
//! and counts every call, so scenarios can check both the resulting state and
//! which operations reached the "system".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;

use netstate_core::{
    BackendError, Backends, DeclarativeBackend, InterfaceBackend, NetworkError, Result,
    RuleBackend,
};
use netstate_types::{Chain, DeclarativeConfig, InterfaceState, LinkStatus, Rule, LOOPBACK};

/// Calls received by the simulated backends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub reads: usize,
    pub link_changes: usize,
    pub rule_inserts: usize,
    pub rule_deletes: usize,
    pub chain_clears: usize,
    pub config_writes: usize,
    pub config_applies: usize,
}

impl CallCounts {
    /// Number of calls that change the system
    pub fn mutations(&self) -> usize {
        self.link_changes
            + self.rule_inserts
            + self.rule_deletes
            + self.chain_clears
            + self.config_writes
            + self.config_applies
    }
}

/// Injected failures
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub interfaces_unavailable: bool,
    pub rules_unavailable: bool,
    pub netplan_unavailable: bool,
    /// `apply_config` sleeps this long before finishing
    pub apply_delay: Option<Duration>,
    /// Inserting a rule for this port fails
    pub reject_port: Option<u16>,
}

/// Host state: interfaces (loopback is implicit), filter rules and the
/// on-disk netplan document.
#[derive(Debug, Clone, Default)]
pub struct SimState {
    pub interfaces: IndexMap<String, InterfaceState>,
    pub rules: Vec<Rule>,
    pub config: DeclarativeConfig,
    /// Document in effect after the last successful apply
    pub applied_config: Option<DeclarativeConfig>,
}

impl SimState {
    pub fn with_interface(mut self, name: &str, state: InterfaceState) -> Self {
        self.interfaces.insert(name.to_string(), state);
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_config(mut self, config: DeclarativeConfig) -> Self {
        self.config = config;
        self
    }
}

pub struct SimulatedSystem {
    state: Mutex<SimState>,
    calls: Mutex<CallCounts>,
    faults: Mutex<Faults>,
}

impl SimulatedSystem {
    pub fn new(state: SimState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            calls: Mutex::new(CallCounts::default()),
            faults: Mutex::new(Faults::default()),
        })
    }

    /// Backend bundle whose three handles all point at this system
    pub fn backends(self: &Arc<Self>) -> Backends {
        Backends::new(self.clone(), self.clone(), self.clone())
    }

    pub async fn set_faults(&self, faults: Faults) {
        *self.faults.lock().await = faults;
    }

    pub async fn state(&self) -> SimState {
        self.state.lock().await.clone()
    }

    pub async fn calls(&self) -> CallCounts {
        self.calls.lock().await.clone()
    }

    pub async fn reset_calls(&self) {
        *self.calls.lock().await = CallCounts::default();
    }

    /// Change the host behind the tool's back, as a reboot or an operator
    /// would.
    pub async fn perturb<F>(&self, f: F)
    where
        F: FnOnce(&mut SimState),
    {
        f(&mut *self.state.lock().await);
    }

    async fn faults(&self) -> Faults {
        self.faults.lock().await.clone()
    }

    async fn count<F>(&self, f: F)
    where
        F: FnOnce(&mut CallCounts),
    {
        f(&mut *self.calls.lock().await);
    }

    /// Insert ahead of the `before`-th rule of the rule's chain, or append.
    async fn add_rule(&self, rule: &Rule, before: Option<usize>) -> Result<()> {
        let faults = self.faults().await;
        if faults.rules_unavailable {
            return Err(unavailable("iptables"));
        }
        rule.validate()?;
        self.count(|c| c.rule_inserts += 1).await;

        if faults.reject_port.is_some() && rule.port == faults.reject_port {
            return Err(BackendError::CommandFailed {
                command: format!("iptables -A {}", rule),
                stderr: "simulated rejection".to_string(),
            }
            .into());
        }

        let mut state = self.state.lock().await;
        let slot = before.and_then(|before| {
            state
                .rules
                .iter()
                .enumerate()
                .filter(|(_, existing)| existing.chain == rule.chain)
                .nth(before)
                .map(|(slot, _)| slot)
        });
        match slot {
            Some(slot) => state.rules.insert(slot, rule.clone()),
            None => state.rules.push(rule.clone()),
        }
        Ok(())
    }

    async fn set_link(&self, name: &str, status: LinkStatus) -> Result<()> {
        if self.faults().await.interfaces_unavailable {
            return Err(unavailable("ip"));
        }
        self.count(|c| c.link_changes += 1).await;

        let mut state = self.state.lock().await;
        match state.interfaces.get_mut(name) {
            Some(iface) => {
                iface.status = status;
                Ok(())
            }
            None if name == LOOPBACK => Ok(()),
            None => Err(BackendError::InterfaceNotFound {
                name: name.to_string(),
            }
            .into()),
        }
    }
}

fn unavailable(backend: &str) -> NetworkError {
    BackendError::Unavailable {
        backend: backend.to_string(),
        reason: "simulated outage".to_string(),
    }
    .into()
}

#[async_trait]
impl InterfaceBackend for SimulatedSystem {
    async fn list_interface_states(&self) -> Result<IndexMap<String, InterfaceState>> {
        if self.faults().await.interfaces_unavailable {
            return Err(unavailable("ip"));
        }
        self.count(|c| c.reads += 1).await;

        let state = self.state.lock().await;
        let mut states = IndexMap::new();
        states.insert(
            LOOPBACK.to_string(),
            InterfaceState::new(LinkStatus::Up)
                .with_ipv4("127.0.0.1/8")
                .with_ipv6("::1/128"),
        );
        states.extend(state.interfaces.clone());
        Ok(states)
    }

    async fn set_link_up(&self, name: &str) -> Result<()> {
        self.set_link(name, LinkStatus::Up).await
    }

    async fn set_link_down(&self, name: &str) -> Result<()> {
        self.set_link(name, LinkStatus::Down).await
    }

    async fn list_interface_names(&self) -> Result<Vec<String>> {
        if self.faults().await.interfaces_unavailable {
            return Err(unavailable("ip"));
        }
        self.count(|c| c.reads += 1).await;

        let state = self.state.lock().await;
        Ok(std::iter::once(LOOPBACK.to_string())
            .chain(state.interfaces.keys().cloned())
            .collect())
    }
}

#[async_trait]
impl RuleBackend for SimulatedSystem {
    async fn list_rules(&self, chain: Chain) -> Result<Vec<Rule>> {
        if self.faults().await.rules_unavailable {
            return Err(unavailable("iptables"));
        }
        self.count(|c| c.reads += 1).await;

        let state = self.state.lock().await;
        Ok(state
            .rules
            .iter()
            .filter(|rule| rule.chain == chain)
            .cloned()
            .collect())
    }

    async fn insert_rule(&self, rule: &Rule) -> Result<()> {
        self.add_rule(rule, None).await
    }

    async fn insert_rule_before(&self, rule: &Rule, index: usize) -> Result<()> {
        self.add_rule(rule, Some(index)).await
    }

    async fn delete_rule_by_spec(&self, rule: &Rule) -> Result<()> {
        if self.faults().await.rules_unavailable {
            return Err(unavailable("iptables"));
        }
        self.count(|c| c.rule_deletes += 1).await;

        let mut state = self.state.lock().await;
        let pos = state
            .rules
            .iter()
            .position(|existing| existing.same_spec(rule))
            .ok_or_else(|| BackendError::RuleNotFound {
                chain: rule.chain.to_string(),
                rule: rule.to_string(),
            })?;
        state.rules.remove(pos);
        Ok(())
    }

    async fn delete_rule_by_position(&self, chain: Chain, position: usize) -> Result<()> {
        if self.faults().await.rules_unavailable {
            return Err(unavailable("iptables"));
        }
        self.count(|c| c.rule_deletes += 1).await;

        let mut state = self.state.lock().await;
        let index = state
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.chain == chain)
            .nth(position.wrapping_sub(1))
            .map(|(index, _)| index)
            .ok_or_else(|| BackendError::RuleNotFound {
                chain: chain.to_string(),
                rule: format!("#{}", position),
            })?;
        state.rules.remove(index);
        Ok(())
    }

    async fn clear_chain(&self, chain: Chain) -> Result<()> {
        if self.faults().await.rules_unavailable {
            return Err(unavailable("iptables"));
        }
        self.count(|c| c.chain_clears += 1).await;

        self.state.lock().await.rules.retain(|rule| rule.chain != chain);
        Ok(())
    }
}

#[async_trait]
impl DeclarativeBackend for SimulatedSystem {
    async fn load_current_config(&self) -> Result<DeclarativeConfig> {
        if self.faults().await.netplan_unavailable {
            return Err(unavailable("netplan"));
        }
        self.count(|c| c.reads += 1).await;
        Ok(self.state.lock().await.config.clone())
    }

    async fn write_config(&self, config: &DeclarativeConfig) -> Result<()> {
        if self.faults().await.netplan_unavailable {
            return Err(unavailable("netplan"));
        }
        self.count(|c| c.config_writes += 1).await;
        self.state.lock().await.config = config.clone();
        Ok(())
    }

    /// Static addresses of the document replace the addresses of the
    /// matching interfaces, as `netplan apply` would.
    async fn apply_config(&self) -> Result<()> {
        let faults = self.faults().await;
        if faults.netplan_unavailable {
            return Err(unavailable("netplan"));
        }
        self.count(|c| c.config_applies += 1).await;

        if let Some(delay) = faults.apply_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        let config = state.config.clone();
        for name in config.interface_names() {
            let addresses = config.addresses_for(&name);
            if addresses.is_empty() {
                continue;
            }
            if let Some(iface) = state.interfaces.get_mut(&name) {
                let (ipv6, ipv4): (Vec<String>, Vec<String>) =
                    addresses.into_iter().partition(|address| address.contains(':'));
                iface.ipv4 = ipv4;
                iface.ipv6.retain(|address| address.starts_with("fe80:"));
                iface.ipv6.extend(ipv6);
            }
        }
        state.applied_config = Some(config);
        Ok(())
    }
}
