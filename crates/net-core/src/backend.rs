//! Collaborator contracts consumed by capture and apply

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use netstate_types::{Chain, DeclarativeConfig, InterfaceState, Rule};

use crate::Result;

/// Link state and addressing of host interfaces
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait InterfaceBackend: Send + Sync {
    /// Get link state and addresses of every interface, loopback included
    async fn list_interface_states(&self) -> Result<IndexMap<String, InterfaceState>>;

    /// Bring a link up
    async fn set_link_up(&self, name: &str) -> Result<()>;

    /// Bring a link down
    async fn set_link_down(&self, name: &str) -> Result<()>;

    /// Names of all interfaces present on the host
    async fn list_interface_names(&self) -> Result<Vec<String>>;
}

/// Packet-filter rule table
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait RuleBackend: Send + Sync {
    /// Rules of one chain, in chain order
    async fn list_rules(&self, chain: Chain) -> Result<Vec<Rule>>;

    /// Rules of all chains, INPUT first, then OUTPUT and FORWARD
    async fn list_all_rules(&self) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        for chain in Chain::ALL {
            rules.extend(self.list_rules(chain).await?);
        }
        Ok(rules)
    }

    /// Append a rule to the end of its chain
    async fn insert_rule(&self, rule: &Rule) -> Result<()>;

    /// Insert `rule` ahead of the rule at 0-based `index` of
    /// `list_rules(rule.chain)`. Appends when `index` is past the end.
    async fn insert_rule_before(&self, rule: &Rule, index: usize) -> Result<()>;

    /// Delete the first rule matching `rule` (description ignored)
    async fn delete_rule_by_spec(&self, rule: &Rule) -> Result<()>;

    /// Delete the rule at 1-based `position` of `chain`
    async fn delete_rule_by_position(&self, chain: Chain, position: usize) -> Result<()>;

    /// Remove every rule of `chain`
    async fn clear_chain(&self, chain: Chain) -> Result<()>;
}

/// Declarative addressing backend (netplan)
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait DeclarativeBackend: Send + Sync {
    /// Read the document currently on disk
    async fn load_current_config(&self) -> Result<DeclarativeConfig>;

    /// Replace the on-disk document with `config`
    async fn write_config(&self, config: &DeclarativeConfig) -> Result<()>;

    /// Apply the on-disk document to the live system
    async fn apply_config(&self) -> Result<()>;
}

/// Backend handles injected into the capturer, reconciler and orchestrator.
#[derive(Clone)]
pub struct Backends {
    pub interfaces: Arc<dyn InterfaceBackend>,
    pub rules: Arc<dyn RuleBackend>,
    pub declarative: Arc<dyn DeclarativeBackend>,
}

impl Backends {
    pub fn new(
        interfaces: Arc<dyn InterfaceBackend>,
        rules: Arc<dyn RuleBackend>,
        declarative: Arc<dyn DeclarativeBackend>,
    ) -> Self {
        Self {
            interfaces,
            rules,
            declarative,
        }
    }
}
