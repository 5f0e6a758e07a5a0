//! Firewall command

use std::sync::Arc;

use anyhow::{Context, Result};
use netstate_types::{Action, Chain, Protocol, Rule};

use crate::context::AppContext;

pub struct FirewallCommand {
    context: Arc<AppContext>,
}

impl FirewallCommand {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub async fn add(&self, rule: &Rule) -> Result<()> {
        self.context
            .backends
            .rules
            .insert_rule(rule)
            .await
            .with_context(|| format!("Failed to add rule {}", rule))?;
        println!("✓ Added {}", rule);
        Ok(())
    }

    pub async fn remove(&self, rule: &Rule) -> Result<()> {
        self.context
            .backends
            .rules
            .delete_rule_by_spec(rule)
            .await
            .with_context(|| format!("Failed to remove rule {}", rule))?;
        println!("✓ Removed {}", rule);
        Ok(())
    }

    pub async fn remove_at(&self, chain: Chain, position: usize) -> Result<()> {
        self.context
            .backends
            .rules
            .delete_rule_by_position(chain, position)
            .await
            .with_context(|| format!("Failed to remove rule #{} from {}", position, chain))?;
        println!("✓ Removed rule #{} from {}", position, chain);
        Ok(())
    }

    pub async fn list(&self, chain: Chain) -> Result<()> {
        let rules = self
            .context
            .backends
            .rules
            .list_rules(chain)
            .await
            .with_context(|| format!("Failed to list {}", chain))?;

        if rules.is_empty() {
            println!("{} has no rules", chain);
        }
        for (i, rule) in rules.iter().enumerate() {
            println!("{:>3}  {}", i + 1, rule);
        }
        Ok(())
    }

    pub async fn clear(&self, chain: Chain) -> Result<()> {
        self.context
            .backends
            .rules
            .clear_chain(chain)
            .await
            .with_context(|| format!("Failed to clear {}", chain))?;
        println!("✓ Cleared {}", chain);
        Ok(())
    }
}

/// Build a rule from command line arguments
pub fn parse_rule(
    chain: &str,
    protocol: &str,
    action: &str,
    port: Option<u16>,
    source: Option<String>,
    description: Option<String>,
) -> Result<Rule> {
    let mut rule = Rule::new(chain.parse::<Chain>()?, action.parse::<Action>()?)
        .with_protocol(protocol.parse::<Protocol>()?);
    rule.port = port;
    rule.source = source;
    rule.description = description;
    rule.validate()?;
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule() {
        let rule = parse_rule("input", "tcp", "accept", Some(22), None, Some("SSH".into())).unwrap();
        assert_eq!(rule.chain, Chain::Input);
        assert_eq!(rule.action, Action::Accept);
        assert_eq!(rule.port, Some(22));

        assert!(parse_rule("PREROUTING", "tcp", "ACCEPT", Some(22), None, None).is_err());
        assert!(parse_rule("INPUT", "tcp", "ACCEPT", None, None, None).is_err());
        assert!(parse_rule("INPUT", "icmp", "DROP", Some(1), None, None).is_err());
    }
}
