//! Status command

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::context::AppContext;

/// Live interface overview
pub struct StatusCommand {
    context: Arc<AppContext>,
}

impl StatusCommand {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub async fn execute(&self) -> Result<()> {
        let interfaces = self
            .context
            .backends
            .interfaces
            .list_interface_states()
            .await
            .context("Failed to read interface state")?;

        println!(
            "{:<15} {:<6} {:<18} {:<20} {}",
            "Interface", "Status", "MAC", "IPv4", "IPv6"
        );
        println!("{}", "-".repeat(80));

        for (name, state) in &interfaces {
            let ipv4 = if state.ipv4.is_empty() {
                "-".to_string()
            } else {
                state.ipv4.join(",")
            };
            let ipv6 = if state.ipv6.is_empty() {
                "-".to_string()
            } else {
                state.ipv6.join(",")
            };
            println!(
                "{:<15} {:<6} {:<18} {:<20} {}",
                name,
                state.status.to_string(),
                state.mac,
                ipv4,
                ipv6
            );
        }
        Ok(())
    }
}
