//! Show and backups commands

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use netstate_apply::StateCapturer;
use netstate_types::{RuleEntry, Snapshot};

use crate::context::AppContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print the saved or the live snapshot
pub struct ShowCommand {
    context: Arc<AppContext>,
}

impl ShowCommand {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub async fn execute(&self, live: bool, format: OutputFormat) -> Result<()> {
        let snapshot = if live {
            StateCapturer::new(self.context.backends.clone())
                .without_adoption()
                .capture()
                .await
        } else {
            match self.context.store.load().await.with_context(|| {
                format!(
                    "Failed to load {}",
                    self.context.store.snapshot_path().display()
                )
            })? {
                Some(snapshot) => snapshot,
                None => {
                    println!("No saved configuration found");
                    return Ok(());
                }
            }
        };

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            OutputFormat::Text => print_snapshot(&snapshot),
        }
        Ok(())
    }

    /// List backup copies, newest first
    pub async fn list_backups(&self) -> Result<()> {
        let backups = self
            .context
            .store
            .list_backups()
            .await
            .context("Failed to list backups")?;

        if backups.is_empty() {
            println!(
                "No backups in {}",
                self.context.store.backup_dir().display()
            );
            return Ok(());
        }

        println!("{:<45} {:>10}  {}", "Backup", "Size", "Modified");
        println!("{}", "-".repeat(80));
        for backup in backups {
            let modified = backup
                .modified
                .map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{:<45} {:>10}  {}", backup.name, backup.size, modified);
        }
        Ok(())
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("Format version: {}", snapshot.schema_version);
    if let Some(captured_at) = snapshot.captured_at {
        println!("Captured at:    {}", captured_at);
    }

    println!();
    println!("Interfaces ({}):", snapshot.interfaces.len());
    for (name, state) in &snapshot.interfaces {
        println!("  {:<15} {:<5} {}", name, state.status.to_string(), state.mac);
        for address in state.ipv4.iter().chain(&state.ipv6) {
            println!("    {}", address);
        }
    }

    println!();
    println!("Firewall rules ({}):", snapshot.firewall_rules.len());
    for entry in &snapshot.firewall_rules {
        match entry {
            RuleEntry::Rule(rule) => println!("  {}", rule),
            RuleEntry::Malformed(raw) => println!("  {} (malformed, not restored)", raw),
        }
    }

    println!();
    if snapshot.network_config.is_empty() {
        println!("Netplan configuration: none");
    } else {
        println!("Netplan configuration:");
        for name in snapshot.network_config.interface_names() {
            let addresses = snapshot.network_config.addresses_for(&name);
            if addresses.is_empty() {
                println!("  {}", name);
            } else {
                println!("  {} {}", name, addresses.join(", "));
            }
        }
    }
}
