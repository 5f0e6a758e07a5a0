//! Link command

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;

use crate::context::AppContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LinkAction {
    Up,
    Down,
}

pub struct LinkCommand {
    context: Arc<AppContext>,
}

impl LinkCommand {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub async fn execute(&self, action: LinkAction, interface: &str) -> Result<()> {
        let backend = &self.context.backends.interfaces;
        let (result, state) = match action {
            LinkAction::Up => (backend.set_link_up(interface).await, "up"),
            LinkAction::Down => (backend.set_link_down(interface).await, "down"),
        };
        result.with_context(|| format!("Failed to set {} {}", interface, state))?;

        println!("✓ {} is {}", interface, state);
        Ok(())
    }
}
