//! Validate command

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use netstate_types::{validate, Violation};

use crate::context::AppContext;

/// Check the saved snapshot against the data model
pub struct ValidateCommand {
    context: Arc<AppContext>,
}

impl ValidateCommand {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub async fn execute(&self) -> Result<()> {
        let path = self.context.store.snapshot_path().display().to_string();
        let violations = match self.violations().await? {
            Some(violations) => violations,
            None => {
                println!("No saved configuration at {}", path);
                return Ok(());
            }
        };

        if violations.is_empty() {
            println!("✓ {} is valid", path);
            return Ok(());
        }

        for violation in &violations {
            println!("✗ {}", violation);
        }
        bail!("{} has {} violations", path, violations.len())
    }

    /// Violations of the saved snapshot, or `None` if nothing is saved.
    pub async fn violations(&self) -> Result<Option<Vec<Violation>>> {
        let snapshot = self
            .context
            .store
            .load()
            .await
            .context("Failed to load saved configuration")?;
        Ok(snapshot.as_ref().map(validate))
    }
}
