//! Save command

use std::sync::Arc;

use anyhow::{Context, Result};
use netstate_apply::StateCapturer;
use netstate_config::SaveReport;

use crate::context::AppContext;

/// Capture the live configuration and persist it
pub struct SaveCommand {
    context: Arc<AppContext>,
}

impl SaveCommand {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub async fn execute(&self) -> Result<()> {
        let report = self.save().await?;

        println!("✓ Configuration saved to {}", report.path.display());
        if let Some(backup) = &report.backup {
            println!("  Previous configuration kept as {}", backup.display());
        }
        Ok(())
    }

    pub async fn save(&self) -> Result<SaveReport> {
        let snapshot = StateCapturer::new(self.context.backends.clone())
            .capture()
            .await;
        self.context
            .store
            .save(&snapshot)
            .await
            .with_context(|| {
                format!(
                    "Failed to save configuration to {}",
                    self.context.store.snapshot_path().display()
                )
            })
    }
}
