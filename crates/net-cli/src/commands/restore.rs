//! Restore command

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use netstate_apply::{RestoreOrchestrator, RestoreOutcome, RestorePlan};

use crate::context::AppContext;

/// Restore the saved configuration after confirmation
pub struct RestoreCommand {
    context: Arc<AppContext>,
}

impl RestoreCommand {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Run the restore, asking on stdin unless `assume_yes` is set.
    pub async fn execute(&self, assume_yes: bool) -> Result<()> {
        let outcome = self
            .run(|plan| {
                print_plan(plan);
                assume_yes || ask_confirmation()
            })
            .await?;

        match outcome {
            RestoreOutcome::FirstRun => {
                println!("No saved configuration found, nothing to restore");
                Ok(())
            }
            RestoreOutcome::Declined => {
                println!("Restore cancelled, no changes made");
                Ok(())
            }
            RestoreOutcome::Completed(result) => {
                for report in &result.steps {
                    let mark = if report.outcome.is_success() { "✓" } else { "✗" };
                    println!("{} {}: {}", mark, report.step, report.outcome);
                }

                match result.first_failure() {
                    None => {
                        println!("Configuration restored in {}ms", result.duration_ms);
                        Ok(())
                    }
                    Some(err) => Err(err).with_context(|| {
                        format!(
                            "Restore finished with {} failed steps",
                            result.failures().count()
                        )
                    }),
                }
            }
        }
    }

    pub async fn run<F>(&self, confirm: F) -> Result<RestoreOutcome>
    where
        F: FnOnce(&RestorePlan) -> bool,
    {
        RestoreOrchestrator::new(self.context.store.clone(), self.context.backends.clone())
            .with_apply_timeout(self.context.settings.apply_timeout())
            .run(confirm)
            .await
            .context("Failed to restore configuration")
    }
}

fn print_plan(plan: &RestorePlan) {
    let summary = &plan.summary;
    println!("Saved configuration (format {}):", summary.version);
    if let Some(captured_at) = summary.captured_at {
        println!("  Saved at:        {}", captured_at);
    }
    println!("  Interfaces:      {}", summary.interface_count);
    println!("  Firewall rules:  {}", summary.rule_count);
    println!(
        "  Netplan config:  {}",
        if summary.has_network_config { "yes" } else { "no" }
    );

    if plan.changes.is_empty() {
        println!("The live system already matches the saved configuration.");
    } else {
        println!("Pending changes:");
        for change in &plan.changes {
            println!("  [{}] {}", change.change_type, change.description);
        }
    }
}

fn ask_confirmation() -> bool {
    print!("Restore this configuration? (yes/no): ");
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(_) => false,
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "yes" | "y")
}
