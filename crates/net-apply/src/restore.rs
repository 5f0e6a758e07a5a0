//! Load, confirm and apply a saved snapshot

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use netstate_config::SnapshotStore;
use netstate_core::{Backends, Result};
use netstate_types::{ChangeType, ConfigChange, RuleEntry, Snapshot};

use crate::capture::StateCapturer;
use crate::reconcile::{AggregateResult, Placement, Reconciler, RuleCursor};

/// What a saved snapshot contains
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub version: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub interface_count: usize,
    pub rule_count: usize,
    pub has_network_config: bool,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            version: snapshot.schema_version.clone(),
            captured_at: snapshot.captured_at,
            interface_count: snapshot.interfaces.len(),
            rule_count: snapshot.firewall_rules.len(),
            has_network_config: !snapshot.network_config.is_empty(),
        }
    }
}

/// Shown to the operator before anything is changed
#[derive(Debug, Clone, Serialize)]
pub struct RestorePlan {
    pub summary: SnapshotSummary,
    /// Differences between the live system and the snapshot
    pub changes: Vec<ConfigChange>,
}

#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    /// Nothing has been saved yet
    FirstRun,
    Declined,
    Completed(AggregateResult),
}

impl RestoreOutcome {
    /// True only for a completed restore in which every step succeeded.
    pub fn succeeded(&self) -> bool {
        matches!(self, RestoreOutcome::Completed(result) if result.success)
    }
}

/// Restores the saved snapshot after operator confirmation
pub struct RestoreOrchestrator {
    store: SnapshotStore,
    backends: Backends,
    reconciler: Reconciler,
}

impl RestoreOrchestrator {
    pub fn new(store: SnapshotStore, backends: Backends) -> Self {
        Self {
            reconciler: Reconciler::new(backends.clone()),
            store,
            backends,
        }
    }

    pub fn with_apply_timeout(mut self, apply_timeout: Duration) -> Self {
        self.reconciler = self.reconciler.with_apply_timeout(apply_timeout);
        self
    }

    /// Load the saved snapshot and ask `confirm` whether to apply it. A
    /// corrupt snapshot is returned as an error; declining makes no changes.
    pub async fn run<F>(&self, confirm: F) -> Result<RestoreOutcome>
    where
        F: FnOnce(&RestorePlan) -> bool,
    {
        let Some(snapshot) = self.store.load().await? else {
            info!("No saved configuration found, first run");
            return Ok(RestoreOutcome::FirstRun);
        };

        let plan = self.plan(&snapshot).await;
        info!(
            "Saved configuration: {} interfaces, {} firewall rules, {} pending changes",
            plan.summary.interface_count,
            plan.summary.rule_count,
            plan.changes.len()
        );

        if !confirm(&plan) {
            info!("Restore declined");
            return Ok(RestoreOutcome::Declined);
        }

        let result = self.reconciler.apply(&snapshot).await;
        for report in &result.steps {
            if report.outcome.is_success() {
                info!("{}: {}", report.step, report.outcome);
            } else {
                warn!("{}: {}", report.step, report.outcome);
            }
        }

        if result.success {
            info!("Configuration restored in {}ms", result.duration_ms);
        } else {
            warn!(
                "Configuration restored with {} failed steps",
                result.failures().count()
            );
        }
        Ok(RestoreOutcome::Completed(result))
    }

    /// Build the plan for `snapshot` against a read-only capture of the
    /// live system.
    pub async fn plan(&self, snapshot: &Snapshot) -> RestorePlan {
        let live = StateCapturer::new(self.backends.clone())
            .without_adoption()
            .capture()
            .await;

        RestorePlan {
            summary: SnapshotSummary::from(snapshot),
            changes: diff(&live, snapshot),
        }
    }
}

/// Changes a restore of `saved` would make to `live`. Only what the
/// reconciler acts on is compared: netplan document, link states and
/// firewall rules missing from their saved position.
pub fn diff(live: &Snapshot, saved: &Snapshot) -> Vec<ConfigChange> {
    let mut changes = Vec::new();

    if !saved.network_config.is_empty() && saved.network_config != live.network_config {
        changes.push(ConfigChange {
            change_type: ChangeType::Update,
            target: "network_config".to_string(),
            old_config: Some(live.network_config.clone().into_value()),
            new_config: Some(saved.network_config.clone().into_value()),
            description: "Rewrite and apply netplan configuration".to_string(),
        });
    }

    for (name, state) in &saved.interfaces {
        match live.interfaces.get(name) {
            Some(current) if current.status == state.status => {}
            Some(current) => changes.push(ConfigChange {
                change_type: ChangeType::Update,
                target: name.clone(),
                old_config: Some(current.status.to_string().into()),
                new_config: Some(state.status.to_string().into()),
                description: format!("Set {} {} (currently {})", name, state.status, current.status),
            }),
            None => changes.push(ConfigChange {
                change_type: ChangeType::Update,
                target: name.clone(),
                old_config: None,
                new_config: Some(state.status.to_string().into()),
                description: format!("{} is not present, link state will not be restored", name),
            }),
        }
    }

    let live_rules = live
        .firewall_rules
        .iter()
        .filter_map(RuleEntry::as_rule)
        .cloned()
        .collect();
    let mut cursor = RuleCursor::new(live_rules);
    for rule in saved.firewall_rules.iter().filter_map(|entry| entry.validate().ok()) {
        let placement = cursor.placement(rule);
        let description = match placement {
            Placement::Present => None,
            Placement::Before(index) => Some(match cursor.live_rule(rule.chain, index) {
                Some(ahead_of) => format!("Insert firewall rule {} ahead of {}", rule, ahead_of),
                None => format!("Insert firewall rule {}", rule),
            }),
            Placement::Append => Some(format!("Append firewall rule {}", rule)),
        };
        if let Some(description) = description {
            changes.push(ConfigChange {
                change_type: ChangeType::Create,
                target: rule.chain.to_string(),
                old_config: None,
                new_config: serde_json::to_value(rule).ok(),
                description,
            });
        }
        cursor.advance(rule, placement);
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use netstate_core::{MockDeclarativeBackend, MockInterfaceBackend, MockRuleBackend};
    use netstate_types::{
        Action, Chain, DeclarativeConfig, InterfaceState, LinkStatus, Protocol, Rule,
    };
    use tempfile::TempDir;

    fn saved_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.interfaces.insert(
            "eth0".to_string(),
            InterfaceState::new(LinkStatus::Up).with_ipv4("192.168.1.50/24"),
        );
        snapshot.firewall_rules.push(
            Rule::new(Chain::Input, Action::Accept)
                .with_protocol(Protocol::Tcp)
                .with_port(22)
                .into(),
        );
        snapshot
    }

    /// Backends that only answer read-only calls
    fn read_only_backends() -> Backends {
        let mut interfaces = MockInterfaceBackend::new();
        interfaces.expect_list_interface_states().returning(|| {
            let mut states = indexmap::IndexMap::new();
            states.insert("eth0".to_string(), InterfaceState::new(LinkStatus::Down));
            Ok(states)
        });
        interfaces.expect_set_link_up().never();
        interfaces.expect_set_link_down().never();
        interfaces.expect_list_interface_names().never();

        let mut rules = MockRuleBackend::new();
        rules.expect_list_all_rules().returning(|| Ok(vec![]));
        rules.expect_insert_rule().never();
        rules.expect_insert_rule_before().never();
        rules.expect_delete_rule_by_spec().never();
        rules.expect_delete_rule_by_position().never();
        rules.expect_clear_chain().never();

        let mut declarative = MockDeclarativeBackend::new();
        declarative
            .expect_load_current_config()
            .returning(|| Ok(DeclarativeConfig::default()));
        declarative.expect_write_config().never();
        declarative.expect_apply_config().never();

        Backends::new(Arc::new(interfaces), Arc::new(rules), Arc::new(declarative))
    }

    #[tokio::test]
    async fn test_first_run() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator =
            RestoreOrchestrator::new(SnapshotStore::new(temp_dir.path()), read_only_backends());

        let outcome = orchestrator
            .run(|_| panic!("nothing to confirm"))
            .await
            .unwrap();
        assert!(matches!(outcome, RestoreOutcome::FirstRun));
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn test_declined_restore_changes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        store.save(&saved_snapshot()).await.unwrap();

        let orchestrator = RestoreOrchestrator::new(store, read_only_backends());
        let mut shown = None;
        let outcome = orchestrator
            .run(|plan| {
                shown = Some(plan.clone());
                false
            })
            .await
            .unwrap();

        assert!(matches!(outcome, RestoreOutcome::Declined));
        assert!(!outcome.succeeded());

        let plan = shown.unwrap();
        assert_eq!(plan.summary.interface_count, 1);
        assert_eq!(plan.summary.rule_count, 1);
        assert!(plan.summary.captured_at.is_some());
        assert!(!plan.summary.has_network_config);
        assert_eq!(plan.changes.len(), 2);
        assert_eq!(plan.changes[0].target, "eth0");
        assert_eq!(plan.changes[1].change_type, ChangeType::Create);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        std::fs::write(store.snapshot_path(), "{not json").unwrap();

        let orchestrator = RestoreOrchestrator::new(store, read_only_backends());
        let err = orchestrator
            .run(|_| panic!("corrupt snapshot must not be confirmed"))
            .await
            .unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_diff_matches_rules_one_to_one() {
        let ssh = Rule::new(Chain::Input, Action::Accept)
            .with_protocol(Protocol::Tcp)
            .with_port(22);
        let mut live = Snapshot::default();
        live.firewall_rules.push(ssh.clone().into());

        let mut saved = Snapshot::default();
        saved.firewall_rules = vec![ssh.clone().into(), ssh.with_description("again").into()];

        let changes = diff(&live, &saved);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].target, "INPUT");
    }

    #[test]
    fn test_diff_reports_rule_out_of_saved_order() {
        let ssh = Rule::new(Chain::Input, Action::Accept)
            .with_protocol(Protocol::Tcp)
            .with_port(22);
        let drop_all = Rule::new(Chain::Input, Action::Drop);
        let mut live = Snapshot::default();
        live.firewall_rules.push(drop_all.clone().into());

        let mut saved = Snapshot::default();
        saved.firewall_rules = vec![
            ssh.into(),
            drop_all.into(),
            RuleEntry::Malformed(serde_json::json!({"chain": "input", "action": "DROP"})),
        ];

        let changes = diff(&live, &saved);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Create);
        assert_eq!(
            changes[0].description,
            "Insert firewall rule INPUT -p tcp --dport 22 -j ACCEPT ahead of INPUT -j DROP"
        );
    }
}
