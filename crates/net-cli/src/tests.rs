//! CLI command tests against a simulated host

use std::sync::Arc;

use netstate_apply::RestoreOutcome;
use netstate_config::{Settings, SnapshotStore};
use netstate_test::scenarios::{reference_host, ssh_rule};
use netstate_test::{SimState, SimulatedSystem};
use netstate_types::{Chain, LinkStatus};
use tempfile::TempDir;

use crate::commands::{
    firewall::parse_rule, FirewallCommand, IpCommand, LinkAction, LinkCommand, RestoreCommand,
    SaveCommand, ShowCommand, ValidateCommand,
};
use crate::context::AppContext;

fn context(state: SimState) -> (TempDir, Arc<SimulatedSystem>, Arc<AppContext>) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let system = SimulatedSystem::new(state);
    let settings = Settings {
        config_dir: temp_dir.path().to_path_buf(),
        ..Settings::default()
    };
    let store = SnapshotStore::new(temp_dir.path());
    let context = AppContext::new(settings, store, system.backends());
    (temp_dir, system, context)
}

#[tokio::test]
async fn test_save_then_restore_with_confirmation() {
    let (_dir, system, context) = context(reference_host());

    let report = SaveCommand::new(context.clone()).save().await.unwrap();
    assert!(report.path.exists());
    assert!(report.backup.is_none());

    system
        .perturb(|state| {
            state.rules.clear();
            state.interfaces["eth0"].status = LinkStatus::Down;
        })
        .await;

    let outcome = RestoreCommand::new(context.clone())
        .run(|plan| {
            assert_eq!(plan.changes.len(), 3);
            true
        })
        .await
        .unwrap();
    assert!(outcome.succeeded());

    let state = system.state().await;
    assert_eq!(state.rules, vec![ssh_rule()]);
    assert_eq!(state.interfaces["eth0"].status, LinkStatus::Up);
}

#[tokio::test]
async fn test_declined_restore_makes_no_changes() {
    let (_dir, system, context) = context(reference_host());
    SaveCommand::new(context.clone()).save().await.unwrap();
    system.reset_calls().await;

    let outcome = RestoreCommand::new(context).run(|_| false).await.unwrap();
    assert!(matches!(outcome, RestoreOutcome::Declined));
    assert_eq!(system.calls().await.mutations(), 0);
}

#[tokio::test]
async fn test_validate_without_saved_configuration() {
    let (_dir, _system, context) = context(reference_host());
    let cmd = ValidateCommand::new(context);
    assert!(cmd.violations().await.unwrap().is_none());
    assert!(cmd.execute().await.is_ok());
}

#[tokio::test]
async fn test_validate_reports_violations() {
    let (dir, _system, context) = context(reference_host());
    std::fs::write(
        dir.path().join("network_config.json"),
        r#"{"version":"1.0","interfaces":{"eth0":{"status":"UP","ipv4":["not-an-ip"],"ipv6":[],"mac":"N/A"}},
            "network_config":{"network":{"version":2,"ethernets":{}}},"firewall_rules":[]}"#,
    )
    .unwrap();

    let cmd = ValidateCommand::new(context);
    assert_eq!(cmd.violations().await.unwrap().unwrap().len(), 1);
    assert!(cmd.execute().await.is_err());
}

#[tokio::test]
async fn test_backups_after_two_saves() {
    let (_dir, _system, context) = context(reference_host());
    let save = SaveCommand::new(context.clone());
    save.save().await.unwrap();
    let second = save.save().await.unwrap();
    assert!(second.backup.is_some());

    assert_eq!(context.store.list_backups().await.unwrap().len(), 1);
    assert!(ShowCommand::new(context).list_backups().await.is_ok());
}

#[tokio::test]
async fn test_firewall_commands() {
    let (_dir, system, context) = context(SimState::default());
    let cmd = FirewallCommand::new(context);

    let rule = parse_rule("INPUT", "tcp", "ACCEPT", Some(443), None, None).unwrap();
    cmd.add(&rule).await.unwrap();
    cmd.add(&ssh_rule()).await.unwrap();
    assert_eq!(system.state().await.rules.len(), 2);

    cmd.remove(&rule).await.unwrap();
    assert_eq!(system.state().await.rules, vec![ssh_rule()]);

    assert!(cmd.remove_at(Chain::Input, 2).await.is_err());
    cmd.remove_at(Chain::Input, 1).await.unwrap();
    assert!(system.state().await.rules.is_empty());

    cmd.add(&ssh_rule()).await.unwrap();
    cmd.clear(Chain::Input).await.unwrap();
    assert!(system.state().await.rules.is_empty());
}

#[tokio::test]
async fn test_link_unknown_interface() {
    let (_dir, system, context) = context(reference_host());
    let cmd = LinkCommand::new(context);

    cmd.execute(LinkAction::Down, "eth0").await.unwrap();
    assert_eq!(
        system.state().await.interfaces["eth0"].status,
        LinkStatus::Down
    );
    assert!(cmd.execute(LinkAction::Up, "eth9").await.is_err());
}

#[tokio::test]
async fn test_ip_static_writes_and_applies() {
    let (_dir, system, context) = context(reference_host());
    let cmd = IpCommand::new(context);

    cmd.set_static(
        "eth0",
        "10.0.0.5/24",
        Some("10.0.0.1"),
        &["1.1.1.1".to_string()],
    )
    .await
    .unwrap();

    let state = system.state().await;
    assert_eq!(state.config.addresses_for("eth0"), vec!["10.0.0.5/24"]);
    assert_eq!(state.interfaces["eth0"].ipv4, vec!["10.0.0.5/24"]);
    assert_eq!(system.calls().await.config_applies, 1);

    cmd.set_dhcp("eth0").await.unwrap();
    assert!(system.state().await.config.addresses_for("eth0").is_empty());
}

#[tokio::test]
async fn test_ip_static_rejects_bad_input() {
    let (_dir, system, context) = context(reference_host());
    let cmd = IpCommand::new(context);

    assert!(cmd.set_static("eth0", "10.0.0.5", None, &[]).await.is_err());
    assert!(cmd
        .set_static("eth0", "10.0.0.5/24", Some("gateway"), &[])
        .await
        .is_err());
    assert!(cmd.set_dhcp("lo").await.is_err());
    assert_eq!(system.calls().await.mutations(), 0);
}
