//! End-to-end save/restore scenarios against a simulated host

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use tempfile::TempDir;

use netstate_apply::{RestoreOrchestrator, RestoreOutcome, StateCapturer, StepOutcome};
use netstate_config::{SaveReport, SnapshotStore, DEFAULT_APPLY_TIMEOUT};
use netstate_types::{
    validate, Action, Chain, DeclarativeConfig, InterfaceState, LinkStatus, Protocol, Rule,
};

use crate::sim::{Faults, SimState, SimulatedSystem};

/// A store in a private directory plus a simulated host
pub struct Harness {
    _dir: TempDir,
    pub store: SnapshotStore,
    pub system: Arc<SimulatedSystem>,
    apply_timeout: Duration,
}

impl Harness {
    pub fn new(state: SimState, apply_timeout: Duration) -> Result<Self> {
        let dir = TempDir::new().context("Failed to create scenario directory")?;
        Ok(Self {
            store: SnapshotStore::new(dir.path().join("network-tool")),
            system: SimulatedSystem::new(state),
            apply_timeout,
            _dir: dir,
        })
    }

    /// Capture the simulated host and persist the snapshot.
    pub async fn save(&self) -> Result<SaveReport> {
        let snapshot = StateCapturer::new(self.system.backends()).capture().await;
        Ok(self.store.save(&snapshot).await?)
    }

    pub async fn restore(&self, confirm: bool) -> Result<RestoreOutcome> {
        Ok(RestoreOrchestrator::new(self.store.clone(), self.system.backends())
            .with_apply_timeout(self.apply_timeout)
            .run(|_| confirm)
            .await?)
    }
}

/// Host with one configured interface and an SSH rule
pub fn reference_host() -> SimState {
    SimState::default()
        .with_interface(
            "eth0",
            InterfaceState::new(LinkStatus::Up)
                .with_ipv4("192.168.1.50/24")
                .with_ipv6("fe80::5054:ff:fe12:3456/64")
                .with_mac("52:54:00:12:34:56"),
        )
        .with_rule(ssh_rule())
}

pub fn ssh_rule() -> Rule {
    Rule::new(Chain::Input, Action::Accept)
        .with_protocol(Protocol::Tcp)
        .with_port(22)
        .with_description("Allow SSH")
}

/// Reboot-like drift: link down, addresses and rules gone, netplan reset.
fn wipe(state: &mut SimState) {
    for iface in state.interfaces.values_mut() {
        iface.status = LinkStatus::Down;
        iface.ipv4.clear();
    }
    state.rules.clear();
    state.config = DeclarativeConfig::default();
}

fn completed(outcome: RestoreOutcome) -> Result<netstate_apply::AggregateResult> {
    match outcome {
        RestoreOutcome::Completed(result) => Ok(result),
        other => anyhow::bail!("restore did not run: {:?}", other),
    }
}

#[derive(Default)]
struct Checks(Vec<String>);

impl Checks {
    fn expect(&mut self, ok: bool, what: impl Into<String>) {
        if !ok {
            self.0.push(what.into());
        }
    }

    fn finish(self) -> Vec<String> {
        self.0
    }
}

/// Result of one scenario
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: &'static str,
    pub passed: bool,
    /// Expectations that did not hold
    pub failures: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct ScenarioSuite {
    pub results: Vec<ScenarioResult>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

pub struct ScenarioRunner {
    apply_timeout: Duration,
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioRunner {
    pub fn new() -> Self {
        Self {
            apply_timeout: DEFAULT_APPLY_TIMEOUT,
        }
    }

    pub async fn run_all(&self) -> ScenarioSuite {
        let results = vec![
            self.run("round_trip", round_trip).await,
            self.run("idempotent_restore", idempotent_restore).await,
            self.run("declined_restore", declined_restore).await,
            self.run("first_run", first_run).await,
            self.run("invalid_rule_rejected", invalid_rule_rejected).await,
            self.run("malformed_rule_skipped", malformed_rule_skipped).await,
            self.run("rule_order_restored", rule_order_restored).await,
            self.run("apply_timeout", |_| apply_timeout()).await,
            self.run("missing_interface", missing_interface).await,
            self.run("degraded_capture", degraded_capture).await,
            self.run("corrupt_snapshot", corrupt_snapshot).await,
        ];

        let passed = results.iter().filter(|r| r.passed).count();
        ScenarioSuite {
            total: results.len(),
            failed: results.len() - passed,
            passed,
            results,
        }
    }

    async fn run<F, Fut>(&self, name: &'static str, scenario: F) -> ScenarioResult
    where
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        debug!("Running scenario {}", name);
        let result = match scenario(self.apply_timeout).await {
            Ok(failures) => ScenarioResult {
                name,
                passed: failures.is_empty(),
                failures,
                error: None,
            },
            Err(e) => ScenarioResult {
                name,
                passed: false,
                failures: Vec::new(),
                error: Some(format!("{:#}", e)),
            },
        };
        info!(
            "Scenario {}: {}",
            name,
            if result.passed { "passed" } else { "failed" }
        );
        result
    }
}

async fn round_trip(apply_timeout: Duration) -> Result<Vec<String>> {
    let h = Harness::new(reference_host(), apply_timeout)?;
    let mut checks = Checks::default();

    h.save().await?;
    h.system.perturb(wipe).await;

    let result = completed(h.restore(true).await?)?;
    let state = h.system.state().await;

    checks.expect(result.success, "restore reported failures");
    checks.expect(
        state.interfaces["eth0"].status == LinkStatus::Up,
        "eth0 is not UP after restore",
    );
    checks.expect(
        state.interfaces["eth0"].ipv4 == vec!["192.168.1.50/24".to_string()],
        "eth0 address not restored",
    );
    checks.expect(state.rules.len() == 1, "expected exactly one rule");
    checks.expect(
        state.rules.first().is_some_and(|rule| rule.same_spec(&ssh_rule())),
        "SSH rule not restored",
    );
    checks.expect(
        state.applied_config.is_some(),
        "netplan configuration not applied",
    );
    Ok(checks.finish())
}

async fn idempotent_restore(apply_timeout: Duration) -> Result<Vec<String>> {
    let h = Harness::new(reference_host(), apply_timeout)?;
    let mut checks = Checks::default();

    h.save().await?;
    h.system.perturb(wipe).await;
    completed(h.restore(true).await?)?;

    h.system.reset_calls().await;
    let second = completed(h.restore(true).await?)?;

    checks.expect(second.success, "second restore reported failures");
    checks.expect(
        h.system.calls().await.rule_inserts == 0,
        "second restore inserted rules",
    );
    checks.expect(
        h.system.state().await.rules.len() == 1,
        "rules duplicated by second restore",
    );
    Ok(checks.finish())
}

async fn declined_restore(apply_timeout: Duration) -> Result<Vec<String>> {
    let h = Harness::new(reference_host(), apply_timeout)?;
    let mut checks = Checks::default();

    h.save().await?;
    h.system.perturb(wipe).await;
    h.system.reset_calls().await;

    let outcome = h.restore(false).await?;
    checks.expect(
        matches!(outcome, RestoreOutcome::Declined),
        "restore was not declined",
    );
    checks.expect(!outcome.succeeded(), "declined restore reported success");
    checks.expect(
        h.system.calls().await.mutations() == 0,
        "declined restore changed the host",
    );
    Ok(checks.finish())
}

async fn first_run(apply_timeout: Duration) -> Result<Vec<String>> {
    let h = Harness::new(reference_host(), apply_timeout)?;
    let mut checks = Checks::default();

    let outcome = h.restore(true).await?;
    checks.expect(
        matches!(outcome, RestoreOutcome::FirstRun),
        "expected first run",
    );
    checks.expect(!outcome.succeeded(), "first run reported success");
    checks.expect(
        h.system.calls().await.mutations() == 0,
        "first run changed the host",
    );
    Ok(checks.finish())
}

async fn invalid_rule_rejected(apply_timeout: Duration) -> Result<Vec<String>> {
    let h = Harness::new(reference_host(), apply_timeout)?;
    let mut checks = Checks::default();

    h.save().await?;
    let mut snapshot = h
        .store
        .load()
        .await?
        .context("saved snapshot disappeared")?;
    snapshot
        .firewall_rules
        .push(Rule::new(Chain::Input, Action::Accept).with_protocol(Protocol::Udp).into());
    snapshot.firewall_rules.push(
        Rule::new(Chain::Input, Action::Accept)
            .with_protocol(Protocol::Tcp)
            .with_port(443)
            .into(),
    );
    h.store.save(&snapshot).await?;
    h.system.perturb(wipe).await;

    let result = completed(h.restore(true).await?)?;
    let rejected = result
        .steps
        .iter()
        .filter(|report| matches!(report.outcome, StepOutcome::ValidationFailed(_)))
        .count();

    checks.expect(!result.success, "restore with an invalid rule succeeded");
    checks.expect(rejected == 1, "expected one rejected rule");
    checks.expect(
        h.system.calls().await.rule_inserts == 2,
        "invalid rule reached the backend",
    );
    checks.expect(
        h.system.state().await.interfaces["eth0"].status == LinkStatus::Up,
        "other steps did not run",
    );
    Ok(checks.finish())
}

async fn malformed_rule_skipped(apply_timeout: Duration) -> Result<Vec<String>> {
    let h = Harness::new(reference_host(), apply_timeout)?;
    let mut checks = Checks::default();

    h.save().await?;
    let path = h.store.snapshot_path().to_path_buf();
    let mut raw: serde_json::Value = serde_json::from_str(&tokio::fs::read_to_string(&path).await?)?;
    let rules = raw["firewall_rules"]
        .as_array_mut()
        .context("saved snapshot has no rule list")?;
    rules.insert(
        0,
        serde_json::json!({"chain": "INPUT", "protocol": "tcp", "port": "8080", "action": "ACCEPT"}),
    );
    rules.push(serde_json::json!({"chain": "INPUT", "protocol": "tcp", "port": 443, "action": "ACCEPT"}));
    tokio::fs::write(&path, serde_json::to_string_pretty(&raw)?).await?;
    h.system.perturb(wipe).await;

    let result = completed(h.restore(true).await?)?;
    let rejected = result
        .steps
        .iter()
        .filter(|report| matches!(report.outcome, StepOutcome::ValidationFailed(_)))
        .count();
    let ports: Vec<_> = h
        .system
        .state()
        .await
        .rules
        .iter()
        .map(|rule| rule.port)
        .collect();

    checks.expect(!result.success, "restore with a malformed rule succeeded");
    checks.expect(rejected == 1, "expected one rejected rule");
    checks.expect(
        ports == vec![Some(22), Some(443)],
        format!("valid rules not restored in order: {:?}", ports),
    );
    Ok(checks.finish())
}

async fn rule_order_restored(apply_timeout: Duration) -> Result<Vec<String>> {
    let drop_all = Rule::new(Chain::Input, Action::Drop);
    let h = Harness::new(reference_host().with_rule(drop_all.clone()), apply_timeout)?;
    let mut checks = Checks::default();

    h.save().await?;
    // Operator removed the SSH rule; the catch-all DROP now comes first.
    h.system
        .perturb(|state| state.rules.retain(|rule| rule.action == Action::Drop))
        .await;
    h.system.reset_calls().await;

    let result = completed(h.restore(true).await?)?;
    checks.expect(result.success, "restore of a reordered chain failed");
    checks.expect(
        h.system.state().await.rules == vec![ssh_rule(), drop_all.clone()],
        "INPUT chain not back in saved order",
    );
    checks.expect(
        h.system.calls().await.rule_inserts == 1,
        "expected exactly one rule insert",
    );

    h.system.reset_calls().await;
    completed(h.restore(true).await?)?;
    checks.expect(
        h.system.calls().await.rule_inserts == 0,
        "second restore inserted rules",
    );
    Ok(checks.finish())
}

async fn apply_timeout() -> Result<Vec<String>> {
    let h = Harness::new(reference_host(), Duration::from_millis(100))?;
    let mut checks = Checks::default();

    h.save().await?;
    h.system.perturb(wipe).await;
    h.system
        .set_faults(Faults {
            apply_delay: Some(Duration::from_secs(5)),
            ..Faults::default()
        })
        .await;

    let result = completed(h.restore(true).await?)?;
    checks.expect(!result.success, "timed out apply reported success");
    checks.expect(
        matches!(&result.steps[0].outcome, StepOutcome::Failed(reason) if reason.contains("timed out")),
        "netplan step not reported as timed out",
    );
    checks.expect(
        result.steps[1..]
            .iter()
            .all(|report| report.outcome.is_success()),
        "steps after the timeout did not run",
    );
    checks.expect(
        h.system.state().await.rules.len() == 1,
        "rules not restored after timeout",
    );
    Ok(checks.finish())
}

async fn missing_interface(apply_timeout: Duration) -> Result<Vec<String>> {
    let h = Harness::new(
        reference_host().with_interface("eth1", InterfaceState::new(LinkStatus::Up)),
        apply_timeout,
    )?;
    let mut checks = Checks::default();

    h.save().await?;
    h.system
        .perturb(|state| {
            state.interfaces.shift_remove("eth1");
        })
        .await;

    let result = completed(h.restore(true).await?)?;
    let eth1 = result
        .steps
        .iter()
        .find(|report| report.step.to_string().ends_with("eth1"));

    checks.expect(!result.success, "restore succeeded without eth1");
    checks.expect(
        eth1.is_some_and(|report| matches!(report.outcome, StepOutcome::BackendUnavailable(_))),
        "missing eth1 not reported as backend unavailable",
    );
    checks.expect(result.failures().count() == 1, "expected exactly one failure");
    Ok(checks.finish())
}

async fn degraded_capture(apply_timeout: Duration) -> Result<Vec<String>> {
    let h = Harness::new(reference_host(), apply_timeout)?;
    let mut checks = Checks::default();

    h.system
        .set_faults(Faults {
            interfaces_unavailable: true,
            rules_unavailable: true,
            netplan_unavailable: true,
            ..Faults::default()
        })
        .await;
    h.save().await?;

    let snapshot = h
        .store
        .load()
        .await?
        .context("degraded capture was not saved")?;
    checks.expect(snapshot.interfaces.is_empty(), "interfaces captured");
    checks.expect(snapshot.firewall_rules.is_empty(), "rules captured");
    checks.expect(
        snapshot.network_config == DeclarativeConfig::default(),
        "netplan document is not the default",
    );
    checks.expect(validate(&snapshot).is_empty(), "snapshot does not validate");
    Ok(checks.finish())
}

async fn corrupt_snapshot(apply_timeout: Duration) -> Result<Vec<String>> {
    let h = Harness::new(reference_host(), apply_timeout)?;
    let mut checks = Checks::default();

    h.save().await?;
    let path = h.store.snapshot_path().to_path_buf();
    let content = tokio::fs::read(&path).await?;
    tokio::fs::write(&path, &content[..content.len() / 2]).await?;
    h.system.reset_calls().await;

    let err = RestoreOrchestrator::new(h.store.clone(), h.system.backends())
        .run(|_| true)
        .await
        .err();
    checks.expect(
        err.as_ref().is_some_and(|e| e.is_corrupt()),
        "truncated snapshot not reported as corrupt",
    );
    checks.expect(
        h.system.calls().await.mutations() == 0,
        "corrupt snapshot changed the host",
    );
    Ok(checks.finish())
}

impl ScenarioSuite {
    pub fn print_summary(&self) {
        println!("Scenario Results:");
        println!("=================");
        println!("Total scenarios: {}", self.total);
        println!("Passed: {}", self.passed);
        println!("Failed: {}", self.failed);
        println!();

        for result in self.results.iter().filter(|r| !r.passed) {
            println!(
                "  {} - {}",
                result.name,
                result.error.as_deref().unwrap_or("expectations failed")
            );
            for failure in &result.failures {
                println!("    - {}", failure);
            }
        }
    }

    /// Markdown report of every scenario
    pub fn generate_report(&self) -> String {
        let mut report = String::new();

        report.push_str("# Scenario Report\n\n");
        report.push_str(&format!("**Total scenarios:** {}\n", self.total));
        report.push_str(&format!("**Passed:** {}\n", self.passed));
        report.push_str(&format!("**Failed:** {}\n\n", self.failed));

        for result in &self.results {
            let status = if result.passed { "PASS" } else { "FAIL" };
            report.push_str(&format!("- {} {}\n", status, result.name));
            if let Some(error) = &result.error {
                report.push_str(&format!("  - error: {}\n", error));
            }
            for failure in &result.failures {
                report.push_str(&format!("  - {}\n", failure));
            }
        }

        report
    }
}
