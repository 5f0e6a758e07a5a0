//! Ordered, best-effort application of a snapshot to the live system

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::timeout;

use netstate_config::DEFAULT_APPLY_TIMEOUT;
use netstate_core::{BackendError, Backends, NetworkError};
use netstate_types::{
    Chain, DeclarativeConfig, InterfaceState, LinkStatus, Rule, RuleEntry, Snapshot, LOOPBACK,
};

/// One unit of work of a restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    DeclarativeConfig,
    LinkState { interface: String },
    /// `index` is the 1-based position of the rule in the snapshot
    FirewallRule { index: usize, rule: String },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::DeclarativeConfig => write!(f, "netplan configuration"),
            Step::LinkState { interface } => write!(f, "link state of {}", interface),
            Step::FirewallRule { index, rule } => write!(f, "firewall rule #{} ({})", index, rule),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    Skipped(String),
    ValidationFailed(String),
    BackendUnavailable(String),
    Failed(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Applied | StepOutcome::Skipped(_))
    }

    fn from_error(error: &NetworkError) -> Self {
        match error {
            NetworkError::Validation(violation) => StepOutcome::ValidationFailed(violation.to_string()),
            NetworkError::Backend(
                BackendError::Unavailable { .. } | BackendError::InterfaceNotFound { .. },
            ) => StepOutcome::BackendUnavailable(error.to_string()),
            _ => StepOutcome::Failed(error.to_string()),
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Applied => write!(f, "applied"),
            StepOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            StepOutcome::ValidationFailed(reason) => write!(f, "validation failed: {}", reason),
            StepOutcome::BackendUnavailable(reason) => write!(f, "backend unavailable: {}", reason),
            StepOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub outcome: StepOutcome,
}

/// Outcome of a whole restore
#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub steps: Vec<StepReport>,
    /// True iff every step was applied or skipped
    pub success: bool,
    pub duration_ms: u64,
}

impl AggregateResult {
    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|report| !report.outcome.is_success())
    }

    /// The first unsuccessful step as an error, if any.
    pub fn first_failure(&self) -> Option<NetworkError> {
        self.failures().next().map(|report| NetworkError::ApplyStepFailed {
            step: report.step.to_string(),
            reason: report.outcome.to_string(),
        })
    }
}

/// Applies snapshots step by step. A failed step is recorded and the
/// remaining steps still run; nothing is rolled back.
pub struct Reconciler {
    backends: Backends,
    apply_timeout: Duration,
}

impl Reconciler {
    pub fn new(backends: Backends) -> Self {
        Self {
            backends,
            apply_timeout: DEFAULT_APPLY_TIMEOUT,
        }
    }

    pub fn with_apply_timeout(mut self, apply_timeout: Duration) -> Self {
        self.apply_timeout = apply_timeout;
        self
    }

    /// Apply `snapshot`: netplan configuration first, then link states, then
    /// firewall rules in snapshot order.
    pub async fn apply(&self, snapshot: &Snapshot) -> AggregateResult {
        let start_time = Instant::now();
        let mut steps = Vec::new();

        steps.push(StepReport {
            step: Step::DeclarativeConfig,
            outcome: self.apply_declarative(&snapshot.network_config).await,
        });
        steps.extend(self.apply_link_states(&snapshot.interfaces).await);
        steps.extend(self.apply_rules(&snapshot.firewall_rules).await);

        for report in &steps {
            debug!("{}: {}", report.step, report.outcome);
        }

        AggregateResult {
            success: steps.iter().all(|report| report.outcome.is_success()),
            steps,
            duration_ms: start_time.elapsed().as_millis() as u64,
        }
    }

    async fn apply_declarative(&self, config: &DeclarativeConfig) -> StepOutcome {
        if config.is_empty() {
            return StepOutcome::Skipped("no netplan configuration saved".to_string());
        }

        let mut document = config.clone();
        document.ensure_structure();

        if let Err(e) = self.backends.declarative.write_config(&document).await {
            warn!("Failed to write netplan configuration: {}", e);
            return StepOutcome::Failed(e.to_string());
        }

        match timeout(self.apply_timeout, self.backends.declarative.apply_config()).await {
            Ok(Ok(())) => {
                info!("Netplan configuration restored");
                StepOutcome::Applied
            }
            Ok(Err(e)) => {
                warn!("Failed to apply netplan configuration: {}", e);
                StepOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!("netplan apply timed out after {:?}", self.apply_timeout);
                StepOutcome::Failed(format!("timed out after {:?}", self.apply_timeout))
            }
        }
    }

    async fn apply_link_states(
        &self,
        interfaces: &IndexMap<String, InterfaceState>,
    ) -> Vec<StepReport> {
        if interfaces.is_empty() {
            return Vec::new();
        }

        let present = match self.backends.interfaces.list_interface_names().await {
            Ok(names) => Ok(names),
            Err(e) => {
                warn!("Failed to list interfaces: {}", e);
                Err(e.to_string())
            }
        };

        let mut reports = Vec::new();
        for (name, state) in interfaces {
            if name == LOOPBACK {
                continue;
            }

            let outcome = match &present {
                Err(reason) => StepOutcome::BackendUnavailable(reason.clone()),
                Ok(names) if !names.contains(name) => {
                    warn!("Interface {} not found, link state not restored", name);
                    StepOutcome::BackendUnavailable(format!("interface {} not present", name))
                }
                Ok(_) => {
                    let result = match state.status {
                        LinkStatus::Up => self.backends.interfaces.set_link_up(name).await,
                        LinkStatus::Down => self.backends.interfaces.set_link_down(name).await,
                    };
                    match result {
                        Ok(()) => {
                            info!("Interface {} set {}", name, state.status);
                            StepOutcome::Applied
                        }
                        Err(e) => {
                            warn!("Failed to set {} {}: {}", name, state.status, e);
                            StepOutcome::from_error(&e)
                        }
                    }
                }
            };

            reports.push(StepReport {
                step: Step::LinkState {
                    interface: name.clone(),
                },
                outcome,
            });
        }
        reports
    }

    async fn apply_rules(&self, entries: &[RuleEntry]) -> Vec<StepReport> {
        if entries.is_empty() {
            return Vec::new();
        }

        let live = match self.backends.rules.list_all_rules().await {
            Ok(live) => live,
            Err(e) => {
                warn!("Failed to list firewall rules, inserting without checks: {}", e);
                Vec::new()
            }
        };
        let mut cursor = RuleCursor::new(live);

        let mut reports = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let outcome = match entry.validate() {
                Err(violation) => {
                    warn!("Rejected firewall rule: {}", violation);
                    StepOutcome::ValidationFailed(violation.to_string())
                }
                Ok(rule) => self.place_rule(rule, &mut cursor).await,
            };

            reports.push(StepReport {
                step: Step::FirewallRule {
                    index: i + 1,
                    rule: entry.to_string(),
                },
                outcome,
            });
        }
        reports
    }

    async fn place_rule(&self, rule: &Rule, cursor: &mut RuleCursor) -> StepOutcome {
        let placement = cursor.placement(rule);
        let result = match placement {
            Placement::Present => {
                cursor.advance(rule, placement);
                return StepOutcome::Skipped("already present".to_string());
            }
            Placement::Before(index) => self.backends.rules.insert_rule_before(rule, index).await,
            Placement::Append => self.backends.rules.insert_rule(rule).await,
        };

        match result {
            Ok(()) => {
                cursor.advance(rule, placement);
                info!("Firewall rule added: {}", rule);
                StepOutcome::Applied
            }
            Err(e) => {
                warn!("Failed to add firewall rule {}: {}", rule, e);
                StepOutcome::from_error(&e)
            }
        }
    }
}

/// Where a saved rule goes relative to the live rules of its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// The next unmatched live rule already has the same spec
    Present,
    /// Insert ahead of the live rule at this 0-based index of the chain
    Before(usize),
    Append,
}

#[derive(Debug, Default)]
struct ChainCursor {
    live: Vec<Rule>,
    next: usize,
}

/// Walks the saved rules of each chain against the live chain from its
/// start. A saved rule counts as present only when the live rule at the
/// cursor matches it, so everything saved before it in that chain is
/// already in place. Live rules past the matched prefix are never removed;
/// missing rules are inserted ahead of them.
#[derive(Debug, Default)]
pub(crate) struct RuleCursor {
    chains: HashMap<Chain, ChainCursor>,
}

impl RuleCursor {
    pub(crate) fn new(live: Vec<Rule>) -> Self {
        let mut chains: HashMap<Chain, ChainCursor> = HashMap::new();
        for rule in live {
            chains.entry(rule.chain).or_default().live.push(rule);
        }
        Self { chains }
    }

    pub(crate) fn placement(&self, rule: &Rule) -> Placement {
        let Some(chain) = self.chains.get(&rule.chain) else {
            return Placement::Append;
        };
        match chain.live.get(chain.next) {
            Some(live) if live.same_spec(rule) => Placement::Present,
            Some(_) => Placement::Before(chain.next),
            None => Placement::Append,
        }
    }

    pub(crate) fn live_rule(&self, chain: Chain, index: usize) -> Option<&Rule> {
        self.chains.get(&chain)?.live.get(index)
    }

    /// Record that `rule` now sits at `placement`.
    pub(crate) fn advance(&mut self, rule: &Rule, placement: Placement) {
        let chain = self.chains.entry(rule.chain).or_default();
        if placement != Placement::Present {
            chain.live.insert(chain.next, rule.clone());
        }
        chain.next += 1;
    }
}
