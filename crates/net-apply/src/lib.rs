//! netstate apply
//!
//! Live state capture, step-wise reconciliation and the restore workflow,
//! plus the iproute2 and iptables backends.

pub mod capture;
pub mod iproute;
pub mod iptables;
pub mod reconcile;
pub mod restore;

pub use capture::StateCapturer;
pub use iproute::IpRouteBackend;
pub use iptables::IptablesBackend;
pub use reconcile::{AggregateResult, Reconciler, Step, StepOutcome, StepReport};
pub use restore::{diff, RestoreOrchestrator, RestoreOutcome, RestorePlan, SnapshotSummary};
