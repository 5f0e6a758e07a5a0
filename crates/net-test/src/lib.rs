//! netstate test support
//!
//! A simulated host implementing every backend trait, and end-to-end
//! save/restore scenarios run against it.

pub mod scenarios;
pub mod sim;

pub use scenarios::{Harness, ScenarioResult, ScenarioRunner, ScenarioSuite};
pub use sim::{CallCounts, Faults, SimState, SimulatedSystem};
