//! Snapshot data model shared by every netstate crate.

pub mod changes;
pub mod error;
pub mod firewall;
pub mod network;
pub mod snapshot;

pub use changes::{ChangeType, ConfigChange};
pub use error::{SharedResult, SharedTypeError};
pub use firewall::{Action, Chain, Protocol, Rule, RuleEntry};
pub use network::{
    validate_interface_name, DeclarativeConfig, InterfaceState, LinkStatus, LOOPBACK,
    NOT_AVAILABLE,
};
pub use snapshot::{is_supported_version, validate, Snapshot, Violation, SCHEMA_VERSION};
