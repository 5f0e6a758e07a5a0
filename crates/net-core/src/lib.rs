//! netstate core
//!
//! Backend contracts, error taxonomy and command execution shared by the
//! capture, store and apply crates.

pub mod backend;
pub mod command;
pub mod error;

pub use backend::{Backends, DeclarativeBackend, InterfaceBackend, RuleBackend};
pub use command::{CommandOutput, CommandRunner};
pub use error::{BackendError, NetworkError, StoreError};

#[cfg(any(test, feature = "mock"))]
pub use backend::{MockDeclarativeBackend, MockInterfaceBackend, MockRuleBackend};

/// Result type for netstate operations
pub type Result<T> = std::result::Result<T, NetworkError>;
