//! netstate configuration
//!
//! Snapshot persistence, the netplan document backend and tool settings.

pub mod netplan;
pub mod settings;
pub mod store;

pub use netplan::{NetplanBackend, DEFAULT_APPLY_TIMEOUT, DEFAULT_NETPLAN_FILE};
pub use settings::{Settings, SettingsError, DEFAULT_SETTINGS_FILE};
pub use store::{BackupEntry, SaveReport, SnapshotStore, DEFAULT_CONFIG_DIR};
