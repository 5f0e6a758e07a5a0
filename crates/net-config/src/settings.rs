//! Tool settings: settings file merged with `NETSTATE_*` environment variables

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::netplan::DEFAULT_NETPLAN_FILE;
use crate::store::DEFAULT_CONFIG_DIR;

pub const DEFAULT_SETTINGS_FILE: &str = "/etc/network-tool/netstate.toml";
pub const ENV_PREFIX: &str = "NETSTATE";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the snapshot file and its backups
    pub config_dir: PathBuf,
    pub netplan_file: PathBuf,
    pub ip_binary: String,
    pub iptables_binary: String,
    pub netplan_binary: String,
    /// Upper bound for `netplan apply`
    pub apply_timeout_secs: u64,
    /// Upper bound for every other backend command; none when unset
    pub command_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            netplan_file: PathBuf::from(DEFAULT_NETPLAN_FILE),
            ip_binary: "ip".to_string(),
            iptables_binary: "iptables".to_string(),
            netplan_binary: "netplan".to_string(),
            apply_timeout_secs: 10,
            command_timeout_secs: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the optional default settings file
    /// when no path is given. Environment variables win over the file.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::from(Path::new(DEFAULT_SETTINGS_FILE)).required(false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> Result<(), SettingsError> {
        if self.apply_timeout_secs == 0 {
            return Err(SettingsError::Invalid {
                field: "apply_timeout_secs",
                reason: "must be at least one second".to_string(),
            });
        }
        if self.command_timeout_secs == Some(0) {
            return Err(SettingsError::Invalid {
                field: "command_timeout_secs",
                reason: "must be at least one second".to_string(),
            });
        }
        for (field, value) in [
            ("ip_binary", &self.ip_binary),
            ("iptables_binary", &self.iptables_binary),
            ("netplan_binary", &self.netplan_binary),
        ] {
            if value.trim().is_empty() {
                return Err(SettingsError::Invalid {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}
