//! Shared handles for CLI commands

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;

use netstate_apply::{IpRouteBackend, IptablesBackend};
use netstate_config::{NetplanBackend, Settings, SnapshotStore};
use netstate_core::Backends;

#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub store: SnapshotStore,
    pub backends: Backends,
}

impl AppContext {
    pub fn new(settings: Settings, store: SnapshotStore, backends: Backends) -> Arc<Self> {
        Arc::new(Self {
            settings,
            store,
            backends,
        })
    }

    /// Load settings and wire up the system backends.
    pub fn bootstrap(settings_file: Option<&Path>) -> Result<Arc<Self>> {
        let settings = Settings::load(settings_file).context("Failed to load settings")?;
        debug!("Using settings {:?}", settings);

        let command_timeout = settings.command_timeout();
        let backends = Backends::new(
            Arc::new(IpRouteBackend::with_config(
                settings.ip_binary.clone(),
                command_timeout,
            )),
            Arc::new(IptablesBackend::with_config(
                settings.iptables_binary.clone(),
                command_timeout,
            )),
            Arc::new(NetplanBackend::with_config(
                settings.netplan_file.clone(),
                settings.netplan_binary.clone(),
                settings.apply_timeout(),
            )),
        );

        let store = SnapshotStore::new(settings.config_dir.clone());
        Ok(Self::new(settings, store, backends))
    }
}
