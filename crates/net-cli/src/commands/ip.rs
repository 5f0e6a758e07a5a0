//! Address configuration through the netplan document

use std::sync::Arc;

use anyhow::{Context, Result};
use ipnet::IpNet;
use log::info;
use netstate_types::{validate_interface_name, DeclarativeConfig};

use crate::context::AppContext;

pub struct IpCommand {
    context: Arc<AppContext>,
}

impl IpCommand {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub async fn set_static(
        &self,
        interface: &str,
        address: &str,
        gateway: Option<&str>,
        dns: &[String],
    ) -> Result<()> {
        validate_interface_name(interface)?;
        address
            .parse::<IpNet>()
            .with_context(|| format!("Invalid address {}, expected addr/prefix", address))?;
        if let Some(gateway) = gateway {
            gateway
                .parse::<std::net::IpAddr>()
                .with_context(|| format!("Invalid gateway {}", gateway))?;
        }
        for server in dns {
            server
                .parse::<std::net::IpAddr>()
                .with_context(|| format!("Invalid DNS server {}", server))?;
        }

        self.update(|config| config.configure_static(interface, address, gateway, dns))
            .await?;
        println!("✓ {} configured with {}", interface, address);
        Ok(())
    }

    pub async fn set_dhcp(&self, interface: &str) -> Result<()> {
        validate_interface_name(interface)?;
        self.update(|config| config.configure_dhcp(interface)).await?;
        println!("✓ {} configured for DHCP", interface);
        Ok(())
    }

    /// Load the document, edit it, write it back whole and apply it.
    async fn update<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut DeclarativeConfig),
    {
        let backend = &self.context.backends.declarative;
        let mut config = backend
            .load_current_config()
            .await
            .context("Failed to load netplan configuration")?;
        config.ensure_structure();
        edit(&mut config);

        backend
            .write_config(&config)
            .await
            .context("Failed to write netplan configuration")?;
        info!("Netplan configuration written, applying");

        tokio::time::timeout(self.context.settings.apply_timeout(), backend.apply_config())
            .await
            .context("netplan apply timed out")?
            .context("Failed to apply netplan configuration")
    }
}
