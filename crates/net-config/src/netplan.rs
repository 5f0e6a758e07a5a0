//! Netplan YAML document backend

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use netstate_core::{BackendError, CommandRunner, DeclarativeBackend, Result};
use netstate_types::DeclarativeConfig;

pub const DEFAULT_NETPLAN_FILE: &str = "/etc/netplan/01-netcfg.yaml";
pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// netplan warns about group or world readable files
const NETPLAN_FILE_MODE: u32 = 0o600;

/// Reads, writes and applies one netplan document
#[derive(Debug, Clone)]
pub struct NetplanBackend {
    yaml_path: PathBuf,
    netplan_binary: String,
    runner: CommandRunner,
}

impl Default for NetplanBackend {
    fn default() -> Self {
        Self::new(DEFAULT_NETPLAN_FILE)
    }
}

impl NetplanBackend {
    pub fn new(yaml_path: impl Into<PathBuf>) -> Self {
        Self::with_config(yaml_path, "netplan", DEFAULT_APPLY_TIMEOUT)
    }

    pub fn with_config(
        yaml_path: impl Into<PathBuf>,
        netplan_binary: impl Into<String>,
        apply_timeout: Duration,
    ) -> Self {
        Self {
            yaml_path: yaml_path.into(),
            netplan_binary: netplan_binary.into(),
            runner: CommandRunner::with_timeout(apply_timeout),
        }
    }

    pub fn yaml_path(&self) -> &Path {
        &self.yaml_path
    }

    fn parse_error(&self, message: impl ToString) -> BackendError {
        BackendError::Parse {
            what: self.yaml_path.display().to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl DeclarativeBackend for NetplanBackend {
    async fn load_current_config(&self) -> Result<DeclarativeConfig> {
        let content = match fs::read_to_string(&self.yaml_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist, using empty document", self.yaml_path.display());
                return Ok(DeclarativeConfig::default());
            }
            Err(e) => return Err(e.into()),
        };

        let value: serde_json::Value =
            serde_yaml::from_str(&content).map_err(|e| self.parse_error(e))?;
        let mut config = DeclarativeConfig::from_value(value).map_err(|e| self.parse_error(e))?;
        config.ensure_structure();
        Ok(config)
    }

    async fn write_config(&self, config: &DeclarativeConfig) -> Result<()> {
        let yaml = serde_yaml::to_string(config).map_err(|e| self.parse_error(e))?;

        if let Some(parent) = self.yaml_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.yaml_path.with_extension("yaml.tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.set_permissions(std::fs::Permissions::from_mode(NETPLAN_FILE_MODE))
            .await?;
        file.write_all(yaml.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &self.yaml_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        info!("Netplan configuration written to {}", self.yaml_path.display());
        Ok(())
    }

    async fn apply_config(&self) -> Result<()> {
        self.runner
            .run_checked(&self.netplan_binary, &["apply"])
            .await?;
        info!("Netplan configuration applied");
        Ok(())
    }
}
