//! Snapshot persistence with timestamped backups

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use netstate_core::{NetworkError, Result, StoreError};
use netstate_types::{validate, Snapshot};

/// Default location of the snapshot file and its backups
pub const DEFAULT_CONFIG_DIR: &str = "/etc/network-tool";

pub const SNAPSHOT_FILE_NAME: &str = "network_config.json";
pub const BACKUP_DIR_NAME: &str = "backups";

const BACKUP_PREFIX: &str = "network_config_";
const MAX_BACKUP_SUFFIX: u32 = 1000;

/// What a successful save wrote
#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub path: PathBuf,
    /// Copy of the previous snapshot, if there was one and it could be kept
    pub backup: Option<PathBuf>,
    pub captured_at: DateTime<Utc>,
}

/// One file in the backup directory
#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Reads and writes the canonical snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    config_dir: PathBuf,
    snapshot_path: PathBuf,
    backup_dir: PathBuf,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR)
    }
}

impl SnapshotStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            snapshot_path: config_dir.join(SNAPSHOT_FILE_NAME),
            backup_dir: config_dir.join(BACKUP_DIR_NAME),
            config_dir,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Persist `snapshot`, keeping the previous file as a backup.
    ///
    /// The caller's snapshot is not modified; the stamped copy that was
    /// written is described by the returned report.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<SaveReport> {
        self.save_at(snapshot, Utc::now()).await
    }

    async fn save_at(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Result<SaveReport> {
        fs::create_dir_all(&self.config_dir)
            .await
            .map_err(|e| StoreError::from_io(&self.config_dir, e))?;

        let backup = match self.backup_current(now).await {
            Ok(backup) => backup,
            Err(e) => {
                warn!("Could not back up {}: {}", self.snapshot_path.display(), e);
                None
            }
        };

        let stamped = snapshot.stamped(now);
        let mut content = serde_json::to_string_pretty(&stamped)?;
        content.push('\n');
        self.write_atomically(content.as_bytes()).await?;

        info!("Configuration saved to {}", self.snapshot_path.display());
        Ok(SaveReport {
            path: self.snapshot_path.clone(),
            backup,
            captured_at: stamped.captured_at.unwrap_or(now),
        })
    }

    /// Load the canonical snapshot. `None` means nothing has been saved yet.
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let content = match fs::read_to_string(&self.snapshot_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No saved configuration at {}", self.snapshot_path.display());
                return Ok(None);
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(self.corrupt(e.to_string()));
            }
            Err(e) => return Err(StoreError::from_io(&self.snapshot_path, e).into()),
        };

        let snapshot: Snapshot =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;

        if !snapshot.is_supported_version() {
            return Err(self.corrupt(format!(
                "unsupported snapshot version {}",
                snapshot.schema_version
            )));
        }

        for violation in validate(&snapshot) {
            warn!(
                "Saved configuration {}: {}",
                self.snapshot_path.display(),
                violation
            );
        }

        match snapshot.captured_at {
            Some(at) => info!(
                "Configuration loaded from {} (saved {})",
                self.snapshot_path.display(),
                at
            ),
            None => info!("Configuration loaded from {}", self.snapshot_path.display()),
        }
        Ok(Some(snapshot))
    }

    /// Backups, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupEntry>> {
        let mut dir = match fs::read_dir(&self.backup_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::from_io(&self.backup_dir, e).into()),
        };

        let mut backups = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::from_io(&self.backup_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(BACKUP_PREFIX) || !name.ends_with(".json") {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Skipping backup {}: {}", name, e);
                    continue;
                }
            };

            backups.push(BackupEntry {
                path: entry.path(),
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                name,
            });
        }

        // Names embed the timestamp, so lexical order is chronological.
        backups.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(backups)
    }

    /// Copy the current snapshot file verbatim into the backup directory.
    async fn backup_current(&self, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
        let current = match fs::read(&self.snapshot_path).await {
            Ok(current) => current,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::from_io(&self.snapshot_path, e).into()),
        };

        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| StoreError::from_io(&self.backup_dir, e))?;

        let stem = format!("{}{}", BACKUP_PREFIX, now.format("%Y%m%d_%H%M%S"));
        let (backup_path, mut file) = self.create_backup_file(&stem).await?;

        file.write_all(&current)
            .await
            .map_err(|e| StoreError::from_io(&backup_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::from_io(&backup_path, e))?;
        drop(file);

        let written = fs::read(&backup_path)
            .await
            .map_err(|e| StoreError::from_io(&backup_path, e))?;
        let expected = md5::compute(&current);
        if md5::compute(&written) != expected {
            return Err(StoreError::Corrupt {
                path: backup_path.display().to_string(),
                reason: "backup checksum mismatch".to_string(),
            }
            .into());
        }

        debug!(
            "Backed up {} to {} (md5 {:x})",
            self.snapshot_path.display(),
            backup_path.display(),
            expected
        );
        Ok(Some(backup_path))
    }

    /// Create a new backup file named after `stem`, adding `_1`, `_2`, ...
    /// when a backup with the same timestamp already exists.
    async fn create_backup_file(&self, stem: &str) -> Result<(PathBuf, fs::File)> {
        for n in 0..MAX_BACKUP_SUFFIX {
            let name = if n == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}_{}.json", stem, n)
            };
            let path = self.backup_dir.join(name);

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StoreError::from_io(&path, e).into()),
            }
        }

        Err(StoreError::Io {
            path: self.backup_dir.join(stem).display().to_string(),
            source: io::Error::from(io::ErrorKind::AlreadyExists),
        }
        .into())
    }

    async fn write_atomically(&self, content: &[u8]) -> Result<()> {
        let tmp_path = self
            .snapshot_path
            .with_file_name(format!("{}.tmp", SNAPSHOT_FILE_NAME));

        let written = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(content).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &self.snapshot_path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::from_io(&self.snapshot_path, e).into());
        }
        Ok(())
    }

    fn corrupt(&self, reason: String) -> NetworkError {
        StoreError::Corrupt {
            path: self.snapshot_path.display().to_string(),
            reason,
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use netstate_types::{Action, Chain, InterfaceState, LinkStatus, Protocol, Rule, RuleEntry};
    use tempfile::TempDir;

    fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.interfaces.insert(
            "eth0".to_string(),
            InterfaceState::new(LinkStatus::Up)
                .with_ipv4("192.168.1.50/24")
                .with_mac("52:54:00:12:34:56"),
        );
        snapshot.firewall_rules.push(
            Rule::new(Chain::Input, Action::Accept)
                .with_protocol(Protocol::Tcp)
                .with_port(22)
                .with_description("Allow SSH")
                .into(),
        );
        snapshot
    }

    #[tokio::test]
    async fn test_load_without_saved_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        assert!(store.load().await.unwrap().is_none());
        assert!(store.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path().join("nested").join("dir"));
        let snapshot = sample_snapshot();

        let report = store.save(&snapshot).await.unwrap();
        assert!(report.backup.is_none());
        assert_eq!(report.path, store.snapshot_path());
        assert!(snapshot.captured_at.is_none());

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.captured_at, Some(report.captured_at));
        assert_eq!(loaded.interfaces, snapshot.interfaces);
        assert_eq!(loaded.firewall_rules, snapshot.firewall_rules);
        assert_eq!(loaded.network_config, snapshot.network_config);

        assert!(!store
            .snapshot_path()
            .with_file_name("network_config.json.tmp")
            .exists());
    }

    #[tokio::test]
    async fn test_second_save_backs_up_previous_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        store.save(&sample_snapshot()).await.unwrap();
        let first = std::fs::read(store.snapshot_path()).unwrap();

        let report = store.save(&Snapshot::default()).await.unwrap();
        let backup = report.backup.unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), first);

        let backups = store.list_backups().await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].path, backup);
        assert!(backups[0].name.starts_with("network_config_"));
    }

    #[tokio::test]
    async fn test_backups_in_same_second_do_not_collide() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 9, 30, 0).unwrap();

        store.save_at(&sample_snapshot(), now).await.unwrap();
        let first = store.save_at(&sample_snapshot(), now).await.unwrap();
        let second = store.save_at(&Snapshot::default(), now).await.unwrap();

        let first = first.backup.unwrap();
        let second = second.backup.unwrap();
        assert_ne!(first, second);
        assert!(first.ends_with("network_config_20261017_093000.json"));
        assert!(second.ends_with("network_config_20261017_093000_1.json"));

        let backups = store.list_backups().await.unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].path, second);
    }

    #[tokio::test]
    async fn test_truncated_file_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        std::fs::write(store.snapshot_path(), "{\"version\": \"1.0\", \"interfa").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(err.is_corrupt());
    }

    #[tokio::test]
    async fn test_unsupported_version_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        std::fs::write(
            store.snapshot_path(),
            r#"{"version": "2.0", "interfaces": {}, "firewall_rules": []}"#,
        )
        .unwrap();

        assert!(store.load().await.unwrap_err().is_corrupt());
    }

    #[tokio::test]
    async fn test_invalid_rule_does_not_fail_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        std::fs::write(
            store.snapshot_path(),
            r#"{
                "version": "1.0",
                "interfaces": {},
                "network_config": {"network": {"version": 2, "ethernets": {}}},
                "firewall_rules": [{"chain": "INPUT", "protocol": "tcp", "action": "ACCEPT"}]
            }"#,
        )
        .unwrap();

        let snapshot = store.load().await.unwrap().unwrap();
        assert_eq!(snapshot.firewall_rules.len(), 1);
        assert_eq!(validate(&snapshot).len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_rule_does_not_fail_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        std::fs::write(
            store.snapshot_path(),
            r#"{
                "version": "1.0",
                "interfaces": {},
                "network_config": {"network": {"version": 2, "ethernets": {}}},
                "firewall_rules": [
                    {"chain": "INPUT", "protocol": "tcp", "port": 22, "action": "ACCEPT"},
                    {"chain": "INPUT", "protocol": "tcp", "port": "8080", "action": "ACCEPT"},
                    {"chain": "input", "action": "DROP"}
                ]
            }"#,
        )
        .unwrap();

        let snapshot = store.load().await.unwrap().unwrap();
        assert_eq!(snapshot.firewall_rules.len(), 3);
        assert!(snapshot.firewall_rules[0].as_rule().is_some());
        assert!(matches!(snapshot.firewall_rules[1], RuleEntry::Malformed(_)));
        assert!(matches!(snapshot.firewall_rules[2], RuleEntry::Malformed(_)));
        assert_eq!(validate(&snapshot).len(), 2);

        // Malformed entries survive a save unchanged.
        store.save(&snapshot).await.unwrap();
        let reloaded = store.load().await.unwrap().unwrap();
        assert_eq!(reloaded.firewall_rules, snapshot.firewall_rules);
    }

    #[tokio::test]
    async fn test_unusable_config_dir_fails_save() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let store = SnapshotStore::new(blocker.join("config"));
        let err = store.save(&sample_snapshot()).await.unwrap_err();
        assert!(matches!(err, NetworkError::Store(_)));
    }
}
