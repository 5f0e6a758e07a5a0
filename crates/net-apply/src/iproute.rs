//! Interface backend on top of iproute2 (`ip -j`)

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use log::{debug, info};
use serde::Deserialize;

use netstate_core::{BackendError, CommandRunner, InterfaceBackend, NetworkError, Result};
use netstate_types::{validate_interface_name, InterfaceState, LinkStatus};

/// Entry of `ip -j addr show` / `ip -j link show`
#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    link_type: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    #[serde(default)]
    family: String,
    local: Option<String>,
    prefixlen: Option<u8>,
}

pub struct IpRouteBackend {
    ip_binary: String,
    runner: CommandRunner,
}

impl Default for IpRouteBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IpRouteBackend {
    pub fn new() -> Self {
        Self::with_config("ip", None)
    }

    pub fn with_config(ip_binary: impl Into<String>, command_timeout: Option<Duration>) -> Self {
        Self {
            ip_binary: ip_binary.into(),
            runner: command_timeout
                .map(CommandRunner::with_timeout)
                .unwrap_or_default(),
        }
    }

    async fn set_link(&self, name: &str, state: &str) -> Result<()> {
        validate_interface_name(name)?;

        let output = self
            .runner
            .run(&self.ip_binary, &["link", "set", "dev", name, state])
            .await?;
        if output.success {
            info!("Interface {} set {}", name, state);
            return Ok(());
        }

        if output.stderr.contains("Cannot find device") {
            Err(BackendError::InterfaceNotFound {
                name: name.to_string(),
            }
            .into())
        } else {
            Err(BackendError::CommandFailed {
                command: format!("{} link set dev {} {}", self.ip_binary, name, state),
                stderr: output.stderr.trim().to_string(),
            }
            .into())
        }
    }
}

#[async_trait]
impl InterfaceBackend for IpRouteBackend {
    async fn list_interface_states(&self) -> Result<IndexMap<String, InterfaceState>> {
        let output = self
            .runner
            .run_checked(&self.ip_binary, &["-j", "addr", "show"])
            .await?;
        parse_addr_show(&output.stdout)
    }

    async fn set_link_up(&self, name: &str) -> Result<()> {
        self.set_link(name, "up").await
    }

    async fn set_link_down(&self, name: &str) -> Result<()> {
        self.set_link(name, "down").await
    }

    async fn list_interface_names(&self) -> Result<Vec<String>> {
        let output = self
            .runner
            .run_checked(&self.ip_binary, &["-j", "link", "show"])
            .await?;
        Ok(parse_links(&output.stdout)?
            .into_iter()
            .map(|link| link.ifname)
            .collect())
    }
}

fn parse_links(json: &str) -> Result<Vec<IpLink>> {
    serde_json::from_str(json).map_err(|e| {
        NetworkError::from(BackendError::Parse {
            what: "ip -j output".to_string(),
            message: e.to_string(),
        })
    })
}

/// Parse `ip -j addr show` into interface states keyed by name, in kernel
/// order. The link is UP when the administrative `UP` flag is set.
pub fn parse_addr_show(json: &str) -> Result<IndexMap<String, InterfaceState>> {
    let mut interfaces = IndexMap::new();

    for link in parse_links(json)? {
        let status = if link.flags.iter().any(|flag| flag == "UP") {
            LinkStatus::Up
        } else {
            LinkStatus::Down
        };
        let mut state = InterfaceState::new(status);

        if link.link_type.as_deref() == Some("ether") {
            if let Some(mac) = link.address {
                state.mac = mac;
            }
        }

        for info in link.addr_info {
            let (Some(local), Some(prefixlen)) = (info.local, info.prefixlen) else {
                continue;
            };
            let address = format!("{}/{}", local, prefixlen);
            match info.family.as_str() {
                "inet" => state.ipv4.push(address),
                "inet6" => state.ipv6.push(address),
                other => debug!("Ignoring {} address {} of {}", other, address, link.ifname),
            }
        }

        interfaces.insert(link.ifname, state);
    }

    Ok(interfaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const ADDR_SHOW: &str = r#"[
        {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP","LOWER_UP"],"mtu":65536,
         "link_type":"loopback","address":"00:00:00:00:00:00",
         "addr_info":[{"family":"inet","local":"127.0.0.1","prefixlen":8,"scope":"host"},
                      {"family":"inet6","local":"::1","prefixlen":128,"scope":"host"}]},
        {"ifindex":2,"ifname":"eth0","flags":["BROADCAST","MULTICAST","UP","LOWER_UP"],
         "link_type":"ether","address":"52:54:00:12:34:56",
         "addr_info":[{"family":"inet","local":"192.168.1.50","prefixlen":24,"scope":"global"},
                      {"family":"inet6","local":"fe80::5054:ff:fe12:3456","prefixlen":64,"scope":"link"}]},
        {"ifindex":3,"ifname":"eth1","flags":["BROADCAST","MULTICAST"],
         "link_type":"ether","address":"52:54:00:ab:cd:ef","addr_info":[{}]},
        {"ifindex":4,"ifname":"wg0","flags":["POINTOPOINT","NOARP","UP","LOWER_UP"],
         "link_type":"none","addr_info":[]}
    ]"#;

    #[test]
    fn test_parse_addr_show() {
        let interfaces = parse_addr_show(ADDR_SHOW).unwrap();
        assert_eq!(
            interfaces.keys().collect::<Vec<_>>(),
            vec!["lo", "eth0", "eth1", "wg0"]
        );

        let eth0 = &interfaces["eth0"];
        assert_eq!(eth0.status, LinkStatus::Up);
        assert_eq!(eth0.ipv4, vec!["192.168.1.50/24"]);
        assert_eq!(eth0.ipv6, vec!["fe80::5054:ff:fe12:3456/64"]);
        assert_eq!(eth0.mac, "52:54:00:12:34:56");

        let eth1 = &interfaces["eth1"];
        assert_eq!(eth1.status, LinkStatus::Down);
        assert!(eth1.ipv4.is_empty());

        assert_eq!(interfaces["lo"].mac, "N/A");
        assert_eq!(interfaces["wg0"].mac, "N/A");
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_addr_show("Object \"addr\" is unknown"),
            Err(NetworkError::Backend(BackendError::Parse { .. }))
        ));
    }

    fn fake_ip(dir: &TempDir, script: &str) -> String {
        let path = dir.path().join("ip");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_missing_device() {
        let temp_dir = TempDir::new().unwrap();
        let ip = fake_ip(
            &temp_dir,
            "echo 'Cannot find device \"eth9\"' >&2; exit 1",
        );

        let err = IpRouteBackend::with_config(ip, None)
            .set_link_up("eth9")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetworkError::Backend(BackendError::InterfaceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_names() {
        let temp_dir = TempDir::new().unwrap();
        let ip = fake_ip(
            &temp_dir,
            r#"echo '[{"ifname":"lo","flags":["UP"]},{"ifname":"eth0","flags":[]}]'"#,
        );

        let names = IpRouteBackend::with_config(ip, Some(Duration::from_secs(5)))
            .list_interface_names()
            .await
            .unwrap();
        assert_eq!(names, vec!["lo", "eth0"]);
    }

    #[tokio::test]
    async fn test_loopback_is_not_touched() {
        let backend = IpRouteBackend::with_config("/nonexistent/ip", None);
        assert!(matches!(
            backend.set_link_down("lo").await,
            Err(NetworkError::Validation(_))
        ));
    }
}
