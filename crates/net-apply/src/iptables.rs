//! Rule backend on top of the `iptables` filter table

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use netstate_core::{BackendError, CommandRunner, Result, RuleBackend};
use netstate_types::{Action, Chain, Protocol, Rule};

const TABLE: &str = "filter";

pub struct IptablesBackend {
    iptables_binary: String,
    runner: CommandRunner,
}

impl Default for IptablesBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IptablesBackend {
    pub fn new() -> Self {
        Self::with_config("iptables", None)
    }

    pub fn with_config(
        iptables_binary: impl Into<String>,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self {
            iptables_binary: iptables_binary.into(),
            runner: command_timeout
                .map(CommandRunner::with_timeout)
                .unwrap_or_default(),
        }
    }

    async fn iptables(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["-t", TABLE];
        full.extend_from_slice(args);
        Ok(self.runner.run_checked(&self.iptables_binary, &full).await?.stdout)
    }

    /// Every rule of `chain` with its 1-based position. Rules outside the
    /// model keep their position but carry no [`Rule`].
    async fn list_positions(&self, chain: Chain) -> Result<Vec<(usize, Option<Rule>)>> {
        let listing = self.iptables(&["-S", chain.as_str()]).await?;
        Ok(listing
            .lines()
            .filter(|line| line.starts_with("-A "))
            .enumerate()
            .map(|(i, line)| (i + 1, parse_rule_line(line)))
            .collect())
    }
}

#[async_trait]
impl RuleBackend for IptablesBackend {
    async fn list_rules(&self, chain: Chain) -> Result<Vec<Rule>> {
        Ok(self
            .list_positions(chain)
            .await?
            .into_iter()
            .filter_map(|(_, rule)| rule)
            .collect())
    }

    async fn insert_rule(&self, rule: &Rule) -> Result<()> {
        rule.validate()?;

        let args = rule_args(rule);
        let mut full = vec!["-A", rule.chain.as_str()];
        full.extend(args.iter().map(String::as_str));
        self.iptables(&full).await?;

        info!("Added firewall rule: {}", rule);
        Ok(())
    }

    async fn insert_rule_before(&self, rule: &Rule, index: usize) -> Result<()> {
        rule.validate()?;

        // `index` counts modelled rules only; -I takes the raw chain position.
        let position = self
            .list_positions(rule.chain)
            .await?
            .into_iter()
            .filter(|(_, existing)| existing.is_some())
            .nth(index)
            .map(|(position, _)| position);
        let Some(position) = position else {
            return self.insert_rule(rule).await;
        };

        let position = position.to_string();
        let args = rule_args(rule);
        let mut full = vec!["-I", rule.chain.as_str(), position.as_str()];
        full.extend(args.iter().map(String::as_str));
        self.iptables(&full).await?;

        info!("Inserted firewall rule at #{}: {}", position, rule);
        Ok(())
    }

    async fn delete_rule_by_spec(&self, rule: &Rule) -> Result<()> {
        let position = self
            .list_positions(rule.chain)
            .await?
            .into_iter()
            .find_map(|(position, existing)| {
                existing
                    .filter(|existing| existing.same_spec(rule))
                    .map(|_| position)
            })
            .ok_or_else(|| BackendError::RuleNotFound {
                chain: rule.chain.to_string(),
                rule: rule.to_string(),
            })?;

        self.delete_rule_by_position(rule.chain, position).await
    }

    async fn delete_rule_by_position(&self, chain: Chain, position: usize) -> Result<()> {
        let count = self.list_positions(chain).await?.len();
        if position == 0 || position > count {
            return Err(BackendError::RuleNotFound {
                chain: chain.to_string(),
                rule: format!("#{} (chain has {} rules)", position, count),
            }
            .into());
        }

        let position = position.to_string();
        self.iptables(&["-D", chain.as_str(), position.as_str()])
            .await?;
        info!("Deleted rule #{} from {}", position, chain);
        Ok(())
    }

    async fn clear_chain(&self, chain: Chain) -> Result<()> {
        self.iptables(&["-F", chain.as_str()]).await?;
        info!("Cleared chain {}", chain);
        Ok(())
    }
}

/// Match and target arguments for `rule`, without the chain.
pub fn rule_args(rule: &Rule) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(protocol) = rule.protocol {
        args.extend(["-p".to_string(), protocol.as_str().to_string()]);
    }
    if let Some(port) = rule.port {
        args.extend(["--dport".to_string(), port.to_string()]);
    }
    if let Some(source) = &rule.source {
        args.extend(["-s".to_string(), source.clone()]);
    }
    if let Some(description) = &rule.description {
        args.extend([
            "-m".to_string(),
            "comment".to_string(),
            "--comment".to_string(),
            description.clone(),
        ]);
    }
    args.extend(["-j".to_string(), rule.action.as_str().to_string()]);
    args
}

/// Parse one `-A` line of `iptables -S`. Lines using matches or targets the
/// rule model cannot express yield `None`.
pub fn parse_rule_line(line: &str) -> Option<Rule> {
    let tokens = split_args(line);
    let mut tokens = tokens.iter().map(String::as_str);

    let mut chain = None;
    let mut protocol = None;
    let mut port = None;
    let mut source = None;
    let mut description = None;
    let mut action = None;

    while let Some(token) = tokens.next() {
        let parsed = match token {
            "-A" => tokens.next().and_then(|c| c.parse::<Chain>().ok()).map(|c| chain = Some(c)),
            "-p" => tokens
                .next()
                .and_then(|p| p.parse::<Protocol>().ok())
                .map(|p| protocol = Some(p)),
            "-s" => tokens.next().map(|s| source = Some(s.to_string())),
            "--dport" => tokens
                .next()
                .and_then(|p| p.parse::<u16>().ok())
                .map(|p| port = Some(p)),
            "-m" => tokens
                .next()
                .filter(|m| matches!(*m, "tcp" | "udp" | "icmp" | "comment"))
                .map(|_| ()),
            "--comment" => tokens.next().map(|c| description = Some(c.to_string())),
            "-j" => tokens
                .next()
                .and_then(|a| a.parse::<Action>().ok())
                .map(|a| action = Some(a)),
            _ => None,
        };

        if parsed.is_none() {
            debug!("Skipping rule outside the model: {}", line);
            return None;
        }
    }

    let mut rule = Rule::new(chain?, action?);
    rule.protocol = protocol;
    rule.port = port;
    rule.source = source;
    rule.description = description;
    Some(rule)
}

/// Split an `iptables -S` line into arguments, honouring double quotes and
/// backslash escapes as iptables prints them.
fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_token = true;
            }
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use netstate_core::NetworkError;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_split_args() {
        assert_eq!(
            split_args(r#"-A INPUT -m comment --comment "Allow \"web\" traffic" -j ACCEPT"#),
            vec![
                "-A",
                "INPUT",
                "-m",
                "comment",
                "--comment",
                "Allow \"web\" traffic",
                "-j",
                "ACCEPT"
            ]
        );
    }

    #[test]
    fn test_parse_rule_lines() {
        let rule = parse_rule_line(
            r#"-A INPUT -s 10.0.0.0/8 -p tcp -m tcp --dport 22 -m comment --comment "Allow SSH" -j ACCEPT"#,
        )
        .unwrap();
        assert_eq!(rule.chain, Chain::Input);
        assert_eq!(rule.protocol, Some(Protocol::Tcp));
        assert_eq!(rule.port, Some(22));
        assert_eq!(rule.source.as_deref(), Some("10.0.0.0/8"));
        assert_eq!(rule.description.as_deref(), Some("Allow SSH"));
        assert_eq!(rule.action, Action::Accept);

        let rule = parse_rule_line("-A FORWARD -j DROP").unwrap();
        assert_eq!(rule, Rule::new(Chain::Forward, Action::Drop));

        assert!(parse_rule_line("-P INPUT ACCEPT").is_none());
        assert!(parse_rule_line("-A INPUT -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT").is_none());
        assert!(parse_rule_line("-A INPUT -i eth0 -j ACCEPT").is_none());
        assert!(parse_rule_line("-A INPUT -j LOG").is_none());
        assert!(parse_rule_line("-A INPUT -p tcp --dport 1000:2000 -j ACCEPT").is_none());
    }

    #[test]
    fn test_rule_args() {
        let rule = Rule::new(Chain::Input, Action::Reject)
            .with_protocol(Protocol::Udp)
            .with_port(53)
            .with_source("192.168.0.0/16")
            .with_description("DNS");
        assert_eq!(
            rule_args(&rule),
            vec![
                "-p",
                "udp",
                "--dport",
                "53",
                "-s",
                "192.168.0.0/16",
                "-m",
                "comment",
                "--comment",
                "DNS",
                "-j",
                "REJECT"
            ]
        );

        let line = format!("-A INPUT {}", rule_args(&rule).join(" "));
        assert_eq!(parse_rule_line(&line), Some(rule));
    }

    /// Fake iptables that prints a fixed listing and logs every call.
    fn fake_iptables(dir: &TempDir) -> String {
        let path = dir.path().join("iptables");
        let log = dir.path().join("calls.log");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> {log}\ncase \"$*\" in\n  *-S*)\n    echo '-P INPUT ACCEPT'\n    echo '-A INPUT -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT'\n    echo '-A INPUT -p tcp -m tcp --dport 22 -j ACCEPT'\n    ;;\nesac\n",
            log = log.display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn calls(dir: &TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_delete_by_spec_uses_listing_position() {
        let temp_dir = TempDir::new().unwrap();
        let backend = IptablesBackend::with_config(fake_iptables(&temp_dir), None);

        let ssh = Rule::new(Chain::Input, Action::Accept)
            .with_protocol(Protocol::Tcp)
            .with_port(22);
        assert_eq!(backend.list_rules(Chain::Input).await.unwrap(), vec![ssh.clone()]);

        backend.delete_rule_by_spec(&ssh).await.unwrap();
        assert_eq!(calls(&temp_dir).last().unwrap(), "-t filter -D INPUT 2");
    }

    #[tokio::test]
    async fn test_insert_before_counts_modelled_rules_only() {
        let temp_dir = TempDir::new().unwrap();
        let backend = IptablesBackend::with_config(fake_iptables(&temp_dir), None);

        let http = Rule::new(Chain::Input, Action::Accept)
            .with_protocol(Protocol::Tcp)
            .with_port(80);
        backend.insert_rule_before(&http, 0).await.unwrap();
        assert_eq!(
            calls(&temp_dir).last().unwrap(),
            "-t filter -I INPUT 2 -p tcp --dport 80 -j ACCEPT"
        );

        backend.insert_rule_before(&http, 1).await.unwrap();
        assert_eq!(
            calls(&temp_dir).last().unwrap(),
            "-t filter -A INPUT -p tcp --dport 80 -j ACCEPT"
        );
    }

    #[tokio::test]
    async fn test_delete_out_of_range() {
        let temp_dir = TempDir::new().unwrap();
        let backend = IptablesBackend::with_config(fake_iptables(&temp_dir), None);

        let err = backend
            .delete_rule_by_position(Chain::Input, 3)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetworkError::Backend(BackendError::RuleNotFound { .. })
        ));
        assert!(!calls(&temp_dir).iter().any(|call| call.contains("-D")));
    }

    #[tokio::test]
    async fn test_invalid_rule_is_not_inserted() {
        let temp_dir = TempDir::new().unwrap();
        let backend = IptablesBackend::with_config(fake_iptables(&temp_dir), None);

        let err = backend
            .insert_rule(&Rule::new(Chain::Input, Action::Accept).with_protocol(Protocol::Tcp))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Validation(_)));
        assert!(calls(&temp_dir).is_empty());
    }
}
