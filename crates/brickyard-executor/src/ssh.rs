use crate::executor::{BrickInfo, BrickRequest, DeviceInfo, RemoteExecutor, VolumeRequest};
use crate::process::run_with_timeout;
use crate::storage::{CommandRunner, Fstab, StorageCommands};
use crate::throttle::HostGate;
use crate::ExecutorError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    pub keyfile: Option<PathBuf>,
    pub sudo: bool,
    pub fstab: String,
    pub snapshot_limit: u32,
    pub rebalance_on_expansion: bool,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub max_connections_per_host: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_owned(),
            port: 22,
            keyfile: None,
            sudo: false,
            fstab: "/etc/fstab".to_owned(),
            snapshot_limit: 14,
            rebalance_on_expansion: false,
            connect_timeout_secs: 10,
            command_timeout_secs: 600,
            max_connections_per_host: 1,
        }
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Reaches hosts through the system `ssh` client.
pub struct SshExecutor {
    config: SshConfig,
    gate: HostGate,
    storage: StorageCommands,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Result<Self, ExecutorError> {
        if config.user.is_empty() {
            return Err(ExecutorError::Config("ssh user must not be empty".to_owned()));
        }
        if let Some(key) = &config.keyfile {
            if !key.is_file() {
                return Err(ExecutorError::Config(format!(
                    "ssh key file {} does not exist",
                    key.display()
                )));
            }
        }
        let storage = StorageCommands::new(
            Fstab::new(config.fstab.clone()),
            config.snapshot_limit,
            config.rebalance_on_expansion,
            Duration::from_secs(config.command_timeout_secs),
        );
        Ok(Self {
            gate: HostGate::new(config.max_connections_per_host),
            storage,
            config,
        })
    }

    pub fn gate(&self) -> &HostGate {
        &self.gate
    }

    fn ssh_command(&self, host: &str, command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_secs))
            .arg("-p")
            .arg(self.config.port.to_string());
        if let Some(key) = &self.config.keyfile {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(format!("{}@{host}", self.config.user));
        cmd.arg("--");
        if self.config.sudo {
            cmd.arg(format!("sudo sh -c {}", shell_quote(command)));
        } else {
            cmd.arg(command);
        }
        cmd
    }
}

impl CommandRunner for SshExecutor {
    fn run(
        &self,
        host: &str,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, ExecutorError> {
        let _permit = self.gate.acquire(host);
        let deadline = Instant::now() + timeout;
        let mut outputs = Vec::with_capacity(commands.len());

        for command in commands {
            let command = command.trim();
            let timed_out = || ExecutorError::Timeout {
                host: host.to_owned(),
                command: command.to_owned(),
                timeout,
            };
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(timed_out)?;

            let output =
                run_with_timeout(self.ssh_command(host, command), remaining)?.ok_or_else(timed_out)?;
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                error!("command [{command}] failed on {host}: {}", stderr.trim());
                return Err(ExecutorError::CommandFailed {
                    host: host.to_owned(),
                    command: command.to_owned(),
                    output: format!("{}{}", stderr.trim_end(), stdout.trim_end())
                        .trim()
                        .to_owned(),
                });
            }
            debug!("host {host} command [{command}] ok");
            outputs.push(stdout);
        }
        Ok(outputs)
    }
}

impl RemoteExecutor for SshExecutor {
    fn name(&self) -> &str {
        "ssh"
    }

    fn peer_probe(&self, exec_host: &str, new_host: &str) -> Result<(), ExecutorError> {
        self.storage.peer_probe(self, exec_host, new_host)
    }

    fn peer_detach(&self, exec_host: &str, target_host: &str) -> Result<(), ExecutorError> {
        self.storage.peer_detach(self, exec_host, target_host)
    }

    fn device_setup(
        &self,
        host: &str,
        device: &str,
        vg_id: &str,
    ) -> Result<DeviceInfo, ExecutorError> {
        self.storage.device_setup(self, host, device, vg_id)
    }

    fn device_teardown(
        &self,
        host: &str,
        device: &str,
        vg_id: &str,
    ) -> Result<(), ExecutorError> {
        self.storage.device_teardown(self, host, device, vg_id)
    }

    fn brick_create(&self, host: &str, brick: &BrickRequest) -> Result<BrickInfo, ExecutorError> {
        self.storage.brick_create(self, host, brick)
    }

    fn brick_destroy(&self, host: &str, brick: &BrickRequest) -> Result<(), ExecutorError> {
        self.storage.brick_destroy(self, host, brick)
    }

    fn volume_create(&self, host: &str, volume: &VolumeRequest) -> Result<(), ExecutorError> {
        self.storage.volume_create(self, host, volume)
    }

    fn volume_expand(&self, host: &str, volume: &VolumeRequest) -> Result<(), ExecutorError> {
        self.storage.volume_expand(self, host, volume)
    }

    fn volume_destroy(&self, host: &str, name: &str) -> Result<(), ExecutorError> {
        self.storage.volume_destroy(self, host, name)
    }

    fn remote_command_execute(
        &self,
        host: &str,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, ExecutorError> {
        self.run(host, commands, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn builds_batch_mode_invocation() {
        let exec = SshExecutor::new(SshConfig {
            user: "admin".to_owned(),
            port: 2222,
            ..SshConfig::default()
        })
        .unwrap();
        let cmd = exec.ssh_command("node1", "gluster peer status");
        assert_eq!(cmd.get_program(), "ssh");
        let a = args(&cmd);
        assert!(a.contains(&"BatchMode=yes".to_owned()));
        assert!(a.contains(&"2222".to_owned()));
        assert!(a.contains(&"admin@node1".to_owned()));
        assert_eq!(a.last().unwrap(), "gluster peer status");
    }

    #[test]
    fn sudo_wraps_command() {
        let exec = SshExecutor::new(SshConfig {
            sudo: true,
            ..SshConfig::default()
        })
        .unwrap();
        let cmd = exec.ssh_command("node1", "echo 'hi'");
        assert_eq!(args(&cmd).last().unwrap(), r"sudo sh -c 'echo '\''hi'\'''");
    }

    #[test]
    fn keyfile_is_passed_when_present() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let exec = SshExecutor::new(SshConfig {
            keyfile: Some(key.path().to_path_buf()),
            ..SshConfig::default()
        })
        .unwrap();
        let a = args(&exec.ssh_command("h", "true"));
        let i = a.iter().position(|x| x == "-i").unwrap();
        assert_eq!(a[i + 1], key.path().to_string_lossy());
    }

    #[test]
    fn missing_keyfile_is_config_error() {
        let err = SshExecutor::new(SshConfig {
            keyfile: Some(PathBuf::from("/nonexistent/brickyard_key")),
            ..SshConfig::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, ExecutorError::Config(_)));
    }

    #[test]
    fn empty_user_is_rejected() {
        assert!(SshExecutor::new(SshConfig {
            user: String::new(),
            ..SshConfig::default()
        })
        .is_err());
    }

    #[test]
    fn gate_follows_config() {
        let exec = SshExecutor::new(SshConfig {
            max_connections_per_host: 4,
            ..SshConfig::default()
        })
        .unwrap();
        assert_eq!(exec.gate().capacity(), 4);
    }
}
