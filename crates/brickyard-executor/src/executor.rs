use crate::kube::{KubeConfig, KubeExecutor};
use crate::mock::{MockConfig, MockExecutor};
use crate::ssh::{SshConfig, SshExecutor};
use crate::ExecutorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Usable capacity of a prepared device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub size_kib: u64,
    pub extent_size_kib: u64,
}

/// A brick to carve out of the volume group prepared for a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrickRequest {
    pub brick_id: String,
    /// Device id the volume group was created for.
    pub vg_id: String,
    pub size_kib: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrickInfo {
    pub path: String,
}

/// Brick address in the `host:path` form used by the storage daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrickLocation {
    pub host: String,
    pub path: String,
}

impl fmt::Display for BrickLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeRequest {
    pub name: String,
    pub replica: usize,
    pub bricks: Vec<BrickLocation>,
}

/// Operations run against one cluster member.
///
/// Every call blocks the calling thread until the remote work finishes or
/// fails. Implementations hold a per-host permit for the duration of each
/// call.
pub trait RemoteExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Introduce `new_host` to the trusted pool rooted at `exec_host`.
    fn peer_probe(&self, exec_host: &str, new_host: &str) -> Result<(), ExecutorError>;

    fn peer_detach(&self, exec_host: &str, target_host: &str) -> Result<(), ExecutorError>;

    /// Prepare a raw block device and report its usable capacity.
    fn device_setup(
        &self,
        host: &str,
        device: &str,
        vg_id: &str,
    ) -> Result<DeviceInfo, ExecutorError>;

    fn device_teardown(&self, host: &str, device: &str, vg_id: &str)
        -> Result<(), ExecutorError>;

    fn brick_create(&self, host: &str, brick: &BrickRequest) -> Result<BrickInfo, ExecutorError>;

    fn brick_destroy(&self, host: &str, brick: &BrickRequest) -> Result<(), ExecutorError>;

    fn volume_create(&self, host: &str, volume: &VolumeRequest) -> Result<(), ExecutorError>;

    /// Add `volume.bricks` to an existing volume.
    fn volume_expand(&self, host: &str, volume: &VolumeRequest) -> Result<(), ExecutorError>;

    fn volume_destroy(&self, host: &str, name: &str) -> Result<(), ExecutorError>;

    /// Run `commands` in order on `host`, returning each command's stdout.
    /// Stops at the first failing command.
    fn remote_command_execute(
        &self,
        host: &str,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, ExecutorError>;
}

/// Executor selection and backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// One of `ssh`, `kube`, `mock`.
    pub backend: String,
    pub ssh: SshConfig,
    pub kube: KubeConfig,
    pub mock: MockConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backend: "mock".to_owned(),
            ssh: SshConfig::default(),
            kube: KubeConfig::default(),
            mock: MockConfig::default(),
        }
    }
}

/// Build the single executor backend this process will use.
pub fn select_executor(config: &ExecutorConfig) -> Result<Box<dyn RemoteExecutor>, ExecutorError> {
    match config.backend.as_str() {
        "ssh" => Ok(Box::new(SshExecutor::new(config.ssh.clone())?)),
        "kube" | "kubernetes" => Ok(Box::new(KubeExecutor::new(config.kube.clone())?)),
        "mock" => Ok(Box::new(MockExecutor::with_config(&config.mock))),
        other => Err(ExecutorError::Unavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_mock_and_ssh() {
        let mut config = ExecutorConfig::default();
        assert_eq!(select_executor(&config).unwrap().name(), "mock");

        config.backend = "ssh".to_owned();
        assert_eq!(select_executor(&config).unwrap().name(), "ssh");
    }

    #[test]
    fn select_kube_with_namespace() {
        let mut config = ExecutorConfig {
            backend: "kube".to_owned(),
            ..ExecutorConfig::default()
        };
        config.kube.namespace = "storage".to_owned();
        assert_eq!(select_executor(&config).unwrap().name(), "kube");
    }

    #[test]
    fn select_unknown_backend_fails() {
        let config = ExecutorConfig {
            backend: "telnet".to_owned(),
            ..ExecutorConfig::default()
        };
        let err = select_executor(&config).err().unwrap();
        assert!(matches!(err, ExecutorError::Unavailable(ref b) if b == "telnet"));
    }

    #[test]
    fn brick_location_display() {
        let loc = BrickLocation {
            host: "10.0.0.1".to_owned(),
            path: "/bricks/b1/brick".to_owned(),
        };
        assert_eq!(loc.to_string(), "10.0.0.1:/bricks/b1/brick");
    }
}
