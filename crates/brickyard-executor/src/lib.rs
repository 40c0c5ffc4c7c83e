//! Remote execution layer for Brickyard.
//!
//! This crate defines the `RemoteExecutor` capability set used by background
//! operations to touch storage hosts, with three interchangeable backends:
//! direct SSH, Kubernetes pod exec, and an in-process mock. Every backend
//! throttles concurrent work per host through a `HostGate`. The SSH and
//! Kubernetes backends share the storage command recipes in `storage`.

pub mod executor;
pub mod kube;
pub mod mock;
pub mod process;
pub mod ssh;
pub mod storage;
pub mod throttle;

pub use executor::{
    select_executor, BrickInfo, BrickLocation, BrickRequest, DeviceInfo, ExecutorConfig,
    RemoteExecutor, VolumeRequest,
};
pub use kube::{ClusterApi, KubeConfig, KubeExecutor, KubectlApi, PodInfo};
pub use mock::{MockCall, MockConfig, MockExecutor, MOCK_DEVICE_SIZE_KIB};
pub use ssh::{SshConfig, SshExecutor};
pub use storage::{brick_mount_dir, CommandRunner, Fstab, StorageCommands};
pub use throttle::{HostGate, HostPermit};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no execution target found for host '{0}'")]
    HostNotFound(String),
    #[error("host '{host}' matched {count} execution targets")]
    AmbiguousHost { host: String, count: usize },
    #[error("command failed on {host}: {command}: {output}")]
    CommandFailed {
        host: String,
        command: String,
        output: String,
    },
    #[error("command timed out after {timeout:?} on {host}: {command}; remote state unknown")]
    Timeout {
        host: String,
        command: String,
        timeout: Duration,
    },
    #[error("unexpected output from {host}: {detail}")]
    Parse { host: String, detail: String },
    #[error("executor configuration error: {0}")]
    Config(String),
    #[error("executor backend '{0}' is not available")]
    Unavailable(String),
    #[error("executor failure: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Diagnostic output captured from the remote side, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            ExecutorError::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}
