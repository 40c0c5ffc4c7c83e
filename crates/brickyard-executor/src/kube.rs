//! Kubernetes backend: commands run inside the storage pod of each host.
//!
//! Pod lookup and exec go through the [`ClusterApi`] trait. The default
//! implementation shells out to `kubectl`; tests supply their own.

use crate::executor::{BrickInfo, BrickRequest, DeviceInfo, RemoteExecutor, VolumeRequest};
use crate::process::run_with_timeout;
use crate::storage::{CommandRunner, Fstab, StorageCommands};
use crate::throttle::HostGate;
use crate::ExecutorError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Label carried by every storage pod.
pub const POD_LABEL_KEY: &str = "glusterfs-node";
const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KubeConfig {
    pub namespace: String,
    /// Read when `namespace` is empty after environment overrides.
    pub namespace_file: PathBuf,
    pub kubectl: String,
    pub fstab: String,
    pub snapshot_limit: u32,
    pub rebalance_on_expansion: bool,
    /// Storage pods are managed by a daemonset; match them by node name.
    pub daemonset: bool,
    /// Hosts are literal pod names.
    pub use_pod_names: bool,
    pub command_timeout_secs: u64,
    pub max_connections_per_host: usize,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            namespace_file: PathBuf::from(SERVICE_ACCOUNT_NAMESPACE),
            kubectl: "kubectl".to_owned(),
            fstab: "/var/lib/brickyard/fstab".to_owned(),
            snapshot_limit: 14,
            rebalance_on_expansion: false,
            daemonset: false,
            use_pod_names: false,
            command_timeout_secs: 600,
            max_connections_per_host: 1,
        }
    }
}

/// `y`/`1` is true, `n`/`0` is false, anything else leaves the default.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().chars().next() {
        Some('y' | '1') => Some(true),
        Some('n' | '0') => Some(false),
        _ => None,
    }
}

impl KubeConfig {
    /// Apply `BRICKYARD_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(ns) = get("BRICKYARD_KUBE_NAMESPACE") {
            self.namespace = ns;
        }
        if let Some(fstab) = get("BRICKYARD_FSTAB") {
            self.fstab = fstab;
        }
        if let Some(limit) = get("BRICKYARD_SNAPSHOT_LIMIT") {
            match limit.trim().parse() {
                Ok(n) => self.snapshot_limit = n,
                Err(_) => warn!("ignoring non-numeric BRICKYARD_SNAPSHOT_LIMIT '{limit}'"),
            }
        }
        if let Some(flag) = get("BRICKYARD_KUBE_DAEMONSET").as_deref().and_then(parse_flag) {
            self.daemonset = flag;
        }
        if let Some(flag) = get("BRICKYARD_KUBE_USE_POD_NAMES")
            .as_deref()
            .and_then(parse_flag)
        {
            self.use_pod_names = flag;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub node_name: Option<String>,
}

/// Access to the container orchestrator.
pub trait ClusterApi: Send + Sync {
    fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>, ExecutorError>;

    /// Run one shell command in `pod` and return its stdout.
    fn exec(
        &self,
        namespace: &str,
        pod: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ExecutorError>;
}

pub struct KubectlApi {
    kubectl: String,
}

impl KubectlApi {
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }

    fn parse_pod_list(raw: &[u8]) -> Result<Vec<PodInfo>, ExecutorError> {
        let doc: serde_json::Value = serde_json::from_slice(raw).map_err(|e| {
            ExecutorError::Parse {
                host: "kubectl".to_owned(),
                detail: e.to_string(),
            }
        })?;
        let items = doc["items"].as_array().cloned().unwrap_or_default();
        Ok(items
            .iter()
            .filter_map(|item| {
                let name = item["metadata"]["name"].as_str()?.to_owned();
                let node_name = item["spec"]["nodeName"].as_str().map(str::to_owned);
                Some(PodInfo { name, node_name })
            })
            .collect())
    }
}

impl ClusterApi for KubectlApi {
    fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>, ExecutorError> {
        let mut cmd = Command::new(&self.kubectl);
        cmd.args(["get", "pods", "-n", namespace, "-l", selector, "-o", "json"]);
        let output = run_with_timeout(cmd, Duration::from_secs(60))?.ok_or_else(|| {
            ExecutorError::Timeout {
                host: namespace.to_owned(),
                command: format!("get pods -l {selector}"),
                timeout: Duration::from_secs(60),
            }
        })?;
        if !output.status.success() {
            return Err(ExecutorError::CommandFailed {
                host: namespace.to_owned(),
                command: format!("get pods -l {selector}"),
                output: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Self::parse_pod_list(&output.stdout)
    }

    fn exec(
        &self,
        namespace: &str,
        pod: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ExecutorError> {
        let mut cmd = Command::new(&self.kubectl);
        cmd.args(["exec", "-n", namespace, pod, "--", "/bin/bash", "-c", command]);
        let output = run_with_timeout(cmd, timeout)?.ok_or_else(|| ExecutorError::Timeout {
            host: pod.to_owned(),
            command: command.to_owned(),
            timeout,
        })?;
        if !output.status.success() {
            return Err(ExecutorError::CommandFailed {
                host: pod.to_owned(),
                command: command.to_owned(),
                output: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub struct KubeExecutor {
    config: KubeConfig,
    api: Box<dyn ClusterApi>,
    gate: HostGate,
    storage: StorageCommands,
}

impl KubeExecutor {
    /// Build from configuration, process environment and `kubectl`.
    pub fn new(config: KubeConfig) -> Result<Self, ExecutorError> {
        let api = Box::new(KubectlApi::new(config.kubectl.clone()));
        Self::with_api(config, api, |key| std::env::var(key).ok())
    }

    pub fn with_api(
        mut config: KubeConfig,
        api: Box<dyn ClusterApi>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ExecutorError> {
        config.apply_env(env);

        if config.namespace.is_empty() {
            config.namespace = std::fs::read_to_string(&config.namespace_file)
                .map_err(|e| {
                    ExecutorError::Config(format!(
                        "namespace must be provided in configuration ({}: {e})",
                        config.namespace_file.display()
                    ))
                })?
                .trim()
                .to_owned();
            if config.namespace.is_empty() {
                return Err(ExecutorError::Config(format!(
                    "namespace file {} is empty",
                    config.namespace_file.display()
                )));
            }
        }
        if config.fstab.is_empty() {
            config.fstab = Fstab::default().path().to_owned();
        }
        if config.rebalance_on_expansion {
            warn!("rebalance on volume expansion is enabled");
        }

        let storage = StorageCommands::new(
            Fstab::new(config.fstab.clone()),
            config.snapshot_limit,
            config.rebalance_on_expansion,
            Duration::from_secs(config.command_timeout_secs),
        );
        Ok(Self {
            gate: HostGate::new(config.max_connections_per_host),
            api,
            storage,
            config,
        })
    }

    pub fn config(&self) -> &KubeConfig {
        &self.config
    }

    fn exactly_one(host: &str, mut pods: Vec<String>) -> Result<String, ExecutorError> {
        match pods.len() {
            0 => {
                error!("no storage pod found for {host}");
                Err(ExecutorError::HostNotFound(host.to_owned()))
            }
            1 => Ok(pods.remove(0)),
            count => {
                error!("{count} storage pods match {host}");
                Err(ExecutorError::AmbiguousHost {
                    host: host.to_owned(),
                    count,
                })
            }
        }
    }

    /// Resolve a logical host to exactly one pod.
    pub fn resolve_pod(&self, host: &str) -> Result<String, ExecutorError> {
        if self.config.use_pod_names {
            return Ok(host.to_owned());
        }
        let ns = &self.config.namespace;
        if self.config.daemonset {
            let pods = self.api.list_pods(ns, POD_LABEL_KEY)?;
            let names = pods
                .into_iter()
                .filter(|p| p.node_name.as_deref() == Some(host))
                .map(|p| p.name)
                .collect();
            Self::exactly_one(host, names)
        } else {
            let pods = self
                .api
                .list_pods(ns, &format!("{POD_LABEL_KEY}=={host}"))?;
            Self::exactly_one(host, pods.into_iter().map(|p| p.name).collect())
        }
    }
}

impl CommandRunner for KubeExecutor {
    fn run(
        &self,
        host: &str,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, ExecutorError> {
        let _permit = self.gate.acquire(host);
        let deadline = Instant::now() + timeout;
        let pod = self.resolve_pod(host)?;

        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            let command = command.trim();
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| ExecutorError::Timeout {
                    host: host.to_owned(),
                    command: command.to_owned(),
                    timeout,
                })?;
            let out = self
                .api
                .exec(&self.config.namespace, &pod, command, remaining)
                .inspect_err(|e| error!("host {host} pod {pod}: command [{command}] failed: {e}"))?;
            debug!("host {host} pod {pod} command [{command}] ok");
            outputs.push(out);
        }
        Ok(outputs)
    }
}

impl RemoteExecutor for KubeExecutor {
    fn name(&self) -> &str {
        "kube"
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
