use crate::executor::{BrickInfo, BrickRequest, DeviceInfo, RemoteExecutor, VolumeRequest};
use crate::storage::brick_mount_dir;
use crate::throttle::HostGate;
use crate::ExecutorError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Capacity reported for every mock device, in KiB.
pub const MOCK_DEVICE_SIZE_KIB: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MockConfig {
    pub max_connections_per_host: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 1,
        }
    }
}

/// One recorded executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub op: &'static str,
    pub host: String,
    pub args: Vec<String>,
}

type HostPairFn = Arc<dyn Fn(&str, &str) -> Result<(), ExecutorError> + Send + Sync>;
type DeviceSetupFn = Arc<dyn Fn(&str, &str, &str) -> Result<DeviceInfo, ExecutorError> + Send + Sync>;
type DeviceFn = Arc<dyn Fn(&str, &str, &str) -> Result<(), ExecutorError> + Send + Sync>;
type BrickCreateFn = Arc<dyn Fn(&str, &BrickRequest) -> Result<BrickInfo, ExecutorError> + Send + Sync>;
type BrickFn = Arc<dyn Fn(&str, &BrickRequest) -> Result<(), ExecutorError> + Send + Sync>;
type VolumeFn = Arc<dyn Fn(&str, &VolumeRequest) -> Result<(), ExecutorError> + Send + Sync>;
type CommandFn = Arc<dyn Fn(&str, &[String]) -> Result<Vec<String>, ExecutorError> + Send + Sync>;

#[derive(Clone)]
struct Hooks {
    peer_probe: HostPairFn,
    peer_detach: HostPairFn,
    device_setup: DeviceSetupFn,
    device_teardown: DeviceFn,
    brick_create: BrickCreateFn,
    brick_destroy: BrickFn,
    volume_create: VolumeFn,
    volume_expand: VolumeFn,
    volume_destroy: HostPairFn,
    command: CommandFn,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            peer_probe: Arc::new(|_: &str, _: &str| Ok(())),
            peer_detach: Arc::new(|_: &str, _: &str| Ok(())),
            device_setup: Arc::new(|_: &str, _: &str, _: &str| {
                Ok(DeviceInfo {
                    size_kib: MOCK_DEVICE_SIZE_KIB,
                    extent_size_kib: 4096,
                })
            }),
            device_teardown: Arc::new(|_: &str, _: &str, _: &str| Ok(())),
            brick_create: Arc::new(|_: &str, brick: &BrickRequest| {
                Ok(BrickInfo {
                    path: format!("{}/brick", brick_mount_dir(&brick.vg_id, &brick.brick_id)),
                })
            }),
            brick_destroy: Arc::new(|_: &str, _: &BrickRequest| Ok(())),
            volume_create: Arc::new(|_: &str, _: &VolumeRequest| Ok(())),
            volume_expand: Arc::new(|_: &str, _: &VolumeRequest| Ok(())),
            volume_destroy: Arc::new(|_: &str, _: &str| Ok(())),
            command: Arc::new(|_: &str, commands: &[String]| {
                Ok(vec![String::new(); commands.len()])
            }),
        }
    }
}

/// In-process executor for tests and dry runs.
///
/// Every capability succeeds by default and can be replaced at any time with
/// a `set_*` call. Calls are recorded and pass through a per-host gate like
/// the real backends.
pub struct MockExecutor {
    hooks: RwLock<Hooks>,
    calls: Mutex<Vec<MockCall>>,
    gate: HostGate,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::with_config(&MockConfig::default())
    }
}

macro_rules! hook_setter {
    ($setter:ident, $field:ident, $ty:ty, ($($arg:ty),*) -> $ret:ty) => {
        pub fn $setter(&self, f: impl Fn($($arg),*) -> Result<$ret, ExecutorError> + Send + Sync + 'static) {
            let f: $ty = Arc::new(f);
            self.hooks
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .$field = f;
        }
    };
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &MockConfig) -> Self {
        Self {
            hooks: RwLock::new(Hooks::default()),
            calls: Mutex::new(Vec::new()),
            gate: HostGate::new(config.max_connections_per_host),
        }
    }

    hook_setter!(set_peer_probe, peer_probe, HostPairFn, (&str, &str) -> ());
    hook_setter!(set_peer_detach, peer_detach, HostPairFn, (&str, &str) -> ());
    hook_setter!(set_device_setup, device_setup, DeviceSetupFn, (&str, &str, &str) -> DeviceInfo);
    hook_setter!(set_device_teardown, device_teardown, DeviceFn, (&str, &str, &str) -> ());
    hook_setter!(set_brick_create, brick_create, BrickCreateFn, (&str, &BrickRequest) -> BrickInfo);
    hook_setter!(set_brick_destroy, brick_destroy, BrickFn, (&str, &BrickRequest) -> ());
    hook_setter!(set_volume_create, volume_create, VolumeFn, (&str, &VolumeRequest) -> ());
    hook_setter!(set_volume_expand, volume_expand, VolumeFn, (&str, &VolumeRequest) -> ());
    hook_setter!(set_volume_destroy, volume_destroy, HostPairFn, (&str, &str) -> ());
    hook_setter!(set_remote_command, command, CommandFn, (&str, &[String]) -> Vec<String>);

    pub fn gate(&self) -> &HostGate {
        &self.gate
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    fn hooks(&self) -> Hooks {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, op: &'static str, host: &str, args: &[&str]) {
        self.record_owned(op, host, args.iter().map(|a| (*a).to_owned()).collect());
    }

    fn record_owned(&self, op: &'static str, host: &str, args: Vec<String>) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockCall {
                op,
                host: host.to_owned(),
                args,
            });
    }
}

impl RemoteExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    fn peer_probe(&self, exec_host: &str, new_host: &str) -> Result<(), ExecutorError> {
        let _permit = self.gate.acquire(exec_host);
        self.record("peer_probe", exec_host, &[new_host]);
        (self.hooks().peer_probe)(exec_host, new_host)
    }

    fn peer_detach(&self, exec_host: &str, target_host: &str) -> Result<(), ExecutorError> {
        let _permit = self.gate.acquire(exec_host);
        self.record("peer_detach", exec_host, &[target_host]);
        (self.hooks().peer_detach)(exec_host, target_host)
    }

    fn device_setup(
        &self,
        host: &str,
        device: &str,
        vg_id: &str,
    ) -> Result<DeviceInfo, ExecutorError> {
        let _permit = self.gate.acquire(host);
        self.record("device_setup", host, &[device, vg_id]);
        (self.hooks().device_setup)(host, device, vg_id)
    }

    fn device_teardown(
        &self,
        host: &str,
        device: &str,
        vg_id: &str,
    ) -> Result<(), ExecutorError> {
        let _permit = self.gate.acquire(host);
        self.record("device_teardown", host, &[device, vg_id]);
        (self.hooks().device_teardown)(host, device, vg_id)
    }

    fn brick_create(&self, host: &str, brick: &BrickRequest) -> Result<BrickInfo, ExecutorError> {
        let _permit = self.gate.acquire(host);
        self.record("brick_create", host, &[&brick.brick_id, &brick.vg_id]);
        (self.hooks().brick_create)(host, brick)
    }

    fn brick_destroy(&self, host: &str, brick: &BrickRequest) -> Result<(), ExecutorError> {
        let _permit = self.gate.acquire(host);
        self.record("brick_destroy", host, &[&brick.brick_id, &brick.vg_id]);
        (self.hooks().brick_destroy)(host, brick)
    }

    fn volume_create(&self, host: &str, volume: &VolumeRequest) -> Result<(), ExecutorError> {
        let _permit = self.gate.acquire(host);
        let mut args = vec![volume.name.clone()];
        args.extend(volume.bricks.iter().map(ToString::to_string));
        self.record_owned("volume_create", host, args);
        (self.hooks().volume_create)(host, volume)
    }

    fn volume_expand(&self, host: &str, volume: &VolumeRequest) -> Result<(), ExecutorError> {
        let _permit = self.gate.acquire(host);
        let mut args = vec![volume.name.clone()];
        args.extend(volume.bricks.iter().map(ToString::to_string));
        self.record_owned("volume_expand", host, args);
        (self.hooks().volume_expand)(host, volume)
    }

    fn volume_destroy(&self, host: &str, name: &str) -> Result<(), ExecutorError> {
        let _permit = self.gate.acquire(host);
        self.record("volume_destroy", host, &[name]);
        (self.hooks().volume_destroy)(host, name)
    }

    fn remote_command_execute(
        &self,
        host: &str,
        commands: &[String],
        _timeout: Duration,
    ) -> Result<Vec<String>, ExecutorError> {
        let _permit = self.gate.acquire(host);
        let args: Vec<&str> = commands.iter().map(String::as_str).collect();
        self.record("remote_command_execute", host, &args);
        (self.hooks().command)(host, commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn defaults_succeed_with_fixed_capacity() {
        let m = MockExecutor::new();
        m.peer_probe("h1", "h2").unwrap();
        let info = m.device_setup("h1", "/dev/sdb", "d1").unwrap();
        assert_eq!(info.size_kib, MOCK_DEVICE_SIZE_KIB);
        let brick = m
            .brick_create(
                "h1",
                &BrickRequest {
                    brick_id: "b1".to_owned(),
                    vg_id: "d1".to_owned(),
                    size_kib: 1024,
                },
            )
            .unwrap();
        assert!(brick.path.ends_with("vg_d1/brick_b1/brick"));
    }

    #[test]
    fn overridden_hook_is_used_and_call_recorded() {
        let m = MockExecutor::new();
        m.set_peer_detach(|_, target| {
            Err(ExecutorError::CommandFailed {
                host: "h1".to_owned(),
                command: format!("peer detach {target}"),
                output: "peer not connected".to_owned(),
            })
        });
        let err = m.peer_detach("h1", "h9").unwrap_err();
        assert_eq!(err.output(), Some("peer not connected"));
        assert_eq!(
            m.calls(),
            vec![MockCall {
                op: "peer_detach",
                host: "h1".to_owned(),
                args: vec!["h9".to_owned()],
            }]
        );
    }

    #[test]
    fn command_hook_sees_commands() {
        let m = MockExecutor::new();
        m.set_remote_command(|host, cmds| Ok(cmds.iter().map(|c| format!("{host}:{c}")).collect()));
        let out = m
            .remote_command_execute("h1", &["ls".to_owned()], Duration::from_secs(1))
            .unwrap();
        assert_eq!(out, vec!["h1:ls"]);
        assert_eq!(m.count("remote_command_execute"), 1);
    }

    #[test]
    fn calls_are_throttled_per_host() {
        let m = Arc::new(MockExecutor::with_config(&MockConfig {
            max_connections_per_host: 2,
        }));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            m.set_peer_probe(move |_, _| {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(25));
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let m = Arc::clone(&m);
                thread::spawn(move || m.peer_probe("same-host", &format!("peer{i}")))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(m.count("peer_probe"), 6);
    }
}
