//! Storage command recipes shared by the SSH and Kubernetes backends.
//!
//! `StorageCommands` turns each capability into an ordered list of shell
//! commands and hands them to a `CommandRunner`, which decides how the
//! commands reach the host. Each capability is one runner call, so it holds
//! one host permit for its whole duration.

use crate::executor::{BrickInfo, BrickRequest, DeviceInfo, VolumeRequest};
use crate::ExecutorError;
use std::time::Duration;
use tracing::{debug, warn};

const MOUNT_ROOT: &str = "/var/lib/brickyard/mounts";
const MOUNT_OPTIONS: &str = "rw,inode64,noatime,nouuid";

/// Transport used by [`StorageCommands`].
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        host: &str,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, ExecutorError>;
}

pub fn brick_mount_dir(vg_id: &str, brick_id: &str) -> String {
    format!("{MOUNT_ROOT}/vg_{vg_id}/brick_{brick_id}")
}

fn brick_device(vg_id: &str, brick_id: &str) -> String {
    format!("/dev/mapper/vg_{vg_id}-brick_{brick_id}")
}

/// Maintains brick mount entries in the host's fstab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fstab {
    path: String,
}

impl Default for Fstab {
    fn default() -> Self {
        Self::new("/etc/fstab")
    }
}

impl Fstab {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn add_entry(&self, device: &str, mount_dir: &str) -> String {
        format!(
            "echo \"{device} {mount_dir} xfs {MOUNT_OPTIONS} 1 2\" >> {}",
            self.path
        )
    }

    /// Entries are keyed by the brick's mount directory name.
    pub fn remove_entry(&self, brick_id: &str) -> String {
        format!("sed -i.save \"/brick_{brick_id}/d\" {}", self.path)
    }
}

/// Parse `vgdisplay -c` output into capacity figures.
///
/// Field 12 is the extent size in KiB and field 15 the free extent count.
fn parse_vgdisplay(host: &str, output: &str) -> Result<DeviceInfo, ExecutorError> {
    let parse_err = |detail: String| ExecutorError::Parse {
        host: host.to_owned(),
        detail,
    };
    let line = output.trim();
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 16 {
        return Err(parse_err(format!("vgdisplay returned {} fields", fields.len())));
    }
    let extent_size_kib: u64 = fields[12]
        .trim()
        .parse()
        .map_err(|_| parse_err(format!("bad extent size '{}'", fields[12])))?;
    let free_extents: u64 = fields[15]
        .trim()
        .parse()
        .map_err(|_| parse_err(format!("bad free extent count '{}'", fields[15])))?;
    Ok(DeviceInfo {
        size_kib: free_extents * extent_size_kib,
        extent_size_kib,
    })
}

/// Thin pool metadata: 0.5% of the pool, at least 2 MiB, at most 16 GiB.
fn pool_metadata_kib(size_kib: u64) -> u64 {
    (size_kib / 200).clamp(2 * 1024, 16 * 1024 * 1024)
}

fn gluster(args: &str) -> String {
    format!("gluster --mode=script {args}")
}

#[derive(Debug, Clone)]
pub struct StorageCommands {
    fstab: Fstab,
    snapshot_limit: u32,
    rebalance_on_expansion: bool,
    timeout: Duration,
}

impl StorageCommands {
    pub fn new(
        fstab: Fstab,
        snapshot_limit: u32,
        rebalance_on_expansion: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            fstab,
            snapshot_limit,
            rebalance_on_expansion,
            timeout,
        }
    }

    pub fn fstab(&self) -> &Fstab {
        &self.fstab
    }

    pub fn peer_probe(
        &self,
        runner: &dyn CommandRunner,
        exec_host: &str,
        new_host: &str,
    ) -> Result<(), ExecutorError> {
        let mut commands = vec![gluster(&format!("peer probe {new_host}"))];
        if self.snapshot_limit > 0 {
            commands.push(gluster(&format!(
                "snapshot config snap-max-hard-limit {}",
                self.snapshot_limit
            )));
        }
        runner.run(exec_host, &commands, self.timeout)?;
        Ok(())
    }

    pub fn peer_detach(
        &self,
        runner: &dyn CommandRunner,
        exec_host: &str,
        target_host: &str,
    ) -> Result<(), ExecutorError> {
        let commands = vec![gluster(&format!("peer detach {target_host}"))];
        runner.run(exec_host, &commands, self.timeout)?;
        Ok(())
    }

    pub fn device_setup(
        &self,
        runner: &dyn CommandRunner,
        host: &str,
        device: &str,
        vg_id: &str,
    ) -> Result<DeviceInfo, ExecutorError> {
        let commands = vec![
            format!("pvcreate --metadatasize=128M --dataalignment=256K {device}"),
            format!("vgcreate vg_{vg_id} {device}"),
            format!("vgdisplay -c vg_{vg_id}"),
        ];
        let output = runner.run(host, &commands, self.timeout)?;
        let raw = output.last().map_or("", String::as_str);
        match parse_vgdisplay(host, raw) {
            Ok(info) => {
                debug!("device {device} on {host}: {} KiB usable", info.size_kib);
                Ok(info)
            }
            Err(e) => {
                if let Err(undo) = self.device_teardown(runner, host, device, vg_id) {
                    warn!("cleanup of {device} on {host} failed: {undo}");
                }
                Err(e)
            }
        }
    }

    pub fn device_teardown(
        &self,
        runner: &dyn CommandRunner,
        host: &str,
        device: &str,
        vg_id: &str,
    ) -> Result<(), ExecutorError> {
        let commands = vec![format!("vgremove vg_{vg_id}"), format!("pvremove {device}")];
        runner.run(host, &commands, self.timeout)?;
        Ok(())
    }

    pub fn brick_create(
        &self,
        runner: &dyn CommandRunner,
        host: &str,
        brick: &BrickRequest,
    ) -> Result<BrickInfo, ExecutorError> {
        let id = &brick.brick_id;
        let vg = &brick.vg_id;
        let mount_dir = brick_mount_dir(vg, id);
        let device = brick_device(vg, id);
        let size = brick.size_kib;

        let commands = vec![
            format!("mkdir -p {mount_dir}"),
            format!(
                "lvcreate --poolmetadatasize {}K -c 256K -L {size}K -T vg_{vg}/tp_{id} -V {size}K -n brick_{id}",
                pool_metadata_kib(size)
            ),
            format!("mkfs.xfs -i size=512 -n size=8192 {device}"),
            self.fstab.add_entry(&device, &mount_dir),
            format!("mount -o {MOUNT_OPTIONS} {device} {mount_dir}"),
            format!("mkdir {mount_dir}/brick"),
        ];
        runner.run(host, &commands, self.timeout)?;
        Ok(BrickInfo {
            path: format!("{mount_dir}/brick"),
        })
    }

    pub fn brick_destroy(
        &self,
        runner: &dyn CommandRunner,
        host: &str,
        brick: &BrickRequest,
    ) -> Result<(), ExecutorError> {
        let id = &brick.brick_id;
        let mount_dir = brick_mount_dir(&brick.vg_id, id);
        let commands = vec![
            format!("umount {mount_dir}"),
            format!("lvremove -f vg_{}/tp_{id}", brick.vg_id),
            format!("rmdir {mount_dir}"),
            self.fstab.remove_entry(id),
        ];
        runner.run(host, &commands, self.timeout)?;
        Ok(())
    }

    fn brick_list(volume: &VolumeRequest) -> String {
        let bricks: Vec<String> = volume.bricks.iter().map(ToString::to_string).collect();
        let layout = if volume.replica > 1 {
            format!("replica {} ", volume.replica)
        } else {
            String::new()
        };
        format!("{layout}{}", bricks.join(" "))
    }

    pub fn volume_create(
        &self,
        runner: &dyn CommandRunner,
        host: &str,
        volume: &VolumeRequest,
    ) -> Result<(), ExecutorError> {
        let commands = vec![
            gluster(&format!(
                "volume create {} {}",
                volume.name,
                Self::brick_list(volume)
            )),
            gluster(&format!("volume start {}", volume.name)),
        ];
        runner.run(host, &commands, self.timeout)?;
        Ok(())
    }

    pub fn volume_expand(
        &self,
        runner: &dyn CommandRunner,
        host: &str,
        volume: &VolumeRequest,
    ) -> Result<(), ExecutorError> {
        let mut commands = vec![gluster(&format!(
            "volume add-brick {} {}",
            volume.name,
            Self::brick_list(volume)
        ))];
        if self.rebalance_on_expansion {
            commands.push(gluster(&format!("volume rebalance {} start", volume.name)));
        }
        runner.run(host, &commands, self.timeout)?;
        Ok(())
    }

    pub fn volume_destroy(
        &self,
        runner: &dyn CommandRunner,
        host: &str,
        name: &str,
    ) -> Result<(), ExecutorError> {
        let commands = vec![
            gluster(&format!("volume stop {name} force")),
            gluster(&format!("volume delete {name}")),
        ];
        runner.run(host, &commands, self.timeout)?;
        Ok(())
    }
}
