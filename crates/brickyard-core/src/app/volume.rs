use super::{compensate, edit, App, KIB_PER_GIB};
use crate::api::{VolumeCreateRequest, VolumeExpandRequest};
use crate::entries::{BrickEntry, ClusterEntry, DeviceEntry, NodeEntry, VolumeEntry};
use crate::lifecycle::{EntryState, Lifecycle};
use crate::operations::ScheduledOperation;
use crate::placement::{BrickPlacer, Candidate};
use crate::CoreError;
use brickyard_executor::{BrickLocation, BrickRequest, RemoteExecutor, VolumeRequest};
use brickyard_store::{Tx, VolumeId, WriteTx};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A brick record together with the hosts it is reached through.
#[derive(Debug, Clone)]
struct PlannedBrick {
    entry: BrickEntry,
    manage: String,
    storage: String,
}

impl PlannedBrick {
    fn request(&self) -> BrickRequest {
        BrickRequest {
            brick_id: self.entry.id.to_string(),
            vg_id: self.entry.device.to_string(),
            size_kib: self.entry.size_kib,
        }
    }

    fn location(&self) -> BrickLocation {
        BrickLocation {
            host: self.storage.clone(),
            path: self.entry.path.clone(),
        }
    }
}

fn volume_request(volume: &VolumeEntry, bricks: &[PlannedBrick]) -> VolumeRequest {
    VolumeRequest {
        name: volume.name.clone(),
        replica: volume.replica,
        bricks: bricks.iter().map(PlannedBrick::location).collect(),
    }
}

fn is_usable(state: EntryState) -> bool {
    matches!(state, EntryState::Ready | EntryState::Modifying)
}

/// Devices of a cluster that may receive new bricks.
fn cluster_candidates(tx: &impl Tx, cluster: &ClusterEntry) -> Result<Vec<Candidate>, CoreError> {
    let mut out = Vec::new();
    for node_id in &cluster.nodes {
        let node: NodeEntry = tx.get(node_id)?;
        if !is_usable(node.state()) || !node.health.accepts_allocations() {
            continue;
        }
        for device_id in &node.devices {
            let device: DeviceEntry = tx.get(device_id)?;
            if is_usable(device.state()) && device.health.accepts_allocations() {
                out.push(Candidate {
                    node: node.id.clone(),
                    device: device.id.clone(),
                    zone: node.zone,
                    free_kib: device.storage.free,
                });
            }
        }
    }
    Ok(out)
}

/// Reserve space for one replica set and record its bricks as `creating`.
fn allocate_bricks(
    tx: &mut WriteTx<'_>,
    volume: &VolumeId,
    chosen: &[Candidate],
    size_kib: u64,
) -> Result<Vec<PlannedBrick>, CoreError> {
    let mut planned = Vec::with_capacity(chosen.len());
    for c in chosen {
        let entry = BrickEntry::new(c.node.clone(), c.device.clone(), volume.clone(), size_kib);
        edit::<DeviceEntry>(tx, &c.device, |d| {
            if !d.allocate(entry.id.clone(), size_kib) {
                return Err(CoreError::NoSpace(format!(
                    "device {} cannot hold {size_kib} KiB",
                    d.id
                )));
            }
            d.set_state(EntryState::Modifying)
        })?;
        tx.put(&entry)?;
        let node: NodeEntry = tx.get(&c.node)?;
        planned.push(PlannedBrick {
            entry,
            manage: node.manage_host().to_owned(),
            storage: node.storage_host().to_owned(),
        });
    }
    Ok(planned)
}

/// Return reserved space and drop the brick records.
fn release_bricks(tx: &mut WriteTx<'_>, bricks: &[PlannedBrick]) -> Result<(), CoreError> {
    for b in bricks {
        edit::<DeviceEntry>(tx, &b.entry.device, |d| {
            d.release(&b.entry.id, b.entry.size_kib);
            if d.state() == EntryState::Modifying {
                d.set_state(EntryState::Ready)?;
            }
            Ok(())
        })?;
        tx.delete::<BrickEntry>(&b.entry.id)?;
    }
    Ok(())
}

/// Mark created bricks and their devices ready.
fn commit_bricks(tx: &mut WriteTx<'_>, bricks: &[PlannedBrick]) -> Result<(), CoreError> {
    for b in bricks {
        let mut entry = b.entry.clone();
        entry.set_state(EntryState::Ready)?;
        tx.put(&entry)?;
        edit::<DeviceEntry>(tx, &entry.device, |d| d.set_state(EntryState::Ready))?;
    }
    Ok(())
}

/// Create every brick, undoing the ones already made if any fails.
fn create_bricks(
    executor: &dyn RemoteExecutor,
    bricks: &mut [PlannedBrick],
) -> Result<(), CoreError> {
    let mut created = 0;
    let mut failure = None;
    for b in bricks.iter_mut() {
        match executor.brick_create(&b.manage, &b.request()) {
            Ok(info) => {
                b.entry.path = info.path;
                created += 1;
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    match failure {
        Some(e) => {
            destroy_bricks(executor, &bricks[..created]);
            Err(e.into())
        }
        None => Ok(()),
    }
}

/// Best effort; failures are logged.
fn destroy_bricks(executor: &dyn RemoteExecutor, bricks: &[PlannedBrick]) {
    for b in bricks {
        if let Err(e) = executor.brick_destroy(&b.manage, &b.request()) {
            warn!("could not destroy brick {} on {}: {e}", b.entry.id, b.manage);
        }
    }
}

/// Drop a volume that never became ready together with its reservations.
fn forget_volume(
    tx: &mut WriteTx<'_>,
    volume: &VolumeEntry,
    bricks: &[PlannedBrick],
) -> Result<(), CoreError> {
    release_bricks(tx, bricks)?;
    edit::<ClusterEntry>(tx, &volume.cluster, |c| {
        c.remove_volume(&volume.id);
        Ok(())
    })?;
    tx.delete::<VolumeEntry>(&volume.id)?;
    Ok(())
}

/// Return the reservations of an abandoned expansion.
fn abandon_expansion(
    tx: &mut WriteTx<'_>,
    volume: &VolumeId,
    bricks: &[PlannedBrick],
) -> Result<(), CoreError> {
    release_bricks(tx, bricks)?;
    if tx.exists::<VolumeEntry>(volume)? {
        edit::<VolumeEntry>(tx, volume, |v| v.set_state(EntryState::Ready))?;
    }
    Ok(())
}

fn planned_from_records(tx: &impl Tx, volume: &VolumeEntry) -> Result<Vec<PlannedBrick>, CoreError> {
    let mut planned = Vec::with_capacity(volume.bricks.len());
    for id in &volume.bricks {
        let entry: BrickEntry = tx.get(id)?;
        let node: NodeEntry = tx.get(&entry.node)?;
        planned.push(PlannedBrick {
            manage: node.manage_host().to_owned(),
            storage: node.storage_host().to_owned(),
            entry,
        });
    }
    Ok(planned)
}

fn place_in_cluster(
    tx: &impl Tx,
    placer: &dyn BrickPlacer,
    cluster: &ClusterEntry,
    replica: usize,
    size_kib: u64,
) -> Result<Vec<Candidate>, CoreError> {
    let candidates = cluster_candidates(tx, cluster)?;
    debug!(
        "placing {replica} bricks of {size_kib} KiB among {} devices of cluster {}",
        candidates.len(),
        cluster.id
    );
    placer.place(&candidates, replica, size_kib)
}

impl App {
    /// Reserve space for a new volume and build it in the background.
    ///
    /// Clusters are tried in id order unless the request names one. On any
    /// remote failure the bricks already made are destroyed and every
    /// reservation is returned.
    pub fn volume_create(&self, req: &VolumeCreateRequest) -> Result<ScheduledOperation, CoreError> {
        req.validate()?;
        let replica = req.replica();
        let brick_size = req.size_gib * KIB_PER_GIB;

        let (volume, mut bricks) = self.db.update(|tx| {
            if let Some(name) = &req.name {
                if tx.list::<VolumeEntry>()?.iter().any(|v| v.name == *name) {
                    return Err(CoreError::Conflict(format!("volume name {name} is taken")));
                }
            }
            let clusters: Vec<ClusterEntry> = match &req.cluster {
                Some(id) => vec![tx.get(id)?],
                None => tx.list()?,
            };

            let mut last_err = CoreError::NoSpace("no clusters defined".to_owned());
            for mut cluster in clusters {
                let chosen =
                    match place_in_cluster(&*tx, self.placer.as_ref(), &cluster, replica, brick_size) {
                        Ok(chosen) => chosen,
                        Err(e) => {
                            last_err = e;
                            continue;
                        }
                    };
                let mut volume =
                    VolumeEntry::new(cluster.id.clone(), req.name.clone(), req.size_gib, replica);
                let bricks = allocate_bricks(tx, &volume.id, &chosen, brick_size)?;
                for b in &bricks {
                    volume.add_brick(b.entry.id.clone());
                }
                cluster.add_volume(volume.id.clone());
                tx.put(&cluster)?;
                tx.put(&volume)?;
                return Ok((volume, bricks));
            }
            Err(last_err)
        })?;
        info!(
            "volume {} ({}) reserved {} bricks in cluster {}",
            volume.id,
            volume.name,
            bricks.len(),
            volume.cluster
        );

        let db = Arc::clone(&self.db);
        let executor = Arc::clone(&self.executor);

        Ok(self.operations.schedule(move || {
            let built = create_bricks(executor.as_ref(), &mut bricks).and_then(|()| {
                let request = volume_request(&volume, &bricks);
                executor
                    .volume_create(&bricks[0].manage, &request)
                    .map_err(|e| {
                        destroy_bricks(executor.as_ref(), &bricks);
                        CoreError::from(e)
                    })
            });
            if let Err(e) = built {
                compensate(&db, "volume create", |tx| forget_volume(tx, &volume, &bricks));
                return Err(e);
            }

            let committed = db.update(|tx| {
                commit_bricks(tx, &bricks)?;
                edit::<VolumeEntry>(tx, &volume.id, |v| v.set_state(EntryState::Ready))?;
                Ok::<_, CoreError>(())
            });
            if let Err(e) = committed {
                if let Err(destroy) = executor.volume_destroy(&bricks[0].manage, &volume.name) {
                    warn!("could not destroy volume {} after failed create: {destroy}", volume.name);
                }
                destroy_bricks(executor.as_ref(), &bricks);
                compensate(&db, "volume create", |tx| forget_volume(tx, &volume, &bricks));
                return Err(e);
            }
            info!("volume {} created", volume.id);
            Ok(Some(format!("/volumes/{}", volume.id)))
        }))
    }

    /// Grow a volume by one more replica set of `expand_size_gib`.
    ///
    /// Only a ready volume can be expanded, so expansions never overlap with
    /// each other or with a delete.
    pub fn volume_expand(
        &self,
        id: &str,
        req: &VolumeExpandRequest,
    ) -> Result<ScheduledOperation, CoreError> {
        req.validate()?;
        let expand_gib = req.expand_size_gib;
        let brick_size = expand_gib * KIB_PER_GIB;

        let (volume, mut bricks) = self.db.update(|tx| {
            let volume = edit::<VolumeEntry>(tx, id, |v| {
                if !v.lifecycle.is_ready() {
                    return Err(CoreError::Conflict(format!(
                        "volume {id} is {} and cannot be expanded",
                        v.state()
                    )));
                }
                v.set_state(EntryState::Modifying)
            })?;
            let cluster: ClusterEntry = tx.get(&volume.cluster)?;
            let chosen =
                place_in_cluster(&*tx, self.placer.as_ref(), &cluster, volume.replica, brick_size)?;
            let bricks = allocate_bricks(tx, &volume.id, &chosen, brick_size)?;
            Ok::<_, CoreError>((volume, bricks))
        })?;

        let db = Arc::clone(&self.db);
        let executor = Arc::clone(&self.executor);
        let host = bricks.first().map(|b| b.manage.clone()).unwrap_or_default();

        Ok(self.operations.schedule(move || {
            let built = create_bricks(executor.as_ref(), &mut bricks).and_then(|()| {
                executor
                    .volume_expand(&host, &volume_request(&volume, &bricks))
                    .map_err(|e| {
                        destroy_bricks(executor.as_ref(), &bricks);
                        CoreError::from(e)
                    })
            });
            if let Err(e) = built {
                compensate(&db, "volume expand", |tx| {
                    abandon_expansion(tx, &volume.id, &bricks)
                });
                return Err(e);
            }

            let committed = db.update(|tx| {
                commit_bricks(tx, &bricks)?;
                edit::<VolumeEntry>(tx, &volume.id, |v| {
                    for b in &bricks {
                        v.add_brick(b.entry.id.clone());
                    }
                    v.size_gib += expand_gib;
                    v.set_state(EntryState::Ready)
                })?;
                Ok::<_, CoreError>(())
            });
            if let Err(e) = committed {
                destroy_bricks(executor.as_ref(), &bricks);
                compensate(&db, "volume expand", |tx| {
                    abandon_expansion(tx, &volume.id, &bricks)
                });
                return Err(e);
            }
            info!("volume {} expanded by {expand_gib} GiB", volume.id);
            Ok(Some(format!("/volumes/{}", volume.id)))
        }))
    }

    pub fn volume_info(&self, id: &str) -> Result<VolumeEntry, CoreError> {
        self.db.view(|tx| Ok(tx.get(id)?))
    }

    pub fn volume_list(&self) -> Result<Vec<VolumeId>, CoreError> {
        let ids = self.db.view(|tx| tx.ids::<VolumeEntry>())?;
        Ok(ids.into_iter().map(VolumeId::from).collect())
    }

    /// Bricks of a volume, in the order they were added.
    pub fn volume_bricks(&self, id: &str) -> Result<Vec<BrickEntry>, CoreError> {
        self.db.view(|tx| {
            let volume: VolumeEntry = tx.get(id)?;
            volume
                .bricks
                .iter()
                .map(|b| tx.get::<BrickEntry>(b).map_err(CoreError::from))
                .collect()
        })
    }

    /// Stop and remove a volume, then free its bricks.
    ///
    /// Once the storage daemon has dropped the volume the records are removed
    /// even if some bricks could not be cleaned up on their nodes.
    pub fn volume_delete(&self, id: &str) -> Result<ScheduledOperation, CoreError> {
        let (volume, bricks) = self.db.update(|tx| {
            let volume = edit::<VolumeEntry>(tx, id, |v| v.set_state(EntryState::Deleting))?;
            let bricks = planned_from_records(&*tx, &volume)?;
            Ok::<_, CoreError>((volume, bricks))
        })?;

        let db = Arc::clone(&self.db);
        let executor = Arc::clone(&self.executor);

        Ok(self.operations.schedule(move || {
            if let Some(first) = bricks.first() {
                if let Err(e) = executor.volume_destroy(&first.manage, &volume.name) {
                    compensate(&db, "volume delete", |tx| {
                        edit::<VolumeEntry>(tx, &volume.id, |v| v.set_state(EntryState::Ready))?;
                        Ok(())
                    });
                    return Err(e.into());
                }
            }
            destroy_bricks(executor.as_ref(), &bricks);

            let committed = db.update(|tx| {
                for b in &bricks {
                    edit::<DeviceEntry>(tx, &b.entry.device, |d| {
                        d.release(&b.entry.id, b.entry.size_kib);
                        Ok(())
                    })?;
                    tx.delete::<BrickEntry>(&b.entry.id)?;
                }
                edit::<ClusterEntry>(tx, &volume.cluster, |c| {
                    c.remove_volume(&volume.id);
                    Ok(())
                })?;
                tx.delete::<VolumeEntry>(&volume.id)?;
                Ok::<_, CoreError>(())
            });
            if let Err(e) = committed {
                warn!("volume {} was destroyed but its records remain", volume.id);
                compensate(&db, "volume delete", |tx| {
                    edit::<VolumeEntry>(tx, &volume.id, |v| v.set_state(EntryState::Ready))?;
                    Ok(())
                });
                return Err(e);
            }
            info!("volume {} deleted", volume.id);
            Ok(None)
        }))
    }
}
