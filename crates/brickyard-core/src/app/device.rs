use super::{compensate, edit, App};
use crate::api::DeviceAddRequest;
use crate::entries::{DeviceEntry, NodeEntry};
use crate::lifecycle::{EntryState, Lifecycle};
use crate::operations::ScheduledOperation;
use crate::CoreError;
use brickyard_store::{Tx, WriteTx};
use std::sync::Arc;
use tracing::{info, warn};

/// Drop a device that never became ready and release its node.
fn forget_device(tx: &mut WriteTx<'_>, device: &DeviceEntry) -> Result<(), CoreError> {
    tx.delete::<DeviceEntry>(&device.id)?;
    edit::<NodeEntry>(tx, &device.node, |n| {
        n.remove_device(&device.id);
        n.set_state(EntryState::Ready)
    })?;
    Ok(())
}

/// Put a device that was about to be deleted back into service.
fn restore_device(tx: &mut WriteTx<'_>, device: &DeviceEntry) -> Result<(), CoreError> {
    edit::<DeviceEntry>(tx, &device.id, |d| d.set_state(EntryState::Ready))?;
    edit::<NodeEntry>(tx, &device.node, |n| n.set_state(EntryState::Ready))?;
    Ok(())
}

impl App {
    /// Register a raw block device on a node and prepare it for bricks.
    ///
    /// The device is recorded as `creating` right away so a concurrent
    /// request cannot claim the same name. The node stays `modifying` until
    /// the setup has finished.
    pub fn device_add(&self, req: &DeviceAddRequest) -> Result<ScheduledOperation, CoreError> {
        req.validate()?;
        let (device, host) = self.db.update(|tx| {
            let node: NodeEntry = tx.get(&req.node)?;
            for id in &node.devices {
                let existing: DeviceEntry = tx.get(id)?;
                if existing.name == req.name {
                    return Err(CoreError::Conflict(format!(
                        "device {} already exists on node {}",
                        req.name, node.id
                    )));
                }
            }
            let device = DeviceEntry::new(node.id.clone(), req.name.clone());
            let node = edit::<NodeEntry>(tx, &req.node, |n| {
                n.set_state(EntryState::Modifying)?;
                n.add_device(device.id.clone());
                Ok(())
            })?;
            tx.put(&device)?;
            Ok::<_, CoreError>((device, node.manage_host().to_owned()))
        })?;

        let db = Arc::clone(&self.db);
        let executor = Arc::clone(&self.executor);

        Ok(self.operations.schedule(move || {
            let info = match executor.device_setup(&host, &device.name, &device.id) {
                Ok(info) => info,
                Err(e) => {
                    compensate(&db, "device add", |tx| forget_device(tx, &device));
                    return Err(e.into());
                }
            };

            let committed = db.update(|tx| {
                edit::<DeviceEntry>(tx, &device.id, |d| {
                    d.set_capacity(info.size_kib);
                    d.set_state(EntryState::Ready)
                })?;
                edit::<NodeEntry>(tx, &device.node, |n| n.set_state(EntryState::Ready))?;
                Ok::<_, CoreError>(())
            });

            if let Err(e) = committed {
                if let Err(teardown) = executor.device_teardown(&host, &device.name, &device.id) {
                    warn!("could not tear down {} after failed add: {teardown}", device.name);
                }
                compensate(&db, "device add", |tx| forget_device(tx, &device));
                return Err(e);
            }
            info!(
                "device {} ({}) ready with {} KiB",
                device.id, device.name, info.size_kib
            );
            Ok(Some(format!("/devices/{}", device.id)))
        }))
    }

    pub fn device_info(&self, id: &str) -> Result<DeviceEntry, CoreError> {
        self.db.view(|tx| Ok(tx.get(id)?))
    }

    /// Tear down a device that holds no bricks and remove it from its node.
    pub fn device_delete(&self, id: &str) -> Result<ScheduledOperation, CoreError> {
        let (device, host) = self.db.update(|tx| {
            let device = edit::<DeviceEntry>(tx, id, |d| {
                if !d.is_delete_ok() {
                    return Err(CoreError::Conflict(format!(
                        "device {id} still holds {} bricks",
                        d.bricks.len()
                    )));
                }
                d.set_state(EntryState::Deleting)
            })?;
            let node = edit::<NodeEntry>(tx, &device.node, |n| n.set_state(EntryState::Modifying))?;
            Ok::<_, CoreError>((device, node.manage_host().to_owned()))
        })?;

        let db = Arc::clone(&self.db);
        let executor = Arc::clone(&self.executor);

        Ok(self.operations.schedule(move || {
            if let Err(e) = executor.device_teardown(&host, &device.name, &device.id) {
                compensate(&db, "device delete", |tx| restore_device(tx, &device));
                return Err(e.into());
            }

            let committed = db.update(|tx| {
                edit::<NodeEntry>(tx, &device.node, |n| {
                    n.remove_device(&device.id);
                    n.set_state(EntryState::Ready)
                })?;
                tx.delete::<DeviceEntry>(&device.id)?;
                Ok::<_, CoreError>(())
            });
            if let Err(e) = committed {
                warn!("device {} was torn down but its records remain", device.id);
                compensate(&db, "device delete", |tx| restore_device(tx, &device));
                return Err(e);
            }
            info!("device {} deleted", device.id);
            Ok(None)
        }))
    }
}
