use super::{entry_impl, insert_unique, remove_item};
use crate::health::HealthState;
use crate::lifecycle::EntryStateMachine;
use brickyard_store::{BrickId, DeviceId, NodeId};
use serde::{Deserialize, Serialize};

/// Capacity figures in KiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSize {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: DeviceId,
    pub lifecycle: EntryStateMachine,
    pub health: HealthState,
    pub node: NodeId,
    /// Block device path on the node, e.g. `/dev/sdb`.
    pub name: String,
    pub storage: StorageSize,
    pub bricks: Vec<BrickId>,
}

entry_impl!(DeviceEntry, "devices", "device");

impl DeviceEntry {
    pub fn new(node: NodeId, name: impl Into<String>) -> Self {
        Self {
            id: DeviceId::generate(),
            lifecycle: EntryStateMachine::new(),
            health: HealthState::Online,
            node,
            name: name.into(),
            storage: StorageSize::default(),
            bricks: Vec::new(),
        }
    }

    pub fn set_capacity(&mut self, size_kib: u64) {
        self.storage = StorageSize {
            total: size_kib,
            free: size_kib,
            used: 0,
        };
    }

    /// Reserve space for a brick. Returns false when it does not fit.
    pub fn allocate(&mut self, brick: BrickId, size_kib: u64) -> bool {
        if self.storage.free < size_kib {
            return false;
        }
        self.storage.free -= size_kib;
        self.storage.used += size_kib;
        insert_unique(&mut self.bricks, brick);
        true
    }

    pub fn release(&mut self, brick: &str, size_kib: u64) {
        if self.bricks.iter().any(|b| b == brick) {
            remove_item(&mut self.bricks, brick);
            self.storage.free += size_kib;
            self.storage.used = self.storage.used.saturating_sub(size_kib);
        }
    }

    pub fn is_delete_ok(&self) -> bool {
        self.bricks.is_empty()
    }
}
