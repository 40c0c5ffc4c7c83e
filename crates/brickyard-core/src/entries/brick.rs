use super::entry_impl;
use crate::lifecycle::EntryStateMachine;
use brickyard_store::{BrickId, DeviceId, NodeId, VolumeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickEntry {
    pub id: BrickId,
    pub lifecycle: EntryStateMachine,
    pub node: NodeId,
    pub device: DeviceId,
    pub volume: VolumeId,
    pub size_kib: u64,
    /// Empty until the brick has been created on its node.
    pub path: String,
}

entry_impl!(BrickEntry, "bricks", "brick");

impl BrickEntry {
    pub fn new(node: NodeId, device: DeviceId, volume: VolumeId, size_kib: u64) -> Self {
        Self {
            id: BrickId::generate(),
            lifecycle: EntryStateMachine::new(),
            node,
            device,
            volume,
            size_kib,
            path: String::new(),
        }
    }
}
