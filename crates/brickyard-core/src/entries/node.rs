use super::{entry_impl, insert_unique, remove_item};
use crate::health::HealthState;
use crate::lifecycle::EntryStateMachine;
use brickyard_store::{ClusterId, DeviceId, NodeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostNames {
    /// Addresses the executor connects to.
    pub manage: Vec<String>,
    /// Addresses the storage daemon peers on.
    pub storage: Vec<String>,
}

impl HostNames {
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.manage.iter().chain(&self.storage).map(String::as_str)
    }

    pub fn overlaps(&self, other: &HostNames) -> bool {
        self.all().any(|h| other.all().any(|o| o == h))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: NodeId,
    pub lifecycle: EntryStateMachine,
    pub health: HealthState,
    pub cluster: ClusterId,
    pub zone: u32,
    pub hostnames: HostNames,
    pub devices: Vec<DeviceId>,
}

entry_impl!(NodeEntry, "nodes", "node");

impl NodeEntry {
    pub fn new(cluster: ClusterId, zone: u32, hostnames: HostNames) -> Self {
        Self {
            id: NodeId::generate(),
            lifecycle: EntryStateMachine::new(),
            health: HealthState::Online,
            cluster,
            zone,
            hostnames,
            devices: Vec::new(),
        }
    }

    pub fn manage_host(&self) -> &str {
        self.hostnames.manage.first().map_or("", String::as_str)
    }

    pub fn storage_host(&self) -> &str {
        self.hostnames.storage.first().map_or("", String::as_str)
    }

    pub fn add_device(&mut self, id: DeviceId) {
        insert_unique(&mut self.devices, id);
    }

    pub fn remove_device(&mut self, id: &str) {
        remove_item(&mut self.devices, id);
    }

    pub fn is_delete_ok(&self) -> bool {
        self.devices.is_empty()
    }
}
