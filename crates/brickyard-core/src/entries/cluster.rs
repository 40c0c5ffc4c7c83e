use super::{entry_impl, insert_unique, remove_item};
use crate::lifecycle::EntryStateMachine;
use brickyard_store::{ClusterId, NodeId, VolumeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub id: ClusterId,
    pub lifecycle: EntryStateMachine,
    pub nodes: Vec<NodeId>,
    pub volumes: Vec<VolumeId>,
}

entry_impl!(ClusterEntry, "clusters", "cluster");

impl Default for ClusterEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterEntry {
    pub fn new() -> Self {
        Self {
            id: ClusterId::generate(),
            lifecycle: EntryStateMachine::new(),
            nodes: Vec::new(),
            volumes: Vec::new(),
        }
    }

    pub fn add_node(&mut self, id: NodeId) {
        insert_unique(&mut self.nodes, id);
    }

    pub fn remove_node(&mut self, id: &str) {
        remove_item(&mut self.nodes, id);
    }

    pub fn add_volume(&mut self, id: VolumeId) {
        insert_unique(&mut self.volumes, id);
    }

    pub fn remove_volume(&mut self, id: &str) {
        remove_item(&mut self.volumes, id);
    }

    /// A cluster can only be removed once it holds nothing.
    pub fn is_delete_ok(&self) -> bool {
        self.nodes.is_empty() && self.volumes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_a_set() {
        let mut c = ClusterEntry::new();
        let n = NodeId::new("n1");
        c.add_node(n.clone());
        c.add_node(n);
        assert_eq!(c.nodes.len(), 1);
        assert!(!c.is_delete_ok());
        c.remove_node("n1");
        assert!(c.is_delete_ok());
    }
}
