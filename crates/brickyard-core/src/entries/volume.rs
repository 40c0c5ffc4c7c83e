use super::{entry_impl, insert_unique};
use crate::lifecycle::EntryStateMachine;
use brickyard_store::{BrickId, ClusterId, VolumeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeEntry {
    pub id: VolumeId,
    pub lifecycle: EntryStateMachine,
    pub cluster: ClusterId,
    pub name: String,
    pub size_gib: u64,
    pub replica: usize,
    pub bricks: Vec<BrickId>,
}

entry_impl!(VolumeEntry, "volumes", "volume");

impl VolumeEntry {
    /// An unnamed volume is called `vol_<id>`.
    pub fn new(cluster: ClusterId, name: Option<String>, size_gib: u64, replica: usize) -> Self {
        let id = VolumeId::generate();
        let name = name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("vol_{id}"));
        Self {
            id,
            lifecycle: EntryStateMachine::new(),
            cluster,
            name,
            size_gib,
            replica,
            bricks: Vec::new(),
        }
    }

    pub fn add_brick(&mut self, id: BrickId) {
        insert_unique(&mut self.bricks, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_name_uses_id() {
        let v = VolumeEntry::new(ClusterId::new("c"), None, 10, 2);
        assert_eq!(v.name, format!("vol_{}", v.id));
        let named = VolumeEntry::new(ClusterId::new("c"), Some("data".to_owned()), 10, 2);
        assert_eq!(named.name, "data");
    }
}
