//! Topology records persisted in the entity store.
//!
//! Each record lives in its own table and references its parent and
//! children by id. Writers keep those references consistent inside a single
//! transaction.

mod brick;
mod cluster;
mod device;
mod node;
mod volume;

pub use brick::BrickEntry;
pub use cluster::ClusterEntry;
pub use device::{DeviceEntry, StorageSize};
pub use node::{HostNames, NodeEntry};
pub use volume::VolumeEntry;

use brickyard_store::Entity;

/// Every table the control plane opens.
pub const ENTITY_TABLES: &[&str] = &[
    ClusterEntry::TABLE,
    NodeEntry::TABLE,
    DeviceEntry::TABLE,
    VolumeEntry::TABLE,
    BrickEntry::TABLE,
];

macro_rules! entry_impl {
    ($ty:ty, $table:literal, $kind:literal) => {
        impl brickyard_store::Entity for $ty {
            const TABLE: &'static str = $table;
            fn id(&self) -> &str {
                &self.id
            }
        }

        impl $crate::lifecycle::Lifecycle for $ty {
            const KIND: &'static str = $kind;
            fn lifecycle(&self) -> &$crate::lifecycle::EntryStateMachine {
                &self.lifecycle
            }
            fn lifecycle_mut(&mut self) -> &mut $crate::lifecycle::EntryStateMachine {
                &mut self.lifecycle
            }
        }
    };
}
pub(crate) use entry_impl;

/// Append `item` unless already present.
pub(crate) fn insert_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

pub(crate) fn remove_item<T: PartialEq<U>, U: ?Sized>(list: &mut Vec<T>, item: &U) {
    list.retain(|x| x != item);
}
