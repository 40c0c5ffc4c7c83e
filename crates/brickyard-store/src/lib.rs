//! Transactional entity store for Brickyard.
//!
//! This crate provides the persistence layer: a `Db` backed by redb with
//! scoped read (`view`) and read-write (`update`) transactions, the `Entity`
//! trait implemented by every topology record, strongly typed identifiers,
//! and a checksummed whole-database export that can be restored into a fresh
//! store.

pub mod backup;
pub mod db;
pub mod types;

pub use backup::{Snapshot, SNAPSHOT_FORMAT_VERSION};
pub use db::{Db, Entity, ReadTx, Tx, WriteTx};
pub use types::{new_id, BrickId, ClusterId, DeviceId, NodeId, OperationId, VolumeId};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` inside it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{table} entry not found: {id}")]
    NotFound { table: &'static str, id: String },
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("database open failed: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("transaction failed: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("table access failed: {0}")]
    Table(#[from] redb::TableError),
    #[error("storage failure: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("commit failed: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("snapshot integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },
    #[error("snapshot format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
