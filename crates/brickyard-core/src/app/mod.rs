//! Request-level operations over the topology.
//!
//! Every mutating operation follows the same shape: a synchronous write
//! transaction validates the request and moves the affected records into a
//! non-ready state, the slow remote work is scheduled on the
//! [`AsyncManager`], and a final write transaction commits the outcome. When
//! the remote step fails the task runs a compensating transaction before
//! reporting the error on the operation handle.

mod cluster;
mod device;
mod node;
mod volume;

use crate::config::ServerConfig;
use crate::entries::ENTITY_TABLES;
use crate::operations::AsyncManager;
use crate::placement::{BrickPlacer, SimplePlacer};
use crate::CoreError;
use brickyard_executor::{select_executor, RemoteExecutor};
use brickyard_store::{Db, Entity, Tx, WriteTx};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// KiB in one GiB.
pub const KIB_PER_GIB: u64 = 1024 * 1024;

/// Central orchestration point of the control plane.
///
/// Cheap to share between request threads; all state lives behind `Arc`s.
pub struct App {
    db: Arc<Db>,
    executor: Arc<dyn RemoteExecutor>,
    operations: Arc<AsyncManager>,
    placer: Arc<dyn BrickPlacer>,
}

impl App {
    pub fn new(db: Db, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            db: Arc::new(db),
            executor,
            operations: Arc::new(AsyncManager::default()),
            placer: Arc::new(SimplePlacer),
        }
    }

    #[must_use]
    pub fn with_operations(mut self, operations: AsyncManager) -> Self {
        self.operations = Arc::new(operations);
        self
    }

    #[must_use]
    pub fn with_placer(mut self, placer: Arc<dyn BrickPlacer>) -> Self {
        self.placer = placer;
        self
    }

    /// Open the configured database and executor backend.
    pub fn open(config: &ServerConfig) -> Result<Self, CoreError> {
        let db = Db::open(&config.db, ENTITY_TABLES)?;
        let executor: Arc<dyn RemoteExecutor> = Arc::from(select_executor(&config.executor)?);
        info!(
            "using {} executor with database {}",
            executor.name(),
            config.db.display()
        );
        let retention = Duration::from_secs(config.operation_retention_secs);
        let operations = AsyncManager::default().with_retention(retention);
        Ok(Self::new(db, executor).with_operations(operations))
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn executor(&self) -> &Arc<dyn RemoteExecutor> {
        &self.executor
    }

    pub fn operations(&self) -> &Arc<AsyncManager> {
        &self.operations
    }

    /// Write a consistent snapshot of the whole database.
    pub fn export<W: Write>(&self, writer: &mut W) -> Result<u64, CoreError> {
        Ok(self.db.export(writer)?)
    }
}

/// Load a record, apply `f` and store it back.
pub(crate) fn edit<E: Entity>(
    tx: &mut WriteTx<'_>,
    id: &str,
    f: impl FnOnce(&mut E) -> Result<(), CoreError>,
) -> Result<E, CoreError> {
    let mut entry: E = tx.get(id)?;
    f(&mut entry)?;
    tx.put(&entry)?;
    Ok(entry)
}

/// Run a compensating transaction, logging rather than returning failure so
/// the first error reaches the operation handle.
pub(crate) fn compensate(
    db: &Db,
    what: &str,
    f: impl FnOnce(&mut WriteTx<'_>) -> Result<(), CoreError>,
) {
    if let Err(e) = db.update(f) {
        error!("rollback of {what} failed, records may need manual repair: {e}");
    }
}
