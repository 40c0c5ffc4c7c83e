use super::App;
use crate::entries::ClusterEntry;
use crate::lifecycle::{EntryState, Lifecycle};
use crate::CoreError;
use brickyard_store::{ClusterId, Tx};
use tracing::info;

impl App {
    pub fn cluster_create(&self) -> Result<ClusterEntry, CoreError> {
        let mut cluster = ClusterEntry::new();
        cluster.set_state(EntryState::Ready)?;
        self.db.update(|tx| {
            tx.put(&cluster)?;
            Ok::<_, CoreError>(())
        })?;
        info!("cluster {} created", cluster.id);
        Ok(cluster)
    }

    pub fn cluster_info(&self, id: &str) -> Result<ClusterEntry, CoreError> {
        self.db.view(|tx| Ok(tx.get(id)?))
    }

    pub fn cluster_list(&self) -> Result<Vec<ClusterId>, CoreError> {
        let ids = self.db.view(|tx| tx.ids::<ClusterEntry>())?;
        Ok(ids.into_iter().map(ClusterId::from).collect())
    }

    /// Remove a cluster that no longer holds nodes or volumes.
    pub fn cluster_delete(&self, id: &str) -> Result<(), CoreError> {
        self.db.update(|tx| {
            let mut cluster: ClusterEntry = tx.get(id)?;
            if !cluster.is_delete_ok() {
                return Err(CoreError::Conflict(format!(
                    "cluster {id} still has {} nodes and {} volumes",
                    cluster.nodes.len(),
                    cluster.volumes.len()
                )));
            }
            cluster.set_state(EntryState::Deleting)?;
            tx.delete::<ClusterEntry>(id)?;
            Ok(())
        })?;
        info!("cluster {id} deleted");
        Ok(())
    }
}
