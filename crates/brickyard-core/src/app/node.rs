use super::{compensate, edit, App};
use crate::api::NodeAddRequest;
use crate::entries::{ClusterEntry, HostNames, NodeEntry};
use crate::health::HealthState;
use crate::lifecycle::{EntryState, Lifecycle};
use crate::operations::ScheduledOperation;
use crate::CoreError;
use brickyard_store::{Tx, WriteTx};
use std::sync::Arc;
use tracing::{info, warn};

fn check_hostnames_free(tx: &impl Tx, hostnames: &HostNames) -> Result<(), CoreError> {
    for node in tx.list::<NodeEntry>()? {
        if node.hostnames.overlaps(hostnames) {
            return Err(CoreError::Conflict(format!(
                "hostname already used by node {}",
                node.id
            )));
        }
    }
    Ok(())
}

/// Drop a node record and its cluster membership.
fn forget_node(tx: &mut WriteTx<'_>, node: &NodeEntry) -> Result<(), CoreError> {
    edit::<ClusterEntry>(tx, &node.cluster, |c| {
        c.remove_node(&node.id);
        Ok(())
    })?;
    tx.delete::<NodeEntry>(&node.id)?;
    Ok(())
}

/// Manage host of a ready cluster member other than `exclude`.
fn ready_peer(
    tx: &impl Tx,
    cluster: &ClusterEntry,
    exclude: Option<&str>,
) -> Result<Option<String>, CoreError> {
    for id in &cluster.nodes {
        if exclude.is_some_and(|x| id == x) {
            continue;
        }
        let node: NodeEntry = tx.get(id)?;
        if node.lifecycle.is_ready() {
            return Ok(Some(node.manage_host().to_owned()));
        }
    }
    Ok(None)
}

impl App {
    /// Add a node to a cluster, peering it with an existing member first.
    ///
    /// The node is recorded as `creating` right away so its hostnames are
    /// reserved against concurrent adds. It becomes ready once the peer probe
    /// has succeeded and is forgotten otherwise.
    pub fn node_add(&self, req: NodeAddRequest) -> Result<ScheduledOperation, CoreError> {
        req.validate()?;
        let (node, peer) = self.db.update(|tx| {
            check_hostnames_free(&*tx, &req.hostnames)?;
            let node = NodeEntry::new(req.cluster.clone(), req.zone, req.hostnames.clone());
            tx.put(&node)?;
            let cluster = edit::<ClusterEntry>(tx, &req.cluster, |c| {
                c.add_node(node.id.clone());
                Ok(())
            })?;
            let peer = ready_peer(&*tx, &cluster, None)?;
            Ok::<_, CoreError>((node, peer))
        })?;

        let db = Arc::clone(&self.db);
        let executor = Arc::clone(&self.executor);

        Ok(self.operations.schedule(move || {
            let storage_host = node.storage_host().to_owned();
            if let Some(peer) = &peer {
                if let Err(e) = executor.peer_probe(peer, &storage_host) {
                    compensate(&db, "node add", |tx| forget_node(tx, &node));
                    return Err(e.into());
                }
            }

            let committed = db.update(|tx| {
                edit::<NodeEntry>(tx, &node.id, |n| n.set_state(EntryState::Ready))?;
                Ok::<_, CoreError>(())
            });

            if let Err(e) = committed {
                if let Some(peer) = &peer {
                    if let Err(detach) = executor.peer_detach(peer, &storage_host) {
                        warn!("could not detach {storage_host} after failed add: {detach}");
                    }
                }
                compensate(&db, "node add", |tx| forget_node(tx, &node));
                return Err(e);
            }
            info!("node {} added to cluster {}", node.id, node.cluster);
            Ok(Some(format!("/nodes/{}", node.id)))
        }))
    }

    pub fn node_info(&self, id: &str) -> Result<NodeEntry, CoreError> {
        self.db.view(|tx| Ok(tx.get(id)?))
    }

    /// Detach and remove a node that has no devices left.
    ///
    /// The detach runs from another ready member when there is one and from
    /// the node itself otherwise. A failed detach returns the node to ready.
    pub fn node_delete(&self, id: &str) -> Result<ScheduledOperation, CoreError> {
        let (node, exec_host) = self.db.update(|tx| {
            let node = edit::<NodeEntry>(tx, id, |n| {
                if !n.is_delete_ok() {
                    return Err(CoreError::Conflict(format!(
                        "node {id} still has {} devices",
                        n.devices.len()
                    )));
                }
                n.set_state(EntryState::Deleting)
            })?;
            let cluster: ClusterEntry = tx.get(&node.cluster)?;
            let exec_host = ready_peer(&*tx, &cluster, Some(id))?
                .unwrap_or_else(|| node.manage_host().to_owned());
            Ok::<_, CoreError>((node, exec_host))
        })?;

        let db = Arc::clone(&self.db);
        let executor = Arc::clone(&self.executor);

        Ok(self.operations.schedule(move || {
            if let Err(e) = executor.peer_detach(&exec_host, node.storage_host()) {
                compensate(&db, "node delete", |tx| {
                    edit::<NodeEntry>(tx, &node.id, |n| n.set_state(EntryState::Ready))?;
                    Ok(())
                });
                return Err(e.into());
            }

            if let Err(e) = db.update(|tx| forget_node(tx, &node)) {
                warn!("node {} was detached but its records remain", node.id);
                compensate(&db, "node delete", |tx| {
                    edit::<NodeEntry>(tx, &node.id, |n| n.set_state(EntryState::Ready))?;
                    Ok(())
                });
                return Err(e);
            }
            info!("node {} deleted", node.id);
            Ok(None)
        }))
    }

    /// Record the reported health of a node.
    pub fn node_set_health(&self, id: &str, health: HealthState) -> Result<NodeEntry, CoreError> {
        let node = self.db.update(|tx| {
            edit::<NodeEntry>(tx, id, |n| {
                n.health = health;
                Ok(())
            })
        })?;
        info!("node {id} is now {health}");
        Ok(node)
    }
}
