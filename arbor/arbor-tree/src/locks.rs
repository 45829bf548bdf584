//! Advisory locks for tree mutations.
//!
//! Three layers:
//! - a tree-wide structure lock, shared by creations and metadata writes and
//!   exclusive for moves and deletes
//! - one read/write lock per node, taken in id order when several are needed
//! - one accounting lock per node, held only while a propagation step
//!   rewrites that node's aggregates
//!
//! Locks are always acquired in this order and accounting locks are never
//! nested, so lock acquisition cannot deadlock.

use arbor_core::id::NodeId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{
    Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
    RwLockReadGuard, RwLockWriteGuard,
};
use tracing::debug;

/// Lock table shared by the resolver, the tree and the propagator.
#[derive(Debug, Default)]
pub struct NodeLocks {
    structure: RwLock<()>,
    nodes: DashMap<NodeId, Arc<RwLock<()>>>,
    accounting: DashMap<NodeId, Arc<Mutex<()>>>,
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared structure lock for operations that only add to the tree.
    pub async fn structure_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.structure.read().await
    }

    /// Exclusive structure lock for moves and deletes.
    pub async fn structure_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.structure.write().await
    }

    fn node_lock(&self, id: &NodeId) -> Arc<RwLock<()>> {
        self.nodes.entry(id.clone()).or_default().clone()
    }

    pub async fn read(&self, id: &NodeId) -> OwnedRwLockReadGuard<()> {
        self.node_lock(id).read_owned().await
    }

    pub async fn write(&self, id: &NodeId) -> OwnedRwLockWriteGuard<()> {
        self.node_lock(id).write_owned().await
    }

    /// Write-lock several nodes in id order. Duplicates are locked once.
    pub async fn write_all(&self, ids: &[&NodeId]) -> Vec<OwnedRwLockWriteGuard<()>> {
        let mut ordered: Vec<&NodeId> = ids.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for id in ordered {
            guards.push(self.write(id).await);
        }
        guards
    }

    /// Serialize aggregate updates of one node.
    pub async fn accounting(&self, id: &NodeId) -> OwnedMutexGuard<()> {
        let lock = self.accounting.entry(id.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Forget the locks of nodes that left the tree.
    ///
    /// Holders of a pruned lock keep it until they release it.
    pub fn prune(&self, ids: &[NodeId]) {
        for id in ids {
            self.nodes.remove(id);
            self.accounting.remove(id);
        }
        debug!("Pruned locks of {} nodes", ids.len());
    }

    /// Number of nodes with a lock entry
    pub fn tracked(&self) -> usize {
        self.nodes.len()
    }
}
