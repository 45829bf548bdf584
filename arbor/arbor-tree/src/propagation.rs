//! Upward propagation of tree aggregates.
//!
//! After a mutation the propagator walks from the node that changed up
//! through its ancestors, refreshing the tree modification time and
//! applying a signed size delta. The walk stops at the first node marked as
//! a propagation root, which is updated itself, or at the tree root.

use crate::attributes::{self, encode_time};
use crate::index::TreeIndex;
use crate::locks::NodeLocks;
use crate::store::AttributeStore;
use arbor_core::config::EngineConfig;
use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};

/// Aggregate change carried up the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub time: DateTime<Utc>,
    pub size_delta: i64,
}

impl Change {
    /// A change that only refreshes modification times
    pub fn touch() -> Self {
        Self::sized(0)
    }

    pub fn sized(size_delta: i64) -> Self {
        Self {
            time: Utc::now(),
            size_delta,
        }
    }
}

#[derive(Clone)]
pub struct Propagator {
    store: Arc<dyn AttributeStore>,
    index: Arc<TreeIndex>,
    locks: Arc<NodeLocks>,
    config: Arc<EngineConfig>,
}

impl Propagator {
    pub fn new(
        store: Arc<dyn AttributeStore>,
        index: Arc<TreeIndex>,
        locks: Arc<NodeLocks>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            index,
            locks,
            config,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.accounting_enabled()
    }

    /// Propagate `change` starting at `from`.
    ///
    /// Returns the ids that were updated, in walk order. A failed write
    /// stops the walk and is reported as a propagation error naming the node
    /// that could not be updated; nodes already updated stay updated.
    pub async fn propagate(&self, from: &NodeId, change: Change) -> Result<Vec<NodeId>> {
        if !self.enabled() {
            return Ok(Vec::new());
        }

        let mut updated = Vec::new();
        let mut current = Some(from.clone());
        let limit = self.index.len() + 1;

        while let Some(id) = current.take() {
            if updated.len() > limit {
                return Err(ArborError::propagation(
                    id.clone(),
                    ArborError::corruption(id.as_str(), "parent links form a cycle"),
                ));
            }

            let stop = {
                let _guard = self.locks.accounting(&id).await;
                self.apply(&id, &change).await.map_err(|e| {
                    error!("Propagation failed at node {}: {}", id, e);
                    ArborError::propagation(id.clone(), e)
                })?
            };
            updated.push(id.clone());

            if stop || id.is_root() {
                break;
            }
            current = self.index.parent(&id);
        }

        debug!("Propagated from {} through {} nodes", from, updated.len());
        Ok(updated)
    }

    /// Update one node. Returns whether the walk stops here.
    async fn apply(&self, id: &NodeId, change: &Change) -> Result<bool> {
        if self.config.tree_time_accounting {
            let newer = match self.store.get_opt(id, attributes::TREE_MTIME).await? {
                Some(raw) => {
                    let raw = String::from_utf8(raw).map_err(|e| {
                        ArborError::decode(id.as_str(), attributes::TREE_MTIME, e.to_string())
                    })?;
                    // unparsable values are overwritten
                    DateTime::parse_from_rfc3339(&raw)
                        .map(|t| t.with_timezone(&Utc) < change.time)
                        .unwrap_or(true)
                }
                None => true,
            };
            if newer {
                self.store
                    .set(id, attributes::TREE_MTIME, encode_time(&change.time).as_bytes())
                    .await?;
            }
        }

        match self.store.remove(id, attributes::TMP_ETAG).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if self.config.tree_size_accounting && change.size_delta != 0 {
            let current = match self.store.get_opt(id, attributes::TREE_SIZE).await? {
                Some(raw) => std::str::from_utf8(&raw)
                    .ok()
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .ok_or_else(|| {
                        ArborError::decode(id.as_str(), attributes::TREE_SIZE, "not a decimal size")
                    })?,
                None => 0,
            };
            let size = apply_delta(current, change.size_delta);
            self.store
                .set(id, attributes::TREE_SIZE, size.to_string().as_bytes())
                .await?;
        }

        let marker = self.store.get_opt(id, attributes::PROPAGATION).await?;
        Ok(marker.as_deref() == Some(attributes::PROPAGATION_ROOT))
    }
}

/// Apply a signed delta, clamping at zero.
pub(crate) fn apply_delta(current: u64, delta: i64) -> u64 {
    if delta >= 0 {
        current.saturating_add(delta as u64)
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}
