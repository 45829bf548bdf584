//! Retention of deleted nodes.
//!
//! Delete hands every removed node to a [`Retention`] facility before the
//! node is unlinked. The bundled [`TrashBin`] records where the node came
//! from and keeps an index of trashed items; restore and purge belong to the
//! recycle collaborator.

use crate::attributes;
use crate::node::{Node, ResourceType};
use crate::path::VirtualPath;
use crate::store::AttributeStore;
use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Receives nodes removed from the active tree.
#[async_trait]
pub trait Retention: Send + Sync {
    /// Take over `node`, which was at `origin` before the delete.
    async fn retain(&self, node: &Node, origin: &VirtualPath) -> Result<()>;
}

/// A trashed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrashItem {
    pub id: NodeId,
    pub name: String,
    pub origin: VirtualPath,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub deleted_at: DateTime<Utc>,
}

/// Trash provenance bookkeeping.
pub struct TrashBin {
    store: Arc<dyn AttributeStore>,
    items: DashMap<NodeId, TrashItem>,
    dir: Option<PathBuf>,
}

impl TrashBin {
    /// A trash bin that only keeps its index in memory.
    pub fn in_memory(store: Arc<dyn AttributeStore>) -> Self {
        Self {
            store,
            items: DashMap::new(),
            dir: None,
        }
    }

    /// A trash bin persisting one JSON record per item in `dir`.
    ///
    /// Records already in `dir` are loaded; unreadable ones are skipped.
    pub async fn open(store: Arc<dyn AttributeStore>, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let items = DashMap::new();
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read(&path)
                .await
                .map_err(ArborError::from)
                .and_then(|raw| {
                    serde_json::from_slice::<TrashItem>(&raw).map_err(ArborError::from)
                });
            match parsed {
                Ok(item) => {
                    items.insert(item.id.clone(), item);
                }
                Err(e) => warn!("Skipping unreadable trash record {:?}: {}", entry.file_name(), e),
            }
        }

        info!("Opened trash bin with {} items", items.len());
        Ok(Self {
            store,
            items,
            dir: Some(dir),
        })
    }

    pub fn get(&self, id: &NodeId) -> Option<TrashItem> {
        self.items.get(id).map(|item| item.clone())
    }

    /// Trashed items, oldest first
    pub fn items(&self) -> Vec<TrashItem> {
        let mut items: Vec<TrashItem> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| a.deleted_at.cmp(&b.deleted_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    async fn persist(&self, item: &TrashItem) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(item)?;
        let target = dir.join(format!("{}.json", item.id));
        let temp = dir.join(format!(".{}.json.tmp", item.id));

        fs::write(&temp, json).await?;
        fs::rename(&temp, &target).await?;
        Ok(())
    }
}

#[async_trait]
impl Retention for TrashBin {
    async fn retain(&self, node: &Node, origin: &VirtualPath) -> Result<()> {
        self.store
            .set(node.id(), attributes::TRASH_ORIGIN, origin.to_string().as_bytes())
            .await?;

        let item = TrashItem {
            id: node.id().clone(),
            name: node.name().to_string(),
            origin: origin.clone(),
            resource_type: node.resource_type(),
            deleted_at: Utc::now(),
        };
        self.persist(&item).await?;
        self.items.insert(item.id.clone(), item);

        debug!("Trashed node {} from {}", node.id(), origin);
        Ok(())
    }
}
