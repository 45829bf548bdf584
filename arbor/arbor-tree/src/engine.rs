//! The engine facade.
//!
//! Wires the attribute store, the index, locks, resolver, tree, propagator,
//! references, homes and retention together and exposes the operations
//! callers use, addressed by resource reference.

use crate::disk_store::DiskStore;
use crate::home::HomeProvisioner;
use crate::index::TreeIndex;
use crate::locks::NodeLocks;
use crate::memory_store::MemoryStore;
use crate::node::{Node, ResourceInfo, ResourceRef};
use crate::path::VirtualPath;
use crate::principal::Principal;
use crate::propagation::Propagator;
use crate::reference::References;
use crate::resolver::PathResolver;
use crate::retention::TrashBin;
use crate::store::AttributeStore;
use crate::tree::Tree;
use arbor_core::config::EngineConfig;
use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// A node tree over an attribute store.
pub struct Engine {
    config: Arc<EngineConfig>,
    store: Arc<dyn AttributeStore>,
    tree: Tree,
    references: References,
    homes: HomeProvisioner,
    trash: Arc<TrashBin>,
}

impl Engine {
    /// Open the on-disk tree at `config.root`, creating it if needed.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let config = config.normalized();
        config.validate()?;

        let disk = DiskStore::open(&config.root).await?;
        let trash_dir = disk.trash_dir();
        let store: Arc<dyn AttributeStore> = Arc::new(disk);
        let trash = Arc::new(TrashBin::open(store.clone(), trash_dir).await?);
        Self::with_store(config, store, trash).await
    }

    /// An engine whose whole tree lives in memory.
    pub async fn in_memory(config: EngineConfig) -> Result<Self> {
        let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::new());
        let trash = Arc::new(TrashBin::in_memory(store.clone()));
        Self::with_store(config.normalized(), store, trash).await
    }

    /// Assemble an engine over an existing store.
    ///
    /// The root is created if the store has none, and the index is rebuilt
    /// from the store.
    pub async fn with_store(
        config: EngineConfig,
        store: Arc<dyn AttributeStore>,
        trash: Arc<TrashBin>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        Tree::ensure_root(store.as_ref()).await?;
        let index = Arc::new(TreeIndex::rebuild(store.as_ref()).await?);
        let locks = Arc::new(NodeLocks::new());

        let resolver =
            PathResolver::new(store.clone(), index.clone(), locks.clone(), config.clone());
        let propagator =
            Propagator::new(store.clone(), index.clone(), locks.clone(), config.clone());
        let tree = Tree::new(
            store.clone(),
            index,
            locks,
            resolver,
            propagator,
            trash.clone(),
        );

        info!(
            "Engine ready (homes: {}, tree time: {}, tree size: {})",
            config.enable_home, config.tree_time_accounting, config.tree_size_accounting
        );
        Ok(Self {
            config,
            store,
            references: References::new(tree.clone()),
            homes: HomeProvisioner::new(tree.clone()),
            tree,
            trash,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn resolver(&self) -> &PathResolver {
        self.tree.resolver()
    }

    pub fn trash(&self) -> &TrashBin {
        &self.trash
    }

    /// Resolve a reference. The node may be prospective.
    pub async fn resolve(&self, reference: &ResourceRef) -> Result<Node> {
        self.resolver().node_from_resource_reference(reference).await
    }

    async fn resolve_existing(&self, reference: &ResourceRef) -> Result<Node> {
        let node = self.resolve(reference).await?;
        if !node.exists() {
            return Err(ArborError::not_found("resource", reference.to_string()));
        }
        Ok(node)
    }

    /// Resource info of an existing node.
    pub async fn get_md(
        &self,
        reference: &ResourceRef,
        md_keys: &[String],
    ) -> Result<ResourceInfo> {
        let node = self.resolve_existing(reference).await?;
        let path = self.tree.resolve_id_to_path(node.id())?;
        ResourceInfo::project(&node, path, md_keys)
    }

    /// Resource infos of a folder's children.
    ///
    /// Children whose info cannot be projected are left out.
    pub async fn list_folder(
        &self,
        reference: &ResourceRef,
        md_keys: &[String],
    ) -> Result<Vec<ResourceInfo>> {
        let node = self.resolve_existing(reference).await?;
        let path = self.tree.resolve_id_to_path(node.id())?;

        let mut infos = Vec::new();
        for child in self.tree.list_children(&node).await? {
            let child_path = path.join(child.name())?;
            match ResourceInfo::project(&child, child_path, md_keys) {
                Ok(info) => infos.push(info),
                Err(e) => warn!("Leaving {} out of listing: {}", child.id(), e),
            }
        }
        Ok(infos)
    }

    pub async fn create_dir(&self, path: &VirtualPath) -> Result<Node> {
        let node = self.resolver().node_from_path(path).await?;
        if node.exists() {
            return Err(ArborError::already_exists(path.to_string()));
        }
        self.tree.create_directory(&node).await
    }

    /// Create an empty file node at `path` for the content collaborator.
    pub async fn create_file(&self, path: &VirtualPath) -> Result<Node> {
        let node = self.resolver().node_from_path(path).await?;
        if node.exists() {
            return Err(ArborError::already_exists(path.to_string()));
        }
        self.tree.create_file(&node).await
    }

    pub async fn move_node(&self, old: &ResourceRef, new: &ResourceRef) -> Result<Node> {
        let old_node = self.resolve_existing(old).await?;
        let new_node = self.resolve(new).await?;
        self.tree.move_node(&old_node, &new_node).await
    }

    pub async fn delete(&self, reference: &ResourceRef) -> Result<()> {
        let node = self.resolve_existing(reference).await?;
        self.tree.delete(&node).await
    }

    pub fn path_by_id(&self, id: &NodeId) -> Result<VirtualPath> {
        self.tree.resolve_id_to_path(id)
    }

    pub async fn create_reference(&self, path: &VirtualPath, target: &Url) -> Result<Node> {
        self.references.create_reference(path, target).await
    }

    pub async fn create_home(&self, principal: &Principal) -> Result<Node> {
        self.homes.create_home(principal).await
    }

    pub fn get_home(&self, principal: &Principal) -> Result<VirtualPath> {
        self.homes.get_home(principal)
    }

    pub async fn set_arbitrary_metadata(
        &self,
        reference: &ResourceRef,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        let node = self.resolve_existing(reference).await?;
        self.tree.set_arbitrary_metadata(&node, metadata).await
    }

    pub async fn unset_arbitrary_metadata(
        &self,
        reference: &ResourceRef,
        keys: &[String],
    ) -> Result<()> {
        let node = self.resolve_existing(reference).await?;
        self.tree.unset_arbitrary_metadata(&node, keys).await
    }

    pub async fn copy_metadata(&self, source: &ResourceRef, target: &ResourceRef) -> Result<()> {
        let source = self.resolve_existing(source).await?;
        let target = self.resolve_existing(target).await?;
        self.tree.copy_metadata(&source, &target).await
    }

    pub async fn record_content_change(
        &self,
        reference: &ResourceRef,
        size_delta: i64,
    ) -> Result<()> {
        let node = self.resolve_existing(reference).await?;
        self.tree.record_content_change(&node, size_delta).await
    }

    /// Where the content collaborator keeps the bytes of a file node.
    ///
    /// This location is internal and never part of a tree path.
    pub async fn content_path(&self, reference: &ResourceRef) -> Result<PathBuf> {
        let node = self.resolve_existing(reference).await?;
        if node.is_directory() {
            return Err(ArborError::invalid_input(format!(
                "{} has no content",
                reference
            )));
        }
        self.store
            .content_location(node.id())
            .ok_or_else(|| ArborError::not_supported("the store keeps no content"))
    }

    pub fn check_consistency(&self) -> Result<()> {
        self.tree.check_consistency()
    }

    /// Release the engine. Every write is already durable.
    pub async fn shutdown(self) -> Result<()> {
        debug!("Shutting down engine at {}", self.config.root.display());
        Ok(())
    }
}
