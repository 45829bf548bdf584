//! Tree persistence: the structural mutations of the node tree.
//!
//! Every mutation writes the attribute store first and updates the
//! in-memory index only after the store accepted the change. Write order
//! keeps a crash self-describing: a new node carries its parent id and name
//! before it becomes visible in its parent, and a moved node carries its new
//! location before the entry is relinked. The index rebuild reports any
//! leftover divergence as corruption.
//!
//! Aggregate accounting runs after the mutation committed. If it fails the
//! mutation is not rolled back; the caller gets a propagation error.

use crate::attributes::{self, AttributeCategory, METADATA_PREFIX};
use crate::index::TreeIndex;
use crate::locks::NodeLocks;
use crate::node::Node;
use crate::path::VirtualPath;
use crate::propagation::{Change, Propagator};
use crate::resolver::PathResolver;
use crate::retention::Retention;
use crate::store::{validate_component, AttributeStore, ObjectKind};
use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Structural operations on the node tree.
#[derive(Clone)]
pub struct Tree {
    store: Arc<dyn AttributeStore>,
    index: Arc<TreeIndex>,
    locks: Arc<NodeLocks>,
    resolver: PathResolver,
    propagator: Propagator,
    retention: Arc<dyn Retention>,
}

impl Tree {
    pub fn new(
        store: Arc<dyn AttributeStore>,
        index: Arc<TreeIndex>,
        locks: Arc<NodeLocks>,
        resolver: PathResolver,
        propagator: Propagator,
        retention: Arc<dyn Retention>,
    ) -> Self {
        Self {
            store,
            index,
            locks,
            resolver,
            propagator,
            retention,
        }
    }

    /// Create the root object if the store does not have one yet.
    pub async fn ensure_root(store: &dyn AttributeStore) -> Result<()> {
        match store.object_kind(&NodeId::root()).await? {
            Some(ObjectKind::Directory) => Ok(()),
            Some(ObjectKind::File) => {
                Err(ArborError::corruption("root", "root is not a directory"))
            }
            None => {
                store.create_object(&NodeId::root(), ObjectKind::Directory).await?;
                info!("Created tree root");
                Ok(())
            }
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Create a directory at the location of a prospective node.
    pub async fn create_directory(&self, node: &Node) -> Result<Node> {
        self.create_node(node, ObjectKind::Directory).await
    }

    /// Create an empty file node for the content collaborator to fill.
    pub async fn create_file(&self, node: &Node) -> Result<Node> {
        self.create_node(node, ObjectKind::File).await
    }

    async fn create_node(&self, node: &Node, kind: ObjectKind) -> Result<Node> {
        if node.exists() {
            return Err(ArborError::already_exists(self.describe(node)));
        }
        let parent_id = node
            .parent_id()
            .cloned()
            .ok_or_else(|| ArborError::invalid_input("cannot create a node without parent"))?;
        let name = node.name();
        validate_component("name", name)?;

        let _structure = self.locks.structure_shared().await;
        let _parent_guard = self.locks.write(&parent_id).await;

        let parent = self.resolver.load_node_unlocked(&parent_id).await?;
        if !parent.is_directory() {
            return Err(ArborError::invalid_input(format!(
                "'{}' is not a directory",
                parent.name()
            )));
        }
        if parent.is_reference() {
            return Err(ArborError::permission_denied(format!(
                "'{}' is a reference and cannot hold entries",
                parent.name()
            )));
        }
        if self.index.child(&parent_id, name).is_some() {
            return Err(ArborError::already_exists(self.describe(node)));
        }
        if node.attributes().contains(attributes::REFERENCE) && !self.is_share_folder(&parent_id) {
            return Err(ArborError::permission_denied(format!(
                "references can only be created in {}",
                self.resolver.config().share_folder
            )));
        }

        let id = NodeId::generate();
        self.store.create_object(&id, kind).await?;
        self.store
            .set(&id, attributes::PARENT_ID, parent_id.as_str().as_bytes())
            .await?;
        self.store.set(&id, attributes::NAME, name.as_bytes()).await?;

        let explicit_owner = node.attributes().contains(attributes::OWNER_ID);
        for (key, value) in node.creation_attributes() {
            self.store.set(&id, key, value).await?;
        }
        if !explicit_owner {
            for key in [attributes::OWNER_ID, attributes::OWNER_IDP] {
                if let Some(value) = parent.attributes().get(key) {
                    self.store.set(&id, key, value).await?;
                }
            }
        }

        // visible from here on
        self.store.link(&parent_id, name, &id).await?;
        self.index.insert(&parent_id, name, &id, kind)?;
        debug!("Created {:?} {} as '{}' in {}", kind, id, name, parent_id);

        let created = self.resolver.load_node_unlocked(&id).await?;
        self.propagator
            .propagate(&parent_id, Change::touch())
            .await?;
        Ok(created)
    }

    /// Move or rename `old` to the location of `new`, keeping its id.
    ///
    /// Moving a node onto itself is a no-op. Moving the root or moving a
    /// directory into its own subtree is rejected.
    pub async fn move_node(&self, old: &Node, new: &Node) -> Result<Node> {
        if !old.exists() {
            return Err(ArborError::not_found("node", self.describe(old)));
        }
        if old.is_root() {
            return Err(ArborError::permission_denied("the root cannot be moved"));
        }
        if new.exists() {
            if new.id() == old.id() {
                return Ok(old.clone());
            }
            return Err(ArborError::already_exists(self.describe(new)));
        }
        let new_parent = new
            .parent_id()
            .cloned()
            .ok_or_else(|| ArborError::invalid_input("move target has no parent"))?;
        let new_name = new.name();
        validate_component("name", new_name)?;

        let _structure = self.locks.structure_exclusive().await;

        // re-read under the structure lock, the caller's view may be stale
        let (old_parent, old_name) = match self.index.location(old.id()) {
            Some((Some(parent), name)) => (parent, name),
            _ => return Err(ArborError::not_found("node", old.id().as_str())),
        };
        let _guards = self
            .locks
            .write_all(&[old.id(), &old_parent, &new_parent])
            .await;

        let current = self.resolver.load_node_unlocked(old.id()).await?;
        let target_dir = self.resolver.load_node_unlocked(&new_parent).await?;
        if !target_dir.is_directory() {
            return Err(ArborError::invalid_input(format!(
                "'{}' is not a directory",
                target_dir.name()
            )));
        }
        if self.index.is_same_or_ancestor(current.id(), &new_parent) {
            return Err(ArborError::invalid_input(format!(
                "cannot move '{}' into its own subtree",
                current.name()
            )));
        }
        match self.index.child(&new_parent, new_name) {
            Some(existing) if &existing == current.id() => return Ok(current),
            Some(_) => return Err(ArborError::already_exists(self.describe(new))),
            None => {}
        }
        if current.is_reference() && !self.is_share_folder(&new_parent) {
            return Err(ArborError::permission_denied(format!(
                "references can only live in {}",
                self.resolver.config().share_folder
            )));
        }
        if self.is_share_folder(current.id()) && self.holds_references(current.id()).await? {
            return Err(ArborError::permission_denied(format!(
                "{} holds references and cannot be moved",
                self.resolver.config().share_folder
            )));
        }

        self.relocate(&current, &old_parent, &old_name, &new_parent, new_name)
            .await?;
        debug!(
            "Moved {} from '{}' in {} to '{}' in {}",
            current.id(),
            old_name,
            old_parent,
            new_name,
            new_parent
        );

        let moved = self.resolver.load_node_unlocked(current.id()).await?;
        let size = self.accounted_size(&current);
        if old_parent == new_parent {
            self.propagator.propagate(&new_parent, Change::touch()).await?;
        } else {
            // both chains are walked even if the first one fails
            let change = Change::sized(-size);
            let left = self.propagator.propagate(&old_parent, change).await;
            let entered = self
                .propagator
                .propagate(&new_parent, Change { size_delta: size, ..change })
                .await;
            left?;
            entered?;
        }
        Ok(moved)
    }

    /// Write the new location, relink the entry and update the index.
    ///
    /// If a step fails the stored location is put back.
    async fn relocate(
        &self,
        node: &Node,
        old_parent: &NodeId,
        old_name: &str,
        new_parent: &NodeId,
        new_name: &str,
    ) -> Result<()> {
        let id = node.id();
        let result: Result<()> = async {
            self.store
                .set(id, attributes::PARENT_ID, new_parent.as_str().as_bytes())
                .await?;
            self.store.set(id, attributes::NAME, new_name.as_bytes()).await?;
            self.store
                .relink(old_parent, old_name, new_parent, new_name)
                .await
        }
        .await;

        if let Err(e) = result {
            let restored: Result<()> = async {
                self.store
                    .set(id, attributes::PARENT_ID, old_parent.as_str().as_bytes())
                    .await?;
                self.store.set(id, attributes::NAME, old_name.as_bytes()).await
            }
            .await;
            if let Err(restore_err) = restored {
                warn!("Could not restore location of {} after failed move: {}", id, restore_err);
            }
            return Err(e);
        }

        self.index.relocate(id, new_parent, new_name)
    }

    /// Remove `node` from the active tree and hand it to retention.
    ///
    /// The node keeps its attribute bag; its subtree leaves the tree with it.
    pub async fn delete(&self, node: &Node) -> Result<()> {
        if !node.exists() {
            return Err(ArborError::not_found("node", self.describe(node)));
        }
        if node.is_root() {
            return Err(ArborError::permission_denied("the root cannot be deleted"));
        }

        let _structure = self.locks.structure_exclusive().await;
        let (parent, name) = match self.index.location(node.id()) {
            Some((Some(parent), name)) => (parent, name),
            _ => return Err(ArborError::not_found("node", node.id().as_str())),
        };
        let _guards = self.locks.write_all(&[node.id(), &parent]).await;

        let current = self.resolver.load_node_unlocked(node.id()).await?;
        let origin = self.index.path_of(current.id())?;
        let size = self.accounted_size(&current);

        self.retention.retain(&current, &origin).await?;
        self.store.unlink(&parent, &name).await?;
        let removed = self.index.detach(current.id());
        self.locks.prune(&removed);
        info!("Deleted {} ({} nodes) from {}", current.id(), removed.len(), origin);

        self.propagator.propagate(&parent, Change::sized(-size)).await?;
        Ok(())
    }

    /// Children of a directory, sorted by name.
    ///
    /// Children that vanish or cannot be decoded while listing are skipped.
    pub async fn list_children(&self, node: &Node) -> Result<Vec<Node>> {
        if !node.exists() {
            return Err(ArborError::not_found("node", self.describe(node)));
        }
        if !node.is_directory() {
            return Err(ArborError::invalid_input(format!(
                "'{}' is not a directory",
                node.name()
            )));
        }
        let entries = self
            .index
            .children(node.id())
            .ok_or_else(|| ArborError::not_found("node", node.id().as_str()))?;

        let mut children = Vec::with_capacity(entries.len());
        for (name, id) in entries {
            match self.resolver.load_node(&id).await {
                Ok(child) => children.push(child),
                Err(e) if e.is_not_found() => {
                    debug!("Child '{}' of {} vanished while listing", name, node.id());
                }
                Err(e) => warn!("Skipping child '{}' of {}: {}", name, node.id(), e),
            }
        }
        Ok(children)
    }

    /// External path of a linked node.
    pub fn resolve_id_to_path(&self, id: &NodeId) -> Result<VirtualPath> {
        self.index.path_of(id)
    }

    /// Write arbitrary metadata. Keys are given without the namespace prefix.
    pub async fn set_arbitrary_metadata(
        &self,
        node: &Node,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        if !node.exists() {
            return Err(ArborError::not_found("node", self.describe(node)));
        }
        for key in metadata.keys() {
            validate_component("metadata key", key)?;
        }

        let _structure = self.locks.structure_shared().await;
        let _guard = self.locks.write(node.id()).await;
        if !self.index.contains(node.id()) {
            return Err(ArborError::not_found("node", node.id().as_str()));
        }

        for (key, value) in metadata {
            self.store
                .set(node.id(), &format!("{}{}", METADATA_PREFIX, key), value.as_bytes())
                .await?;
        }
        debug!("Set {} metadata keys on {}", metadata.len(), node.id());

        self.propagate_above(node).await
    }

    /// Remove arbitrary metadata keys. Keys that are not set are ignored.
    pub async fn unset_arbitrary_metadata(&self, node: &Node, keys: &[String]) -> Result<()> {
        if !node.exists() {
            return Err(ArborError::not_found("node", self.describe(node)));
        }
        for key in keys {
            validate_component("metadata key", key)?;
        }

        let _structure = self.locks.structure_shared().await;
        let _guard = self.locks.write(node.id()).await;
        if !self.index.contains(node.id()) {
            return Err(ArborError::not_found("node", node.id().as_str()));
        }

        for key in keys {
            match self
                .store
                .remove(node.id(), &format!("{}{}", METADATA_PREFIX, key))
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        self.propagate_above(node).await
    }

    /// Record that the content of `node` changed by `size_delta` bytes.
    ///
    /// The node itself and its ancestors are updated.
    pub async fn record_content_change(&self, node: &Node, size_delta: i64) -> Result<()> {
        if !node.exists() {
            return Err(ArborError::not_found("node", self.describe(node)));
        }
        let _structure = self.locks.structure_shared().await;
        let _guard = self.locks.write(node.id()).await;
        if !self.index.contains(node.id()) {
            return Err(ArborError::not_found("node", node.id().as_str()));
        }
        self.propagator
            .propagate(node.id(), Change::sized(size_delta))
            .await?;
        Ok(())
    }

    /// Copy the descriptive attributes of `source` to `target`.
    ///
    /// Identity, aggregate, reference and trash keys stay with their node.
    pub async fn copy_metadata(&self, source: &Node, target: &Node) -> Result<()> {
        if !source.exists() {
            return Err(ArborError::not_found("node", self.describe(source)));
        }
        if !target.exists() {
            return Err(ArborError::not_found("node", self.describe(target)));
        }

        let _structure = self.locks.structure_shared().await;
        let _guard = self.locks.write(target.id()).await;

        let attrs = self.store.get_all(source.id()).await?;
        let mut copied = 0;
        for (key, value) in attrs.iter() {
            match AttributeCategory::of(key) {
                AttributeCategory::Identity
                | AttributeCategory::Propagation
                | AttributeCategory::Reference
                | AttributeCategory::Trash
                | AttributeCategory::Foreign => continue,
                _ => {
                    self.store.set(target.id(), key, value).await?;
                    copied += 1;
                }
            }
        }
        debug!("Copied {} attributes from {} to {}", copied, source.id(), target.id());
        Ok(())
    }

    /// Mark `node` so that propagation does not continue past it.
    pub async fn mark_propagation_root(&self, node: &Node) -> Result<()> {
        if !node.exists() {
            return Err(ArborError::not_found("node", self.describe(node)));
        }
        let _guard = self.locks.write(node.id()).await;
        self.store
            .set(node.id(), attributes::PROPAGATION, attributes::PROPAGATION_ROOT)
            .await
    }

    /// Verify the in-memory index against its own invariants.
    pub fn check_consistency(&self) -> Result<()> {
        self.index.check_invariants()
    }

    async fn propagate_above(&self, node: &Node) -> Result<()> {
        if let Some(parent) = self.index.parent(node.id()) {
            self.propagator.propagate(&parent, Change::touch()).await?;
        }
        Ok(())
    }

    fn is_share_folder(&self, id: &NodeId) -> bool {
        let share_folder = self.resolver.config().share_folder_name();
        self.index.parent(id).is_some_and(|p| p.is_root())
            && self.index.location(id).is_some_and(|(_, name)| name == share_folder)
    }

    async fn holds_references(&self, id: &NodeId) -> Result<bool> {
        let Some(entries) = self.index.children(id) else {
            return Ok(false);
        };
        for (_, child) in entries {
            if self.resolver.load_node_unlocked(&child).await?.is_reference() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn accounted_size(&self, node: &Node) -> i64 {
        match node.tree_size() {
            Ok(size) => size.unwrap_or(0).min(i64::MAX as u64) as i64,
            Err(e) => {
                warn!("Ignoring tree size of {}: {}", node.id(), e);
                0
            }
        }
    }

    fn describe(&self, node: &Node) -> String {
        if node.exists() {
            return match self.index.path_of(node.id()) {
                Ok(path) => path.to_string(),
                Err(_) => node.id().to_string(),
            };
        }
        match node.parent_id().map(|p| self.index.path_of(p)) {
            Some(Ok(parent)) => parent
                .join(node.name())
                .map(|p| p.to_string())
                .unwrap_or_else(|_| node.name().to_string()),
            _ => node.name().to_string(),
        }
    }
}
