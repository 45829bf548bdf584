//! Path and reference resolution.

use crate::index::TreeIndex;
use crate::layout::LayoutTemplate;
use crate::locks::NodeLocks;
use crate::node::{Node, ResourceRef};
use crate::path::VirtualPath;
use crate::principal::Principal;
use crate::store::AttributeStore;
use arbor_core::config::EngineConfig;
use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

/// Turns paths and resource references into nodes.
#[derive(Clone)]
pub struct PathResolver {
    store: Arc<dyn AttributeStore>,
    index: Arc<TreeIndex>,
    locks: Arc<NodeLocks>,
    config: Arc<EngineConfig>,
}

impl PathResolver {
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

    /// Load a linked node by id.
    pub async fn load_node(&self, id: &NodeId) -> Result<Node> {
        let _guard = self.locks.read(id).await;
        self.load_node_unlocked(id).await
    }

    /// Load a linked node by id. The caller holds a lock on the node.
    ///
    /// Nodes that are not linked into the tree (trashed or never linked)
    /// are `NotFound`. A node whose stored parent and name disagree with
    /// the index is corrupt.
    pub(crate) async fn load_node_unlocked(&self, id: &NodeId) -> Result<Node> {
        let Some((parent, name)) = self.index.location(id) else {
            return Err(ArborError::not_found("node", id.as_str()));
        };
        let kind = self.store.object_kind(id).await?.ok_or_else(|| {
            ArborError::corruption(id.as_str(), "indexed but missing from the store")
        })?;
        let attributes = self.store.get_all(id).await?;
        let node = Node::from_attributes(id.clone(), kind, attributes)?;

        if node.parent_id() != parent.as_ref() || (!node.is_root() && node.name() != name) {
            return Err(ArborError::corruption(
                id.as_str(),
                format!(
                    "stored location {}/{} disagrees with the tree",
                    node.parent_id().map(NodeId::as_str).unwrap_or("-"),
                    node.name()
                ),
            ));
        }
        Ok(node)
    }

    pub async fn root_node(&self) -> Result<Node> {
        self.load_node(&NodeId::root()).await
    }

    /// Resolve a path from the root.
    ///
    /// A missing last segment yields a prospective node; a missing
    /// intermediate segment is `NotFound`.
    pub async fn node_from_path(&self, path: &VirtualPath) -> Result<Node> {
        debug!("Resolving path {}", path);
        let root = self.root_node().await?;
        self.walk_path(root, path, |node| Box::pin(async move { Ok(node) }))
            .await
    }

    /// Resolve a resource reference.
    ///
    /// Id references resolve the id directly, so they keep working across
    /// renames, then walk the optional sub-path from there.
    pub async fn node_from_resource_reference(&self, reference: &ResourceRef) -> Result<Node> {
        match reference {
            ResourceRef::Path(path) => self.node_from_path(path).await,
            ResourceRef::Id { id, path } => {
                let node = self.load_node(id).await?;
                match path {
                    Some(path) => {
                        self.walk_path(node, path, |n| Box::pin(async move { Ok(n) }))
                            .await
                    }
                    None => Ok(node),
                }
            }
        }
    }

    /// Walk `relative` from `start`, one segment at a time.
    ///
    /// `on_step` sees every node along the way, including prospective ones,
    /// and returns the node the walk continues from, so it may create
    /// missing directories. The walk fails with `NotFound` if a step is still
    /// missing after the callback and more segments follow, and with
    /// `InvalidInput` if it would descend into a non-directory.
    pub async fn walk_path<'a, F>(
        &self,
        start: Node,
        relative: &VirtualPath,
        mut on_step: F,
    ) -> Result<Node>
    where
        F: FnMut(Node) -> BoxFuture<'a, Result<Node>>,
    {
        let mut current = start;
        let segments = relative.segments();

        for (i, segment) in segments.iter().enumerate() {
            if !current.exists() {
                return Err(ArborError::not_found("path", relative.to_string()));
            }
            if !current.is_directory() {
                return Err(ArborError::invalid_input(format!(
                    "'{}' is not a directory",
                    current.name()
                )));
            }

            let next = self.child(&current, segment).await?;
            current = on_step(next).await?;

            if !current.exists() && i + 1 < segments.len() {
                return Err(ArborError::not_found("path", relative.to_string()));
            }
        }
        Ok(current)
    }

    /// The child `name` of `parent`, or a prospective node if there is none.
    pub async fn child(&self, parent: &Node, name: &str) -> Result<Node> {
        match self.index.child(parent.id(), name) {
            Some(id) => self.load_node(&id).await,
            None => Ok(Node::prospective(parent.id().clone(), name)),
        }
    }

    /// Render the configured home layout for `principal`.
    pub fn mandatory_layout(&self, principal: &Principal) -> Result<VirtualPath> {
        LayoutTemplate::parse(self.config.user_layout.as_str())?.render(principal)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
