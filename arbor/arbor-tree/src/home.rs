//! Per-principal home directories.

use crate::node::Node;
use crate::path::VirtualPath;
use crate::principal::Principal;
use crate::tree::Tree;
use arbor_core::error::{ArborError, Result};
use tracing::info;

#[derive(Clone)]
pub struct HomeProvisioner {
    tree: Tree,
}

impl HomeProvisioner {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    fn ensure_enabled(&self) -> Result<()> {
        let config = self.tree.resolver().config();
        if !config.enable_home || config.user_layout.trim().is_empty() {
            return Err(ArborError::not_supported("home directories are disabled"));
        }
        Ok(())
    }

    /// Make sure the home of `principal` exists.
    ///
    /// Missing directories along the layout are created; the home itself is
    /// owned by the principal. With tree-time accounting the home becomes a
    /// propagation root.
    pub async fn create_home(&self, principal: &Principal) -> Result<Node> {
        self.ensure_enabled()?;
        let resolver = self.tree.resolver();
        let layout = resolver.mandatory_layout(principal)?;
        let depth = layout.len();

        let tree = &self.tree;
        let mut step = 0;
        let home = resolver
            .walk_path(resolver.root_node().await?, &layout, |node| {
                step += 1;
                let owner = (step == depth).then(|| principal.id.clone());
                Box::pin(async move {
                    if node.exists() {
                        return Ok(node);
                    }
                    let prospective = match &owner {
                        Some(owner) => node.clone().with_owner(owner),
                        None => node.clone(),
                    };
                    match tree.create_directory(&prospective).await {
                        Ok(created) => Ok(created),
                        // created concurrently
                        Err(e) if e.is_already_exists() => {
                            let parent = match node.parent_id() {
                                Some(parent) => tree.resolver().load_node(parent).await?,
                                None => return Err(e),
                            };
                            tree.resolver().child(&parent, node.name()).await
                        }
                        Err(e) => Err(e),
                    }
                })
            })
            .await?;

        if resolver.config().tree_time_accounting && !home.is_propagation_root() {
            self.tree.mark_propagation_root(&home).await?;
        }
        info!("Home of {} is ready at {}", principal.id, layout);
        resolver.load_node(home.id()).await
    }

    /// External path of the home of `principal`. Nothing is created.
    pub fn get_home(&self, principal: &Principal) -> Result<VirtualPath> {
        self.ensure_enabled()?;
        self.tree.resolver().mandatory_layout(principal)
    }
}
