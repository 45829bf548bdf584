//! Reference nodes in the share folder.
//!
//! A reference grafts a pointer to an external resource into the tree. It
//! is a directory-like node directly below the configured share folder that
//! carries the target URI and no content of its own.

use crate::attributes;
use crate::node::Node;
use crate::path::VirtualPath;
use crate::tree::Tree;
use arbor_core::error::{ArborError, Result};
use tracing::{debug, info};
use url::Url;

#[derive(Clone)]
pub struct References {
    tree: Tree,
}

impl References {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Create a reference at `<share folder>/<name>` pointing at `target`.
    ///
    /// Any other path is `PermissionDenied`. The share folder is created on
    /// first use. A name that is already taken is `AlreadyExists`.
    pub async fn create_reference(&self, path: &VirtualPath, target: &Url) -> Result<Node> {
        let share_folder = self.tree.resolver().config().share_folder_name().to_string();
        let (folder, name) = match path.segments() {
            [folder, name] => (folder, name),
            _ => {
                return Err(ArborError::permission_denied(format!(
                    "references must be a child of the share folder /{}: {}",
                    share_folder, path
                )));
            }
        };
        if *folder != share_folder {
            return Err(ArborError::permission_denied(format!(
                "cannot create references outside the share folder /{}: {}",
                share_folder, path
            )));
        }

        let shares = self.share_folder().await?;
        let candidate = self.tree.resolver().child(&shares, name).await?;
        if candidate.exists() {
            return Err(ArborError::already_exists(path.to_string()));
        }

        let reference = self
            .tree
            .create_directory(&candidate.with_attribute(attributes::REFERENCE, target.as_str()))
            .await?;
        info!("Created reference {} -> {}", path, target);
        Ok(reference)
    }

    async fn share_folder(&self) -> Result<Node> {
        let resolver = self.tree.resolver();
        let root = resolver.root_node().await?;
        let folder = resolver
            .child(&root, resolver.config().share_folder_name())
            .await?;
        if folder.exists() {
            return Ok(folder);
        }

        match self.tree.create_directory(&folder).await {
            Ok(created) => {
                debug!("Created share folder {}", resolver.config().share_folder);
                Ok(created)
            }
            // created concurrently
            Err(e) if e.is_already_exists() => {
                resolver
                    .child(&root, resolver.config().share_folder_name())
                    .await
            }
            Err(e) => Err(e),
        }
    }
}
