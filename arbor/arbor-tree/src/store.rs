//! The attribute store adapter.
//!
//! A backing object is an opaque, id-named container with a bag of
//! namespaced attributes and, for directories, a set of named entries
//! pointing at child objects. Every single-key write and every single entry
//! change is atomic; nothing spans several keys or several objects.

use crate::attributes::Attributes;
use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Kind of a backing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Directory,
    File,
}

impl ObjectKind {
    pub fn is_directory(&self) -> bool {
        matches!(self, ObjectKind::Directory)
    }
}

/// Storage backend for node objects and their attributes.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Allocate a new, unlinked object. Fails if `id` is taken.
    async fn create_object(&self, id: &NodeId, kind: ObjectKind) -> Result<()>;

    /// Kind of the object, or `None` if it does not exist
    async fn object_kind(&self, id: &NodeId) -> Result<Option<ObjectKind>>;

    /// Read one attribute. Missing keys are `NotFound`.
    async fn get(&self, id: &NodeId, key: &str) -> Result<Vec<u8>>;

    /// Write one attribute
    async fn set(&self, id: &NodeId, key: &str, value: &[u8]) -> Result<()>;

    /// List attribute keys of an object
    async fn list(&self, id: &NodeId) -> Result<Vec<String>>;

    /// Remove one attribute. Missing keys are `NotFound`.
    async fn remove(&self, id: &NodeId, key: &str) -> Result<()>;

    /// Add the entry `name -> child` to a directory. Fails if `name` is taken.
    async fn link(&self, parent: &NodeId, name: &str, child: &NodeId) -> Result<()>;

    /// Remove the entry `name` from a directory
    async fn unlink(&self, parent: &NodeId, name: &str) -> Result<()>;

    /// Look up a directory entry
    async fn lookup(&self, parent: &NodeId, name: &str) -> Result<Option<NodeId>>;

    /// All entries of a directory, sorted by name
    async fn entries(&self, parent: &NodeId) -> Result<Vec<(String, NodeId)>>;

    /// Atomically move an entry, possibly between directories.
    async fn relink(
        &self,
        old_parent: &NodeId,
        old_name: &str,
        new_parent: &NodeId,
        new_name: &str,
    ) -> Result<()>;

    /// Where the content collaborator keeps the bytes of this object, if the
    /// backend has such a location.
    fn content_location(&self, id: &NodeId) -> Option<PathBuf>;

    /// Read the whole attribute bag.
    ///
    /// A key that disappears between listing and reading is left out.
    async fn get_all(&self, id: &NodeId) -> Result<Attributes> {
        let mut values = BTreeMap::new();
        for key in self.list(id).await? {
            match self.get(id, &key).await {
                Ok(value) => {
                    values.insert(key, value);
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Attributes::from_map(id.clone(), values))
    }

    /// Read one attribute, mapping a missing key to `None`.
    async fn get_opt(&self, id: &NodeId, key: &str) -> Result<Option<Vec<u8>>> {
        match self.get(id, key).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Reject keys and entry names that cannot be stored safely.
pub(crate) fn validate_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.starts_with(".tmp-")
        || value.contains('/')
        || value.contains('\0')
    {
        return Err(ArborError::invalid_input(format!("invalid {} '{}'", what, value)));
    }
    Ok(())
}
