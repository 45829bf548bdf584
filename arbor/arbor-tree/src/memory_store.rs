//! In-memory attribute store.
//!
//! Used for tests and ephemeral engines. All objects live behind a single
//! lock, so every operation (including cross-directory `relink`) is atomic.

use crate::store::{validate_component, AttributeStore, ObjectKind};
use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug)]
struct MemoryObject {
    kind: ObjectKind,
    attrs: BTreeMap<String, Vec<u8>>,
    entries: BTreeMap<String, NodeId>,
}

/// Attribute store keeping every object in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<NodeId, MemoryObject>>,
    failing_writes: RwLock<HashSet<String>>,
    failing_node_writes: RwLock<HashSet<(NodeId, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write of `key` fail with a storage error.
    ///
    /// Lets callers exercise the error paths of multi-step operations.
    pub fn fail_writes_of(&self, key: impl Into<String>) {
        self.failing_writes.write().insert(key.into());
    }

    /// Undo [`MemoryStore::fail_writes_of`].
    pub fn heal_writes_of(&self, key: &str) {
        self.failing_writes.write().remove(key);
    }

    /// Like [`MemoryStore::fail_writes_of`], limited to one object.
    pub fn fail_writes_of_on(&self, id: &NodeId, key: impl Into<String>) {
        self.failing_node_writes.write().insert((id.clone(), key.into()));
    }

    /// Number of objects, linked or not
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    fn check_write(&self, id: &NodeId, key: &str) -> Result<()> {
        let on_node = self
            .failing_node_writes
            .read()
            .contains(&(id.clone(), key.to_string()));
        if on_node || self.failing_writes.read().contains(key) {
            return Err(ArborError::storage(id.as_str(), format!("write of {} rejected", key)));
        }
        Ok(())
    }
}

fn missing_object(id: &NodeId) -> ArborError {
    ArborError::not_found("object", id.as_str())
}

fn missing_directory(id: &NodeId) -> ArborError {
    ArborError::not_found("directory", id.as_str())
}

#[async_trait]
impl AttributeStore for MemoryStore {
    async fn create_object(&self, id: &NodeId, kind: ObjectKind) -> Result<()> {
        validate_component("node id", id.as_str())?;
        let mut objects = self.objects.write();
        if objects.contains_key(id) {
            return Err(ArborError::already_exists(format!("object {}", id)));
        }
        objects.insert(
            id.clone(),
            MemoryObject {
                kind,
                attrs: BTreeMap::new(),
                entries: BTreeMap::new(),
            },
        );
        debug!("Created {:?} object {}", kind, id);
        Ok(())
    }

    async fn object_kind(&self, id: &NodeId) -> Result<Option<ObjectKind>> {
        Ok(self.objects.read().get(id).map(|o| o.kind))
    }

    async fn get(&self, id: &NodeId, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read();
        let object = objects.get(id).ok_or_else(|| missing_object(id))?;
        object
            .attrs
            .get(key)
            .cloned()
            .ok_or_else(|| ArborError::not_found("attribute", format!("{} of {}", key, id)))
    }

    async fn set(&self, id: &NodeId, key: &str, value: &[u8]) -> Result<()> {
        validate_component("attribute key", key)?;
        self.check_write(id, key)?;
        let mut objects = self.objects.write();
        let object = objects.get_mut(id).ok_or_else(|| missing_object(id))?;
        object.attrs.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn list(&self, id: &NodeId) -> Result<Vec<String>> {
        let objects = self.objects.read();
        let object = objects.get(id).ok_or_else(|| missing_object(id))?;
        Ok(object.attrs.keys().cloned().collect())
    }

    async fn remove(&self, id: &NodeId, key: &str) -> Result<()> {
        self.check_write(id, key)?;
        let mut objects = self.objects.write();
        let object = objects.get_mut(id).ok_or_else(|| missing_object(id))?;
        object
            .attrs
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ArborError::not_found("attribute", format!("{} of {}", key, id)))
    }

    async fn link(&self, parent: &NodeId, name: &str, child: &NodeId) -> Result<()> {
        validate_component("name", name)?;
        let mut objects = self.objects.write();
        let dir = objects
            .get_mut(parent)
            .filter(|o| o.kind.is_directory())
            .ok_or_else(|| missing_directory(parent))?;
        if dir.entries.contains_key(name) {
            return Err(ArborError::already_exists(format!("entry {} in {}", name, parent)));
        }
        dir.entries.insert(name.to_string(), child.clone());
        Ok(())
    }

    async fn unlink(&self, parent: &NodeId, name: &str) -> Result<()> {
        let mut objects = self.objects.write();
        let dir = objects
            .get_mut(parent)
            .ok_or_else(|| missing_directory(parent))?;
        dir.entries
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ArborError::not_found("entry", format!("{} in {}", name, parent)))
    }

    async fn lookup(&self, parent: &NodeId, name: &str) -> Result<Option<NodeId>> {
        let objects = self.objects.read();
        let dir = objects.get(parent).ok_or_else(|| missing_directory(parent))?;
        Ok(dir.entries.get(name).cloned())
    }

    async fn entries(&self, parent: &NodeId) -> Result<Vec<(String, NodeId)>> {
        let objects = self.objects.read();
        let dir = objects.get(parent).ok_or_else(|| missing_directory(parent))?;
        Ok(dir
            .entries
            .iter()
            .map(|(name, id)| (name.clone(), id.clone()))
            .collect())
    }

    async fn relink(
        &self,
        old_parent: &NodeId,
        old_name: &str,
        new_parent: &NodeId,
        new_name: &str,
    ) -> Result<()> {
        validate_component("name", new_name)?;
        let mut objects = self.objects.write();

        match objects.get(new_parent) {
            Some(o) if o.kind.is_directory() => {}
            _ => return Err(missing_directory(new_parent)),
        }

        let child = objects
            .get_mut(old_parent)
            .and_then(|dir| dir.entries.remove(old_name))
            .ok_or_else(|| {
                ArborError::not_found("entry", format!("{} in {}", old_name, old_parent))
            })?;

        if let Some(dir) = objects.get_mut(new_parent) {
            dir.entries.insert(new_name.to_string(), child);
        }
        Ok(())
    }

    fn content_location(&self, _id: &NodeId) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_attribute_roundtrip() {
        let store = MemoryStore::new();
        store.create_object(&id("a"), ObjectKind::File).await.unwrap();

        store.set(&id("a"), "user.ocis.name", b"a.txt").await.unwrap();
        assert_eq!(store.get(&id("a"), "user.ocis.name").await.unwrap(), b"a.txt");
        assert_eq!(store.list(&id("a")).await.unwrap(), vec!["user.ocis.name"]);

        store.remove(&id("a"), "user.ocis.name").await.unwrap();
        assert!(store.get(&id("a"), "user.ocis.name").await.unwrap_err().is_not_found());
        assert!(store.remove(&id("a"), "user.ocis.name").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_object_rejected() {
        let store = MemoryStore::new();
        store.create_object(&id("a"), ObjectKind::Directory).await.unwrap();
        let err = store.create_object(&id("a"), ObjectKind::Directory).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_entries_and_relink() {
        let store = MemoryStore::new();
        for name in ["p1", "p2"] {
            store.create_object(&id(name), ObjectKind::Directory).await.unwrap();
        }
        store.create_object(&id("c"), ObjectKind::File).await.unwrap();

        store.link(&id("p1"), "child", &id("c")).await.unwrap();
        assert!(store.link(&id("p1"), "child", &id("c")).await.unwrap_err().is_already_exists());
        assert!(store.link(&id("c"), "x", &id("p1")).await.unwrap_err().is_not_found());

        store.relink(&id("p1"), "child", &id("p2"), "renamed").await.unwrap();
        assert_eq!(store.lookup(&id("p1"), "child").await.unwrap(), None);
        assert_eq!(store.lookup(&id("p2"), "renamed").await.unwrap(), Some(id("c")));

        store.unlink(&id("p2"), "renamed").await.unwrap();
        assert!(store.entries(&id("p2")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = MemoryStore::new();
        store.create_object(&id("a"), ObjectKind::Directory).await.unwrap();
        store.fail_writes_of("user.ocis.tmtime");

        assert!(store.set(&id("a"), "user.ocis.tmtime", b"x").await.is_err());
        assert!(store.set(&id("a"), "user.ocis.name", b"x").await.is_ok());

        store.heal_writes_of("user.ocis.tmtime");
        assert!(store.set(&id("a"), "user.ocis.tmtime", b"x").await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_write_failure_on_one_object() {
        let store = MemoryStore::new();
        for name in ["a", "b"] {
            store.create_object(&id(name), ObjectKind::Directory).await.unwrap();
        }
        store.fail_writes_of_on(&id("a"), "user.ocis.treesize");

        assert!(store.set(&id("a"), "user.ocis.treesize", b"1").await.is_err());
        assert!(store.set(&id("b"), "user.ocis.treesize", b"1").await.is_ok());
    }

    #[tokio::test]
    async fn test_get_all() {
        let store = MemoryStore::new();
        store.create_object(&id("a"), ObjectKind::Directory).await.unwrap();
        store.set(&id("a"), "user.ocis.md.k", b"v").await.unwrap();

        let attrs = store.get_all(&id("a")).await.unwrap();
        assert_eq!(attrs.node(), &id("a"));
        assert_eq!(attrs.metadata().unwrap().get("k").map(String::as_str), Some("v"));
    }
}
