//! In-memory tree index.
//!
//! The index mirrors the parent links and directory entries of every node
//! reachable from the root. It is rebuilt from the attribute store when an
//! engine opens and kept in step with every structural mutation; the store
//! stays the durable truth.

use crate::attributes;
use crate::path::VirtualPath;
use crate::store::{AttributeStore, ObjectKind};
use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct IndexEntry {
    parent: Option<NodeId>,
    name: String,
    kind: ObjectKind,
    children: BTreeMap<String, NodeId>,
}

/// Id map with parent/child adjacency.
#[derive(Debug)]
pub struct TreeIndex {
    entries: RwLock<HashMap<NodeId, IndexEntry>>,
}

impl TreeIndex {
    /// An index holding only the root.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            NodeId::root(),
            IndexEntry {
                parent: None,
                name: String::new(),
                kind: ObjectKind::Directory,
                children: BTreeMap::new(),
            },
        );
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Rebuild the index by walking the store from the root.
    ///
    /// Every reachable node must name the directory it is listed in as its
    /// parent and carry the entry name as its name. A node reachable twice
    /// means a cycle or a duplicate link. Both are reported as corruption.
    pub async fn rebuild(store: &dyn AttributeStore) -> Result<Self> {
        let index = Self::new();
        let mut queue = VecDeque::from([NodeId::root()]);

        while let Some(dir) = queue.pop_front() {
            for (name, child) in store.entries(&dir).await? {
                if index.contains(&child) {
                    return Err(ArborError::corruption(
                        child.as_str(),
                        format!("linked more than once (again as '{}' in {})", name, dir),
                    ));
                }

                let kind = store.object_kind(&child).await?.ok_or_else(|| {
                    ArborError::corruption(
                        dir.as_str(),
                        format!("entry '{}' points at missing {}", name, child),
                    )
                })?;

                let parent = store
                    .get_opt(&child, attributes::PARENT_ID)
                    .await?
                    .and_then(|raw| String::from_utf8(raw).ok());
                if parent.as_deref() != Some(dir.as_str()) {
                    return Err(ArborError::corruption(
                        child.as_str(),
                        format!(
                            "listed in {} but {} is {:?}",
                            dir,
                            attributes::PARENT_ID,
                            parent.unwrap_or_default()
                        ),
                    ));
                }

                let stored_name = store
                    .get_opt(&child, attributes::NAME)
                    .await?
                    .and_then(|raw| String::from_utf8(raw).ok());
                if stored_name.as_deref() != Some(name.as_str()) {
                    return Err(ArborError::corruption(
                        child.as_str(),
                        format!(
                            "listed as '{}' but {} is {:?}",
                            name,
                            attributes::NAME,
                            stored_name.unwrap_or_default()
                        ),
                    ));
                }

                index.insert(&dir, &name, &child, kind)?;
                if kind.is_directory() {
                    queue.push_back(child);
                }
            }
        }

        info!("Rebuilt tree index with {} nodes", index.len());
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn kind(&self, id: &NodeId) -> Option<ObjectKind> {
        self.entries.read().get(id).map(|e| e.kind)
    }

    pub fn parent(&self, id: &NodeId) -> Option<NodeId> {
        self.entries.read().get(id).and_then(|e| e.parent.clone())
    }

    /// Parent and name of a linked node. The root has no parent.
    pub fn location(&self, id: &NodeId) -> Option<(Option<NodeId>, String)> {
        self.entries
            .read()
            .get(id)
            .map(|e| (e.parent.clone(), e.name.clone()))
    }

    pub fn child(&self, parent: &NodeId, name: &str) -> Option<NodeId> {
        self.entries
            .read()
            .get(parent)
            .and_then(|e| e.children.get(name).cloned())
    }

    /// Entries of a directory, sorted by name
    pub fn children(&self, parent: &NodeId) -> Option<Vec<(String, NodeId)>> {
        self.entries.read().get(parent).map(|e| {
            e.children
                .iter()
                .map(|(name, id)| (name.clone(), id.clone()))
                .collect()
        })
    }

    /// Record a newly linked node.
    pub fn insert(&self, parent: &NodeId, name: &str, id: &NodeId, kind: ObjectKind) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(id) {
            return Err(ArborError::already_exists(format!("node {}", id)));
        }
        let dir = entries
            .get_mut(parent)
            .filter(|e| e.kind.is_directory())
            .ok_or_else(|| ArborError::not_found("directory", parent.as_str()))?;
        if dir.children.contains_key(name) {
            return Err(ArborError::already_exists(format!("entry {} in {}", name, parent)));
        }
        dir.children.insert(name.to_string(), id.clone());
        entries.insert(
            id.clone(),
            IndexEntry {
                parent: Some(parent.clone()),
                name: name.to_string(),
                kind,
                children: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Move a linked node to `new_parent` under `new_name`.
    pub fn relocate(&self, id: &NodeId, new_parent: &NodeId, new_name: &str) -> Result<()> {
        let mut entries = self.entries.write();

        let (old_parent, old_name) = match entries.get(id) {
            Some(IndexEntry {
                parent: Some(parent),
                name,
                ..
            }) => (parent.clone(), name.clone()),
            Some(_) => return Err(ArborError::permission_denied("the root cannot be moved")),
            None => return Err(ArborError::not_found("node", id.as_str())),
        };

        match entries.get(new_parent) {
            Some(dir) if dir.kind.is_directory() => {
                if dir.children.get(new_name).is_some_and(|c| c != id) {
                    return Err(ArborError::already_exists(format!(
                        "entry {} in {}",
                        new_name, new_parent
                    )));
                }
            }
            _ => return Err(ArborError::not_found("directory", new_parent.as_str())),
        }

        if let Some(dir) = entries.get_mut(&old_parent) {
            dir.children.remove(&old_name);
        }
        if let Some(dir) = entries.get_mut(new_parent) {
            dir.children.insert(new_name.to_string(), id.clone());
        }
        if let Some(entry) = entries.get_mut(id) {
            entry.parent = Some(new_parent.clone());
            entry.name = new_name.to_string();
        }
        Ok(())
    }

    /// Remove a node and its whole subtree, returning every removed id.
    pub fn detach(&self, id: &NodeId) -> Vec<NodeId> {
        let mut entries = self.entries.write();

        let Some(entry) = entries.get(id) else {
            return Vec::new();
        };
        if let Some(parent) = entry.parent.clone() {
            let name = entry.name.clone();
            if let Some(dir) = entries.get_mut(&parent) {
                dir.children.remove(&name);
            }
        }

        let mut removed = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(entry) = entries.remove(&current) {
                stack.extend(entry.children.into_values());
                removed.push(current);
            }
        }
        debug!("Detached {} nodes below {}", removed.len(), id);
        removed
    }

    /// External path of a linked node, built by walking parent links.
    pub fn path_of(&self, id: &NodeId) -> Result<VirtualPath> {
        let entries = self.entries.read();
        if !entries.contains_key(id) {
            return Err(ArborError::not_found("node", id.as_str()));
        }

        let mut names = Vec::new();
        let mut current = id.clone();
        for _ in 0..=entries.len() {
            let Some(entry) = entries.get(&current) else {
                return Err(ArborError::corruption(
                    current.as_str(),
                    format!("ancestor of {} is not linked", id),
                ));
            };
            match &entry.parent {
                None if current.is_root() => {
                    names.reverse();
                    let mut path = VirtualPath::root();
                    for name in names {
                        path = path.join(name)?;
                    }
                    return Ok(path);
                }
                None => {
                    return Err(ArborError::corruption(
                        current.as_str(),
                        "walk ended before the root",
                    ));
                }
                Some(parent) => {
                    names.push(entry.name.as_str());
                    current = parent.clone();
                }
            }
        }
        Err(ArborError::corruption(id.as_str(), "parent links form a cycle"))
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    pub fn is_same_or_ancestor(&self, ancestor: &NodeId, node: &NodeId) -> bool {
        let entries = self.entries.read();
        let mut current = Some(node.clone());
        for _ in 0..=entries.len() {
            match current {
                Some(id) if &id == ancestor => return true,
                Some(id) => current = entries.get(&id).and_then(|e| e.parent.clone()),
                None => return false,
            }
        }
        false
    }

    /// Verify that the index forms a single rooted tree with consistent
    /// adjacency.
    pub fn check_invariants(&self) -> Result<()> {
        let entries = self.entries.read();
        let root = entries
            .get(&NodeId::root())
            .ok_or_else(|| ArborError::corruption("root", "root is not indexed"))?;
        if root.parent.is_some() {
            return Err(ArborError::corruption("root", "root has a parent"));
        }

        for (id, entry) in entries.iter() {
            if let Some(parent) = &entry.parent {
                let listed = entries
                    .get(parent)
                    .and_then(|p| p.children.get(&entry.name));
                if listed != Some(id) {
                    return Err(ArborError::corruption(
                        id.as_str(),
                        format!("not listed as '{}' in its parent {}", entry.name, parent),
                    ));
                }
            } else if !id.is_root() {
                return Err(ArborError::corruption(id.as_str(), "orphan without parent"));
            }

            for (name, child) in &entry.children {
                let back = entries.get(child).and_then(|c| c.parent.as_ref());
                if back != Some(id) {
                    return Err(ArborError::corruption(
                        child.as_str(),
                        format!("entry '{}' of {} does not point back", name, id),
                    ));
                }
            }
        }
        drop(entries);

        // every node must reach the root
        for id in self.ids() {
            self.path_of(&id)?;
        }
        Ok(())
    }

    fn ids(&self) -> Vec<NodeId> {
        self.entries.read().keys().cloned().collect()
    }
}

impl Default for TreeIndex {
    fn default() -> Self {
        Self::new()
    }
}
