//! On-disk attribute store.
//!
//! Layout below the storage root:
//!
//! ```text
//! <root>/
//! ├── nodes/
//! │   └── <id>/
//! │       ├── attrs/<key>        # one file per attribute
//! │       ├── children/<name>    # directories only, file holds the child id
//! │       └── content            # file bytes, owned by the content collaborator
//! ├── uploads/
//! └── trash/
//! ```
//!
//! Attribute values and entries are written to a temporary file inside the
//! object directory and then renamed into place, so every single write is
//! atomic. New entries are published with a hard link, which fails instead
//! of replacing an existing entry.

use crate::store::{validate_component, AttributeStore, ObjectKind};
use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

const NODES_DIR: &str = "nodes";
const UPLOADS_DIR: &str = "uploads";
const TRASH_DIR: &str = "trash";
const ATTRS_DIR: &str = "attrs";
const CHILDREN_DIR: &str = "children";
const CONTENT_FILE: &str = "content";

/// Attribute store on a local filesystem.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open the store at `root`, creating the data directories if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [NODES_DIR, UPLOADS_DIR, TRASH_DIR] {
            fs::create_dir_all(root.join(dir)).await.map_err(|e| {
                ArborError::storage("-", format!("could not create data dir {}: {}", dir, e))
            })?;
        }
        info!("Opened disk store at {}", root.display());
        Ok(Self { root })
    }

    /// Directory where trash records are kept
    pub fn trash_dir(&self) -> PathBuf {
        self.root.join(TRASH_DIR)
    }

    /// Directory reserved for in-flight uploads
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    fn object_dir(&self, id: &NodeId) -> PathBuf {
        self.root.join(NODES_DIR).join(id.as_str())
    }

    fn attr_path(&self, id: &NodeId, key: &str) -> PathBuf {
        self.object_dir(id).join(ATTRS_DIR).join(key)
    }

    fn entry_path(&self, parent: &NodeId, name: &str) -> PathBuf {
        self.object_dir(parent).join(CHILDREN_DIR).join(name)
    }

    fn temp_path(&self, id: &NodeId) -> PathBuf {
        self.object_dir(id).join(format!(".tmp-{}", Uuid::new_v4()))
    }

    async fn require_object(&self, id: &NodeId) -> Result<()> {
        if fs::metadata(self.object_dir(id)).await.is_err() {
            return Err(ArborError::not_found("object", id.as_str()));
        }
        Ok(())
    }

    async fn require_directory(&self, id: &NodeId) -> Result<()> {
        match self.object_kind(id).await? {
            Some(ObjectKind::Directory) => Ok(()),
            _ => Err(ArborError::not_found("directory", id.as_str())),
        }
    }

    /// Write `value` to a temporary file in the object directory and rename
    /// it onto `target`.
    async fn write_atomic(&self, id: &NodeId, target: &Path, value: &[u8]) -> Result<()> {
        let temp = self.temp_path(id);
        fs::write(&temp, value).await.map_err(|e| io_error(id, e))?;
        if let Err(e) = fs::rename(&temp, target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(io_error(id, e));
        }
        Ok(())
    }
}

fn io_error(id: &NodeId, e: std::io::Error) -> ArborError {
    ArborError::storage(id.as_str(), e.to_string())
}

fn decode_entry(parent: &NodeId, name: &str, raw: &[u8]) -> Result<NodeId> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| NodeId::parse(s.trim()))
        .ok_or_else(|| {
            ArborError::corruption(parent.as_str(), format!("unreadable entry '{}'", name))
        })
}

#[async_trait]
impl AttributeStore for DiskStore {
    async fn create_object(&self, id: &NodeId, kind: ObjectKind) -> Result<()> {
        validate_component("node id", id.as_str())?;
        let dir = self.object_dir(id);
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                return Err(ArborError::already_exists(format!("object {}", id)));
            }
            Err(e) => return Err(io_error(id, e)),
        }
        fs::create_dir(dir.join(ATTRS_DIR))
            .await
            .map_err(|e| io_error(id, e))?;
        if kind.is_directory() {
            fs::create_dir(dir.join(CHILDREN_DIR))
                .await
                .map_err(|e| io_error(id, e))?;
        }
        debug!("Created {:?} object {}", kind, id);
        Ok(())
    }

    async fn object_kind(&self, id: &NodeId) -> Result<Option<ObjectKind>> {
        let dir = self.object_dir(id);
        match fs::metadata(&dir).await {
            Ok(_) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(id, e)),
        }
        match fs::metadata(dir.join(CHILDREN_DIR)).await {
            Ok(meta) if meta.is_dir() => Ok(Some(ObjectKind::Directory)),
            Ok(_) => Ok(Some(ObjectKind::File)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Some(ObjectKind::File)),
            Err(e) => Err(io_error(id, e)),
        }
    }

    async fn get(&self, id: &NodeId, key: &str) -> Result<Vec<u8>> {
        validate_component("attribute key", key)?;
        match fs::read(self.attr_path(id, key)).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(ArborError::not_found(
                "attribute",
                format!("{} of {}", key, id),
            )),
            Err(e) => Err(io_error(id, e)),
        }
    }

    async fn set(&self, id: &NodeId, key: &str, value: &[u8]) -> Result<()> {
        validate_component("attribute key", key)?;
        self.require_object(id).await?;
        self.write_atomic(id, &self.attr_path(id, key), value).await
    }

    async fn list(&self, id: &NodeId) -> Result<Vec<String>> {
        let mut read_dir = match fs::read_dir(self.object_dir(id).join(ATTRS_DIR)).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(ArborError::not_found("object", id.as_str()));
            }
            Err(e) => return Err(io_error(id, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_error(id, e))? {
            if let Ok(key) = entry.file_name().into_string() {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn remove(&self, id: &NodeId, key: &str) -> Result<()> {
        validate_component("attribute key", key)?;
        match fs::remove_file(self.attr_path(id, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(ArborError::not_found(
                "attribute",
                format!("{} of {}", key, id),
            )),
            Err(e) => Err(io_error(id, e)),
        }
    }

    async fn link(&self, parent: &NodeId, name: &str, child: &NodeId) -> Result<()> {
        validate_component("name", name)?;
        self.require_directory(parent).await?;

        let temp = self.temp_path(parent);
        fs::write(&temp, child.as_str().as_bytes())
            .await
            .map_err(|e| io_error(parent, e))?;
        let result = fs::hard_link(&temp, self.entry_path(parent, name)).await;
        let _ = fs::remove_file(&temp).await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => Err(ArborError::already_exists(
                format!("entry {} in {}", name, parent),
            )),
            Err(e) => Err(io_error(parent, e)),
        }
    }

    async fn unlink(&self, parent: &NodeId, name: &str) -> Result<()> {
        validate_component("name", name)?;
        match fs::remove_file(self.entry_path(parent, name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(ArborError::not_found(
                "entry",
                format!("{} in {}", name, parent),
            )),
            Err(e) => Err(io_error(parent, e)),
        }
    }

    async fn lookup(&self, parent: &NodeId, name: &str) -> Result<Option<NodeId>> {
        validate_component("name", name)?;
        match fs::read(self.entry_path(parent, name)).await {
            Ok(raw) => decode_entry(parent, name, &raw).map(Some),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(parent, e)),
        }
    }

    async fn entries(&self, parent: &NodeId) -> Result<Vec<(String, NodeId)>> {
        let dir = self.object_dir(parent).join(CHILDREN_DIR);
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(ArborError::not_found("directory", parent.as_str()));
            }
            Err(e) => return Err(io_error(parent, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_error(parent, e))? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            match fs::read(entry.path()).await {
                Ok(raw) => entries.push((name.clone(), decode_entry(parent, &name, &raw)?)),
                // unlinked while listing
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(parent, e)),
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn relink(
        &self,
        old_parent: &NodeId,
        old_name: &str,
        new_parent: &NodeId,
        new_name: &str,
    ) -> Result<()> {
        validate_component("name", old_name)?;
        validate_component("name", new_name)?;
        self.require_directory(new_parent).await?;

        match fs::rename(
            self.entry_path(old_parent, old_name),
            self.entry_path(new_parent, new_name),
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(ArborError::not_found(
                "entry",
                format!("{} in {}", old_name, old_parent),
            )),
            Err(e) => Err(io_error(old_parent, e)),
        }
    }

    fn content_location(&self, id: &NodeId) -> Option<PathBuf> {
        Some(self.object_dir(id).join(CONTENT_FILE))
    }
}
