//! Attribute namespace layout and the typed attribute bag.
//!
//! Every piece of node state is stored as a namespaced key on the node's
//! backing object. The key layout is shared with existing on-disk trees and
//! must not change.

use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Common prefix of every engine-owned attribute.
pub const PREFIX: &str = "user.ocis.";

/// Id of the containing node
pub const PARENT_ID: &str = concat!("user.ocis.", "parentid");
/// Opaque id of the owning principal
pub const OWNER_ID: &str = concat!("user.ocis.", "owner.id");
/// Identity provider of the owning principal
pub const OWNER_IDP: &str = concat!("user.ocis.", "owner.idp");
/// Current base name, updated on rename and move
pub const NAME: &str = concat!("user.ocis.", "name");

/// Sharing grants
pub const ACL_PREFIX: &str = concat!("user.ocis.", "acl.");
/// Arbitrary client metadata
pub const METADATA_PREFIX: &str = concat!("user.ocis.", "md.");

/// Temporary etag of a folder, cleared when propagation reaches it
pub const TMP_ETAG: &str = concat!("user.ocis.", "tmp.etag");
/// Target URI of a reference node
pub const REFERENCE: &str = concat!("user.ocis.", "cs3.ref");
/// Original path of a trashed node
pub const TRASH_ORIGIN: &str = concat!("user.ocis.", "trash.origin");

/// Propagation control. `1` marks a propagation root.
pub const PROPAGATION: &str = concat!("user.ocis.", "propagation");
/// Modification time of the tree below the node, RFC 3339 with nanoseconds
pub const TREE_MTIME: &str = concat!("user.ocis.", "tmtime");
/// Aggregate size of the tree below the node, decimal bytes
pub const TREE_SIZE: &str = concat!("user.ocis.", "treesize");

/// Value stored under [`PROPAGATION`] on propagation roots.
pub const PROPAGATION_ROOT: &[u8] = b"1";

/// Functional category of an attribute key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeCategory {
    Identity,
    Metadata,
    Acl,
    Propagation,
    Reference,
    Trash,
    /// Engine-prefixed key the engine does not know
    Unknown,
    /// Key outside the engine namespace
    Foreign,
}

impl AttributeCategory {
    /// Classify a key by its prefix.
    pub fn of(key: &str) -> Self {
        match key {
            PARENT_ID | OWNER_ID | OWNER_IDP | NAME => Self::Identity,
            PROPAGATION | TREE_MTIME | TREE_SIZE | TMP_ETAG => Self::Propagation,
            REFERENCE => Self::Reference,
            TRASH_ORIGIN => Self::Trash,
            k if k.starts_with(METADATA_PREFIX) => Self::Metadata,
            k if k.starts_with(ACL_PREFIX) => Self::Acl,
            k if k.starts_with(PREFIX) => Self::Unknown,
            _ => Self::Foreign,
        }
    }
}

/// Encode a timestamp the way tree times are stored.
pub fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// The attribute bag of one node, with typed accessors.
///
/// Decode failures carry the node id and key so they can be diagnosed
/// without any storage location.
#[derive(Debug, Clone, PartialEq)]
pub struct Attributes {
    node: NodeId,
    values: BTreeMap<String, Vec<u8>>,
}

impl Attributes {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            values: BTreeMap::new(),
        }
    }

    pub fn from_map(node: NodeId, values: BTreeMap<String, Vec<u8>>) -> Self {
        Self { node, values }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.values.get(key).map(|v| v.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a UTF-8 attribute.
    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(raw) => std::str::from_utf8(raw)
                .map(Some)
                .map_err(|e| ArborError::decode(self.node.as_str(), key, e.to_string())),
        }
    }

    /// Get a node id attribute.
    pub fn get_id(&self, key: &str) -> Result<Option<NodeId>> {
        match self.get_str(key)? {
            None => Ok(None),
            Some(raw) => NodeId::parse(raw).map(Some).ok_or_else(|| {
                ArborError::decode(self.node.as_str(), key, format!("invalid node id '{}'", raw))
            }),
        }
    }

    /// Get an RFC 3339 timestamp attribute.
    pub fn get_time(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get_str(key)? {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| ArborError::decode(self.node.as_str(), key, e.to_string())),
        }
    }

    /// Get a decimal unsigned attribute.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get_str(key)? {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| ArborError::decode(self.node.as_str(), key, e.to_string())),
        }
    }

    /// Whether `key` holds the flag value `1`.
    pub fn is_flag_set(&self, key: &str) -> bool {
        self.values.get(key).map(|v| v.as_slice()) == Some(PROPAGATION_ROOT)
    }

    /// Arbitrary metadata with the namespace prefix stripped.
    ///
    /// Values that are not UTF-8 are reported, not skipped.
    pub fn metadata(&self) -> Result<BTreeMap<String, String>> {
        let mut metadata = BTreeMap::new();
        for (key, value) in self.values.range(METADATA_PREFIX.to_string()..) {
            let Some(short) = key.strip_prefix(METADATA_PREFIX) else {
                break;
            };
            let value = std::str::from_utf8(value)
                .map_err(|e| ArborError::decode(self.node.as_str(), key, e.to_string()))?;
            metadata.insert(short.to_string(), value.to_string());
        }
        Ok(metadata)
    }

    /// Attributes in `category`.
    pub fn in_category(&self, category: AttributeCategory) -> impl Iterator<Item = (&str, &[u8])> {
        self.iter()
            .filter(move |(k, _)| AttributeCategory::of(k) == category)
    }
}
