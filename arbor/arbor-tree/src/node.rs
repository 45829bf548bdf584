//! Nodes, resource references and the resource-info projection.

use crate::attributes::{self, AttributeCategory, Attributes};
use crate::path::VirtualPath;
use crate::principal::PrincipalId;
use crate::store::ObjectKind;
use arbor_core::error::{ArborError, Result};
use arbor_core::id::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// A node of the tree as loaded from the attribute store.
///
/// A prospective node (`exists() == false`) names a location that can be
/// created: it has an unassigned id, a valid parent and a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    parent_id: Option<NodeId>,
    name: String,
    exists: bool,
    kind: ObjectKind,
    attributes: Attributes,
}

impl Node {
    /// Decode a stored node from its attribute bag.
    ///
    /// The root has no parent and an empty name. Every other node must carry
    /// both its parent id and its name.
    pub fn from_attributes(id: NodeId, kind: ObjectKind, attributes: Attributes) -> Result<Self> {
        if id.is_root() {
            return Ok(Self {
                id,
                parent_id: None,
                name: String::new(),
                exists: true,
                kind,
                attributes,
            });
        }

        let parent_id = attributes.get_id(attributes::PARENT_ID)?.ok_or_else(|| {
            ArborError::corruption(id.as_str(), format!("missing {}", attributes::PARENT_ID))
        })?;
        let name = attributes
            .get_str(attributes::NAME)?
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                ArborError::corruption(id.as_str(), format!("missing {}", attributes::NAME))
            })?
            .to_string();

        Ok(Self {
            id,
            parent_id: Some(parent_id),
            name,
            exists: true,
            kind,
            attributes,
        })
    }

    /// A placeholder for `name` inside `parent_id` that does not exist yet.
    pub fn prospective(parent_id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id: NodeId::unassigned(),
            parent_id: Some(parent_id),
            name: name.into(),
            exists: false,
            kind: ObjectKind::Directory,
            attributes: Attributes::new(NodeId::unassigned()),
        }
    }

    /// Carry an attribute into the node's creation.
    ///
    /// Only meaningful on prospective nodes; the tree writes these before the
    /// node becomes visible.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Make the prospective node be created with an explicit owner.
    pub fn with_owner(self, owner: &PrincipalId) -> Self {
        self.with_attribute(attributes::OWNER_ID, owner.opaque_id.as_bytes())
            .with_attribute(attributes::OWNER_IDP, owner.idp.as_bytes())
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&NodeId> {
        self.parent_id.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn is_root(&self) -> bool {
        self.exists && self.id.is_root()
    }

    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Whether propagation stops at this node
    pub fn is_propagation_root(&self) -> bool {
        self.attributes.is_flag_set(attributes::PROPAGATION)
    }

    pub fn is_reference(&self) -> bool {
        self.attributes.contains(attributes::REFERENCE)
    }

    /// Target of a reference node
    pub fn reference_target(&self) -> Result<Option<Url>> {
        match self.attributes.get_str(attributes::REFERENCE)? {
            None => Ok(None),
            Some(raw) => Url::parse(raw).map(Some).map_err(|e| {
                ArborError::decode(self.id.as_str(), attributes::REFERENCE, e.to_string())
            }),
        }
    }

    /// Owner recorded on the node
    pub fn owner(&self) -> Result<Option<PrincipalId>> {
        let Some(id) = self.attributes.get_str(attributes::OWNER_ID)? else {
            return Ok(None);
        };
        let idp = self.attributes.get_str(attributes::OWNER_IDP)?.unwrap_or_default();
        Ok(Some(PrincipalId::new(id, idp)))
    }

    pub fn tree_mtime(&self) -> Result<Option<DateTime<Utc>>> {
        self.attributes.get_time(attributes::TREE_MTIME)
    }

    pub fn tree_size(&self) -> Result<Option<u64>> {
        self.attributes.get_u64(attributes::TREE_SIZE)
    }

    pub fn resource_type(&self) -> ResourceType {
        if self.is_reference() {
            ResourceType::Reference
        } else if self.is_directory() {
            ResourceType::Container
        } else {
            ResourceType::File
        }
    }

    /// Attributes to write when this prospective node is created, besides
    /// the parent id and the name.
    pub(crate) fn creation_attributes(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.attributes.iter().filter(|(key, _)| {
            *key == attributes::OWNER_ID
                || *key == attributes::OWNER_IDP
                || !matches!(
                    AttributeCategory::of(key),
                    AttributeCategory::Identity | AttributeCategory::Foreign
                )
        })
    }
}

/// Type of a resource as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Container,
    File,
    Reference,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Container => write!(f, "container"),
            ResourceType::File => write!(f, "file"),
            ResourceType::Reference => write!(f, "reference"),
        }
    }
}

/// The externally visible description of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub path: VirtualPath,
    pub exists: bool,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub owner: Option<PrincipalId>,
    pub tree_mtime: Option<DateTime<Utc>>,
    pub tree_size: Option<u64>,
    pub target: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ResourceInfo {
    /// Project `node` at `path`.
    ///
    /// `md_keys` selects which arbitrary metadata keys are included; an empty
    /// list or `*` selects all of them.
    pub fn project(node: &Node, path: VirtualPath, md_keys: &[String]) -> Result<Self> {
        let mut metadata = node.attributes().metadata()?;
        let all = md_keys.is_empty() || md_keys.iter().any(|k| k == "*");
        if !all {
            metadata.retain(|key, _| md_keys.iter().any(|k| k == key));
        }

        Ok(Self {
            id: node.id().clone(),
            parent_id: node.parent_id().cloned(),
            name: node.name().to_string(),
            path,
            exists: node.exists(),
            resource_type: node.resource_type(),
            owner: node.owner()?,
            tree_mtime: node.tree_mtime()?,
            tree_size: node.tree_size()?,
            target: node.reference_target()?.map(|u| u.to_string()),
            metadata,
        })
    }
}

/// How a caller addresses a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    /// Stable id, optionally followed by a path relative to that node
    Id {
        id: NodeId,
        path: Option<VirtualPath>,
    },
    /// Path from the tree root
    Path(VirtualPath),
}

impl ResourceRef {
    pub fn id(id: NodeId) -> Self {
        Self::Id { id, path: None }
    }

    pub fn id_with_path(id: NodeId, path: VirtualPath) -> Self {
        let path = (!path.is_root()).then_some(path);
        Self::Id { id, path }
    }

    pub fn path(path: VirtualPath) -> Self {
        Self::Path(path)
    }
}

impl From<VirtualPath> for ResourceRef {
    fn from(path: VirtualPath) -> Self {
        Self::Path(path)
    }
}

impl From<NodeId> for ResourceRef {
    fn from(id: NodeId) -> Self {
        Self::id(id)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id { id, path: None } => write!(f, "id:{}", id),
            Self::Id { id, path: Some(p) } => write!(f, "id:{}{}", id, p),
            Self::Path(p) => write!(f, "{}", p),
        }
    }
}

/// Parses `id:<id>[/<sub path>]` or a path.
impl FromStr for ResourceRef {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        let Some(rest) = s.strip_prefix("id:") else {
            return Ok(Self::Path(VirtualPath::new(s)?));
        };
        let (raw_id, sub) = match rest.split_once('/') {
            Some((id, sub)) => (id, Some(sub)),
            None => (rest, None),
        };
        let id = NodeId::parse(raw_id)
            .ok_or_else(|| ArborError::invalid_input(format!("invalid node id '{}'", raw_id)))?;
        match sub {
            Some(sub) => Ok(Self::id_with_path(id, VirtualPath::new(sub)?)),
            None => Ok(Self::id(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: &str, parent: &str, name: &str) -> Attributes {
        let mut attrs = Attributes::new(NodeId::parse(id).unwrap());
        attrs.insert(attributes::PARENT_ID, parent);
        attrs.insert(attributes::NAME, name);
        attrs
    }

    #[test]
    fn test_from_attributes() {
        let id = NodeId::parse("n1").unwrap();
        let attrs = stored("n1", "root", "docs");
        let node = Node::from_attributes(id.clone(), ObjectKind::Directory, attrs).unwrap();
        assert_eq!(node.id(), &id);
        assert_eq!(node.parent_id(), Some(&NodeId::root()));
        assert_eq!(node.name(), "docs");
        assert!(node.exists());
        assert_eq!(node.resource_type(), ResourceType::Container);
    }

    #[test]
    fn test_missing_identity_is_corruption() {
        let id = NodeId::parse("n1").unwrap();
        let mut attrs = stored("n1", "root", "docs");
        attrs.remove(attributes::NAME);
        let err = Node::from_attributes(id, ObjectKind::Directory, attrs).unwrap_err();
        assert!(matches!(err, ArborError::Corruption { .. }));
    }

    #[test]
    fn test_root_needs_no_parent() {
        let root = Node::from_attributes(
            NodeId::root(),
            ObjectKind::Directory,
            Attributes::new(NodeId::root()),
        )
        .unwrap();
        assert!(root.is_root());
        assert_eq!(root.parent_id(), None);
    }

    #[test]
    fn test_prospective_creation_attributes() {
        let node = Node::prospective(NodeId::root(), "x")
            .with_owner(&PrincipalId::new("42", "idp"))
            .with_attribute(attributes::REFERENCE, "https://example.org/share")
            .with_attribute(attributes::NAME, "ignored")
            .with_attribute("security.selinux", "ignored");
        assert!(!node.exists());
        assert!(node.id().is_unassigned());

        let keys: Vec<&str> = node.creation_attributes().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![attributes::REFERENCE, attributes::OWNER_ID, attributes::OWNER_IDP]
        );
    }

    #[test]
    fn test_resource_info_projection() {
        let id = NodeId::parse("n1").unwrap();
        let mut attrs = stored("n1", "root", "share");
        attrs.insert(attributes::REFERENCE, "cs3:/target/id");
        attrs.insert("user.ocis.md.color", "blue");
        attrs.insert("user.ocis.md.tag", "x");
        attrs.insert(attributes::TREE_SIZE, "12");
        let node = Node::from_attributes(id, ObjectKind::Directory, attrs).unwrap();

        let path = VirtualPath::new("/Shares/share").unwrap();
        let info = ResourceInfo::project(&node, path.clone(), &["color".to_string()]).unwrap();
        assert_eq!(info.resource_type, ResourceType::Reference);
        assert_eq!(info.target.as_deref(), Some("cs3:/target/id"));
        assert_eq!(info.tree_size, Some(12));
        assert_eq!(info.metadata.len(), 1);

        let all = ResourceInfo::project(&node, path, &["*".to_string()]).unwrap();
        assert_eq!(all.metadata.len(), 2);
    }

    #[test]
    fn test_parse_resource_ref() {
        let r: ResourceRef = "/42/docs".parse().unwrap();
        assert_eq!(r, ResourceRef::Path(VirtualPath::new("/42/docs").unwrap()));

        let r: ResourceRef = "id:abc".parse().unwrap();
        assert_eq!(r, ResourceRef::id(NodeId::parse("abc").unwrap()));

        let r: ResourceRef = "id:abc/sub/dir".parse().unwrap();
        assert_eq!(r.to_string(), "id:abc/sub/dir");

        assert!("id:".parse::<ResourceRef>().is_err());
    }
}
