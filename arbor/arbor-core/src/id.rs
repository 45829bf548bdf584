//! Stable node identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const ROOT_ID: &str = "root";

/// Path-independent identifier of a node.
///
/// Ordinary nodes get a UUIDv4 when they are created. The root node uses the
/// reserved id `root`. A prospective node that has not been created yet
/// carries the unassigned (empty) id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new random ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The reserved id of the tree root
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    /// Placeholder id of a node that does not exist yet
    pub fn unassigned() -> Self {
        Self(String::new())
    }

    /// Parse an id received from a caller or read from storage.
    ///
    /// Ids end up as object names in the backing store, so separators and
    /// relative components are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s == "." || s == ".." || s.contains('/') || s.contains('\0') {
            return None;
        }
        Some(Self(s.to_string()))
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }

    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
