//! External tree paths.
//!
//! A `VirtualPath` is the externally visible location of a node, always
//! relative to the tree root. It never refers to the storage root on disk.

use arbor_core::error::ArborError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized path inside the node tree.
///
/// Paths are stored as segments; `Display` renders them with a leading
/// slash (`/` for the root).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualPath {
    segments: Vec<String>,
}

impl VirtualPath {
    /// Parse a path. Leading, trailing and repeated slashes as well as `.`
    /// segments are ignored.
    pub fn new(path: &str) -> Result<Self, VirtualPathError> {
        Self::root().join(path)
    }

    /// Create a root path.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Join this path with another segment or relative path.
    ///
    /// `..` is rejected: tree paths never climb above where they start.
    pub fn join(&self, other: &str) -> Result<Self, VirtualPathError> {
        let mut segments = self.segments.clone();
        for segment in other.trim().split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment == ".." {
                return Err(VirtualPathError::EscapesRoot);
            }
            if segment.contains('\0') {
                return Err(VirtualPathError::InvalidCharacter('\0'));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Append every segment of `other`.
    pub fn join_path(&self, other: &VirtualPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }

        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Get the file name (last segment), if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// Check if this path starts with another path.
    pub fn starts_with(&self, base: &VirtualPath) -> bool {
        base.segments.len() <= self.segments.len()
            && self
                .segments
                .iter()
                .zip(base.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the number of segments in this path.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the segments of this path.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

impl std::str::FromStr for VirtualPath {
    type Err = VirtualPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = VirtualPathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<VirtualPath> for String {
    fn from(path: VirtualPath) -> Self {
        path.to_string()
    }
}

/// Errors that can occur when working with virtual paths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VirtualPathError {
    #[error("Invalid character in path: {0:?}")]
    InvalidCharacter(char),

    #[error("Path escapes the tree root")]
    EscapesRoot,
}

impl From<VirtualPathError> for ArborError {
    fn from(e: VirtualPathError) -> Self {
        ArborError::invalid_input(e.to_string())
    }
}
