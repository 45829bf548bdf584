//! Error types for the Arbor engine.

use crate::id::NodeId;

/// Result type alias for Arbor operations.
pub type Result<T> = std::result::Result<T, ArborError>;

/// Coarse error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    NotSupported,
    InvalidInput,
    Internal,
}

/// Main error type for the Arbor engine.
#[derive(Debug, thiserror::Error)]
pub enum ArborError {
    /// Path, id or segment does not resolve to an existing node
    #[error("Not found: {resource} {id}")]
    NotFound { resource: String, id: String },

    /// Create, move or reference target already occupied
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Structural policy violation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Feature disabled by configuration
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Attribute store errors
    #[error("Storage error on node {node}: {message}")]
    Storage { node: String, message: String },

    /// Stored attribute value could not be decoded
    #[error("Cannot decode attribute {key} of node {node}: {message}")]
    Decode {
        node: String,
        key: String,
        message: String,
    },

    /// Structural fields and their attribute encoding disagree
    #[error("Tree corruption at node {node}: {message}")]
    Corruption { node: String, message: String },

    /// Home layout template could not be rendered
    #[error("Template error: {0}")]
    Template(String),

    /// Aggregate accounting failed after the mutation was applied
    #[error("Mutation applied but accounting is stale at node {node}: {source}")]
    Propagation {
        node: NodeId,
        #[source]
        source: Box<ArborError>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArborError {
    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new already exists error
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Create a new permission denied error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a new not supported error
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new storage error
    pub fn storage(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Storage {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create a new decode error
    pub fn decode(node: impl Into<String>, key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            node: node.into(),
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a new corruption error
    pub fn corruption(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Corruption {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create a new template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Wrap an accounting failure at `node`
    pub fn propagation(node: NodeId, source: ArborError) -> Self {
        Self::Propagation {
            node,
            source: Box::new(source),
        }
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Storage { .. }
            | Self::Decode { .. }
            | Self::Corruption { .. }
            | Self::Template(_)
            | Self::Propagation { .. }
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if this is an already exists error
    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    /// Check if this error reports stale aggregate accounting
    pub fn is_propagation(&self) -> bool {
        matches!(self, Self::Propagation { .. })
    }
}
