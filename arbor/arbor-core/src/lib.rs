//! Core types for the Arbor node tree engine.
//!
//! This crate provides the error type, node identifiers and the immutable
//! engine configuration shared by every Arbor component.

pub mod config;
pub mod error;
pub mod id;

pub use config::EngineConfig;
pub use error::{ArborError, ErrorKind, Result};
pub use id::NodeId;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::{ArborError, ErrorKind, Result};
    pub use crate::id::NodeId;
}
