//! Node tree engine for Arbor.
//!
//! This crate exposes a hierarchical, path-addressed view over a store of
//! id-named objects whose state lives in namespaced attributes:
//! - Stable node ids that survive renames and moves
//! - Path and id based resolution, with prospective nodes for missing leaves
//! - Create, move, delete and list with crash-describing write order
//! - Optional tree mtime and size propagation up to a propagation root
//! - Reference nodes pointing at external resources from the share folder
//! - Per-principal home directories from a layout template
//!
//! # Architecture
//!
//! - `AttributeStore`: backing objects with attribute bags and entries
//!   (`DiskStore` on a local filesystem, `MemoryStore` for tests)
//! - `TreeIndex`: in-memory id map with parent/child adjacency
//! - `PathResolver`: paths and resource references to `Node`s
//! - `Tree`: structural mutations
//! - `Propagator`: ancestor aggregate updates
//! - `Engine`: the facade wiring everything together
//!
//! # Example
//!
//! ```no_run
//! use arbor_core::EngineConfig;
//! use arbor_tree::{Engine, Principal, PrincipalId, ResourceRef, VirtualPath};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::new("/var/tmp/arbor").with_home("{id}");
//! let engine = Engine::open(config).await?;
//!
//! let principal = Principal::new(PrincipalId::new("42", "https://idp.example.org"));
//! engine.create_home(&principal).await?;
//!
//! let docs = VirtualPath::new("/42/docs")?;
//! engine.create_dir(&docs).await?;
//!
//! let listing = engine.list_folder(&ResourceRef::path(VirtualPath::new("/42")?), &[]).await?;
//! assert_eq!(listing[0].name, "docs");
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod disk_store;
pub mod engine;
pub mod home;
pub mod index;
pub mod layout;
pub mod locks;
pub mod memory_store;
pub mod node;
pub mod path;
pub mod principal;
pub mod propagation;
pub mod reference;
pub mod resolver;
pub mod retention;
pub mod store;
pub mod tree;

// Re-export main types
pub use attributes::{AttributeCategory, Attributes};
pub use disk_store::DiskStore;
pub use engine::Engine;
pub use home::HomeProvisioner;
pub use index::TreeIndex;
pub use layout::LayoutTemplate;
pub use locks::NodeLocks;
pub use memory_store::MemoryStore;
pub use node::{Node, ResourceInfo, ResourceRef, ResourceType};
pub use path::{VirtualPath, VirtualPathError};
pub use principal::{Principal, PrincipalId};
pub use propagation::{Change, Propagator};
pub use reference::References;
pub use resolver::PathResolver;
pub use retention::{Retention, TrashBin, TrashItem};
pub use store::{AttributeStore, ObjectKind};
pub use tree::Tree;

/// Prelude module with commonly used types.
pub mod prelude {
    pub use crate::engine::Engine;
    pub use crate::node::{Node, ResourceInfo, ResourceRef, ResourceType};
    pub use crate::path::VirtualPath;
    pub use crate::principal::{Principal, PrincipalId};
    pub use crate::store::{AttributeStore, ObjectKind};
    pub use arbor_core::prelude::*;
}
