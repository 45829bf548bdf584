//! Command implementations for the Arbor CLI.
//!
//! Every handler takes an opened [`Engine`] so the same code paths are used
//! by the binary and by the integration tests.

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result, bail};
use arbor_core::{EngineConfig, NodeId};
use arbor_tree::{Engine, Principal, PrincipalId, ResourceRef, VirtualPath};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// Build the engine configuration from a file, the environment and flags.
///
/// Without a file, defaults are used and environment overrides still apply.
pub async fn load_config(config: Option<&Path>, root: Option<PathBuf>) -> Result<EngineConfig> {
    let mut config = match config {
        Some(path) => EngineConfig::load_from_path(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            let mut config = EngineConfig::default();
            config.merge_env_vars()?;
            config
        }
    };
    if let Some(root) = root {
        config.root = root;
    }
    let config = config.normalized();
    config.validate()?;
    debug!("Using storage root {}", config.root.display());
    Ok(config)
}

/// Open the engine for `config`.
pub async fn open_engine(config: EngineConfig) -> Result<Engine> {
    let root = config.root.clone();
    Engine::open(config)
        .await
        .with_context(|| format!("Failed to open storage at {}", root.display()))
}

/// Parse `id:<id>[/<path>]` or an absolute path.
pub fn parse_ref(raw: &str) -> Result<ResourceRef> {
    raw.parse::<ResourceRef>()
        .with_context(|| format!("Invalid reference '{}'", raw))
}

pub fn parse_path(raw: &str) -> Result<VirtualPath> {
    VirtualPath::new(raw).with_context(|| format!("Invalid path '{}'", raw))
}

/// Parse `key=value` pairs. Keys must be non-empty.
pub fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut metadata = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Expected key=value, got '{}'", pair);
        };
        if key.is_empty() {
            bail!("Empty metadata key in '{}'", pair);
        }
        metadata.insert(key.to_string(), value.to_string());
    }
    Ok(metadata)
}

/// Create a directory, and with `parents` every missing ancestor.
pub async fn make_dir(
    engine: &Engine,
    path: &str,
    parents: bool,
    format: OutputFormat,
) -> Result<()> {
    let path = parse_path(path)?;

    let node = if parents {
        let mut current = VirtualPath::root();
        let mut last = None;
        for segment in path.segments() {
            current = current.join(segment)?;
            let node = engine.resolve(&ResourceRef::path(current.clone())).await?;
            if node.exists() {
                if !node.is_directory() {
                    bail!("{} exists and is not a directory", current);
                }
                last = Some(node);
            } else {
                last = Some(engine.create_dir(&current).await?);
            }
        }
        match last {
            Some(node) => node,
            None => engine.resolve(&ResourceRef::path(path.clone())).await?,
        }
    } else {
        engine.create_dir(&path).await?
    };

    match format {
        OutputFormat::Json => output::json(&serde_json::json!({ "id": node.id(), "path": path })),
        OutputFormat::Human => {
            output::success(format!("Created {} ({})", path, node.id()));
            Ok(())
        }
    }
}

/// Create an empty file node.
pub async fn touch(engine: &Engine, path: &str, format: OutputFormat) -> Result<()> {
    let path = parse_path(path)?;
    let node = engine.create_file(&path).await?;
    match format {
        OutputFormat::Json => output::json(&serde_json::json!({ "id": node.id(), "path": path })),
        OutputFormat::Human => {
            output::success(format!("Created {} ({})", path, node.id()));
            Ok(())
        }
    }
}

pub async fn move_node(engine: &Engine, from: &str, to: &str, format: OutputFormat) -> Result<()> {
    let old = parse_ref(from)?;
    let new = parse_ref(to)?;
    let node = engine.move_node(&old, &new).await?;
    let path = engine.path_by_id(node.id())?;
    info!("Moved {} to {}", old, path);
    match format {
        OutputFormat::Json => output::json(&serde_json::json!({ "id": node.id(), "path": path })),
        OutputFormat::Human => {
            output::success(format!("Moved {} to {}", old, path));
            Ok(())
        }
    }
}

pub async fn remove(engine: &Engine, target: &str, format: OutputFormat) -> Result<()> {
    let reference = parse_ref(target)?;
    engine.delete(&reference).await?;
    match format {
        OutputFormat::Json => {
            output::json(&serde_json::json!({ "deleted": reference.to_string() }))
        }
        OutputFormat::Human => {
            output::success(format!("Moved {} to trash", reference));
            Ok(())
        }
    }
}

pub async fn list(
    engine: &Engine,
    target: &str,
    md_keys: &[String],
    format: OutputFormat,
) -> Result<()> {
    let reference = parse_ref(target)?;
    let items = engine.list_folder(&reference, md_keys).await?;
    match format {
        OutputFormat::Json => output::json(&items),
        OutputFormat::Human => {
            output::listing(&items);
            Ok(())
        }
    }
}

pub async fn stat(
    engine: &Engine,
    target: &str,
    md_keys: &[String],
    format: OutputFormat,
) -> Result<()> {
    let reference = parse_ref(target)?;
    let info = engine.get_md(&reference, md_keys).await?;
    match format {
        OutputFormat::Json => output::json(&info),
        OutputFormat::Human => {
            output::resource(&info);
            Ok(())
        }
    }
}

/// Print the current path of a node id.
pub fn path_of(engine: &Engine, id: &str, format: OutputFormat) -> Result<()> {
    let id = NodeId::parse(id).with_context(|| format!("Invalid node id '{}'", id))?;
    let path = engine.path_by_id(&id)?;
    match format {
        OutputFormat::Json => output::json(&serde_json::json!({ "id": id, "path": path })),
        OutputFormat::Human => {
            println!("{}", path);
            Ok(())
        }
    }
}

pub async fn create_reference(
    engine: &Engine,
    path: &str,
    target: &str,
    format: OutputFormat,
) -> Result<()> {
    let path = parse_path(path)?;
    let target = Url::parse(target).with_context(|| format!("Invalid target '{}'", target))?;
    let node = engine.create_reference(&path, &target).await?;
    match format {
        OutputFormat::Json => output::json(&serde_json::json!({
            "id": node.id(),
            "path": path,
            "target": target.as_str(),
        })),
        OutputFormat::Human => {
            output::success(format!("Created reference {} -> {}", path, target));
            Ok(())
        }
    }
}

/// Principal fields accepted on the command line.
#[derive(Debug, Clone, Default)]
pub struct PrincipalArgs {
    pub id: String,
    pub idp: String,
    pub username: Option<String>,
    pub mail: Option<String>,
    pub display_name: Option<String>,
}

impl PrincipalArgs {
    pub fn into_principal(self) -> Principal {
        let mut principal = Principal::new(PrincipalId::new(self.id, self.idp));
        if let Some(username) = self.username {
            principal = principal.with_username(username);
        }
        if let Some(mail) = self.mail {
            principal = principal.with_mail(mail);
        }
        if let Some(display_name) = self.display_name {
            principal = principal.with_display_name(display_name);
        }
        principal
    }
}

pub async fn create_home(
    engine: &Engine,
    principal: PrincipalArgs,
    format: OutputFormat,
) -> Result<()> {
    let principal = principal.into_principal();
    let node = engine.create_home(&principal).await?;
    let path = engine.path_by_id(node.id())?;
    match format {
        OutputFormat::Json => output::json(&serde_json::json!({ "id": node.id(), "path": path })),
        OutputFormat::Human => {
            output::success(format!("Home of {} at {}", principal.id, path));
            Ok(())
        }
    }
}

pub fn home_path(engine: &Engine, principal: PrincipalArgs, format: OutputFormat) -> Result<()> {
    let path = engine.get_home(&principal.into_principal())?;
    match format {
        OutputFormat::Json => output::json(&serde_json::json!({ "path": path })),
        OutputFormat::Human => {
            println!("{}", path);
            Ok(())
        }
    }
}

pub async fn set_metadata(engine: &Engine, target: &str, pairs: &[String]) -> Result<()> {
    let reference = parse_ref(target)?;
    let metadata = parse_pairs(pairs)?;
    engine.set_arbitrary_metadata(&reference, &metadata).await?;
    output::success(format!("Set {} key(s) on {}", metadata.len(), reference));
    Ok(())
}

pub async fn unset_metadata(engine: &Engine, target: &str, keys: &[String]) -> Result<()> {
    let reference = parse_ref(target)?;
    engine.unset_arbitrary_metadata(&reference, keys).await?;
    output::success(format!("Removed {} key(s) from {}", keys.len(), reference));
    Ok(())
}

pub fn list_trash(engine: &Engine, format: OutputFormat) -> Result<()> {
    let items = engine.trash().items();
    match format {
        OutputFormat::Json => output::json(&items),
        OutputFormat::Human => {
            if items.is_empty() {
                output::warning("Trash is empty");
                return Ok(());
            }
            let mut table =
                output::TableBuilder::new().header(["Id", "Name", "Type", "Origin", "Deleted at"]);
            for item in &items {
                table = table.row([
                    item.id.to_string(),
                    item.name.clone(),
                    item.resource_type.to_string(),
                    item.origin.to_string(),
                    output::format_mtime(Some(item.deleted_at)),
                ]);
            }
            table.print();
            Ok(())
        }
    }
}

/// Check the in-memory index against itself.
pub fn check(engine: &Engine, format: OutputFormat) -> Result<()> {
    engine.check_consistency()?;
    match format {
        OutputFormat::Json => output::json(&serde_json::json!({ "consistent": true })),
        OutputFormat::Human => {
            output::success("Tree is consistent");
            Ok(())
        }
    }
}
