//! Engine configuration.
//!
//! The configuration is loaded once (TOML file, then environment overrides),
//! normalized and validated, and then shared read-only by every component.
//!
//! # Example
//!
//! ```no_run
//! use arbor_core::config::EngineConfig;
//! use std::path::Path;
//!
//! # async fn example() -> arbor_core::Result<()> {
//! let config = EngineConfig::load_from_path(Path::new("/etc/arbor/arbor.toml")).await?;
//! println!("storage root: {}", config.root.display());
//! # Ok(())
//! # }
//! ```

use crate::error::{ArborError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

// Environment variable names
pub const ENV_ROOT: &str = "ARBOR_ROOT";
pub const ENV_ENABLE_HOME: &str = "ARBOR_ENABLE_HOME";
pub const ENV_USER_LAYOUT: &str = "ARBOR_USER_LAYOUT";
pub const ENV_SHARE_FOLDER: &str = "ARBOR_SHARE_FOLDER";
pub const ENV_TREE_TIME_ACCOUNTING: &str = "ARBOR_TREE_TIME_ACCOUNTING";
pub const ENV_TREE_SIZE_ACCOUNTING: &str = "ARBOR_TREE_SIZE_ACCOUNTING";

/// Layout used when none is configured: one home per opaque principal id.
pub const DEFAULT_USER_LAYOUT: &str = "{id}";

/// Shadow folder used when none is configured.
pub const DEFAULT_SHARE_FOLDER: &str = "/Shares";

/// Immutable engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage root holding `nodes/`, `uploads/` and `trash/`
    pub root: PathBuf,
    /// Enable per-principal home directories
    pub enable_home: bool,
    /// Home layout template, relative to the tree root
    pub user_layout: String,
    /// The single folder references may be created in
    pub share_folder: String,
    /// Propagate tree modification time to ancestors
    pub tree_time_accounting: bool,
    /// Propagate tree size deltas to ancestors
    pub tree_size_accounting: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/tmp/arbor"),
            enable_home: false,
            user_layout: DEFAULT_USER_LAYOUT.to_string(),
            share_folder: DEFAULT_SHARE_FOLDER.to_string(),
            tree_time_accounting: false,
            tree_size_accounting: false,
        }
    }
}

impl EngineConfig {
    /// Create a configuration rooted at `root` with every feature disabled.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
        .normalized()
    }

    /// Enable home directories using `layout`.
    pub fn with_home(mut self, layout: impl Into<String>) -> Self {
        self.enable_home = true;
        self.user_layout = layout.into();
        self.normalized()
    }

    pub fn with_share_folder(mut self, folder: impl Into<String>) -> Self {
        self.share_folder = folder.into();
        self.normalized()
    }

    pub fn with_tree_time_accounting(mut self, enabled: bool) -> Self {
        self.tree_time_accounting = enabled;
        self
    }

    pub fn with_tree_size_accounting(mut self, enabled: bool) -> Self {
        self.tree_size_accounting = enabled;
        self
    }

    /// Whether any aggregate accounting is configured.
    pub fn accounting_enabled(&self) -> bool {
        self.tree_time_accounting || self.tree_size_accounting
    }

    /// The share folder name without slashes.
    pub fn share_folder_name(&self) -> &str {
        self.share_folder.trim_matches('/')
    }

    /// Load configuration from a TOML file, apply environment overrides,
    /// normalize and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ArborError::config(format!("Failed to read config file: {}", e)))?;

        let config = Self::from_toml(&content)?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from a TOML string, apply environment overrides,
    /// normalize and validate it.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| ArborError::config(format!("Failed to parse config: {}", e)))?;

        config.merge_env_vars()?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Merge environment variable overrides into the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a boolean override cannot be parsed
    pub fn merge_env_vars(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var(ENV_ROOT) {
            debug!("Overriding root from environment");
            self.root = PathBuf::from(root);
        }

        if let Ok(value) = std::env::var(ENV_ENABLE_HOME) {
            self.enable_home = parse_bool(ENV_ENABLE_HOME, &value)?;
        }

        if let Ok(layout) = std::env::var(ENV_USER_LAYOUT) {
            debug!("Overriding user layout from environment: {}", layout);
            self.user_layout = layout;
        }

        if let Ok(folder) = std::env::var(ENV_SHARE_FOLDER) {
            debug!("Overriding share folder from environment: {}", folder);
            self.share_folder = folder;
        }

        if let Ok(value) = std::env::var(ENV_TREE_TIME_ACCOUNTING) {
            self.tree_time_accounting = parse_bool(ENV_TREE_TIME_ACCOUNTING, &value)?;
        }

        if let Ok(value) = std::env::var(ENV_TREE_SIZE_ACCOUNTING) {
            self.tree_size_accounting = parse_bool(ENV_TREE_SIZE_ACCOUNTING, &value)?;
        }

        Ok(())
    }

    /// Apply defaults and canonical forms.
    ///
    /// The layout never starts or ends with `/`, the share folder always
    /// starts with exactly one `/`, and the root is lexically cleaned.
    pub fn normalized(mut self) -> Self {
        self.user_layout = self.user_layout.trim().trim_matches('/').to_string();
        if self.user_layout.is_empty() {
            self.user_layout = DEFAULT_USER_LAYOUT.to_string();
        }

        let segments: Vec<&str> = self
            .share_folder
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        self.share_folder = if segments.is_empty() {
            DEFAULT_SHARE_FOLDER.to_string()
        } else {
            format!("/{}", segments.join("/"))
        };

        self.root = clean_path(&self.root);
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(ArborError::config("root must not be empty"));
        }

        // references are always `<share folder>/<name>`
        if self.share_folder_name().contains('/') {
            return Err(ArborError::config(format!(
                "share folder '{}' must be a single top-level folder",
                self.share_folder
            )));
        }

        let opens = self.user_layout.matches('{').count();
        let closes = self.user_layout.matches('}').count();
        if opens != closes {
            return Err(ArborError::config(format!(
                "unbalanced placeholder braces in user layout '{}'",
                self.user_layout
            )));
        }

        Ok(())
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ArborError::config(format!(
            "Invalid boolean '{}' in environment variable {}",
            other, var
        ))),
    }
}

/// Lexically clean a path: drop `.` components, resolve `..` and trailing
/// separators.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
