//! Project configuration management for `viewkit.toml`.
//!
//! # Sections
//!
//! | Section     | Purpose                                          |
//! |-------------|--------------------------------------------------|
//! | `[views]`   | View tree root and naming convention             |
//! | `[serve]`   | Preview server (port, interface, watch, data)    |
//! | `[globals]` | Free-form values exposed through `globals()`     |
//!
//! # Example
//!
//! ```toml
//! [views]
//! root = "views"
//! default_layout = "base"
//!
//! [serve]
//! port = 5277
//!
//! [globals]
//! site_name = "Events"
//! ```

pub mod defaults;
mod error;
mod serve;
mod views;

pub use error::ConfigError;
pub use serve::ServeConfig;
pub use views::ViewsConfig;

use crate::cli::{Cli, Commands};
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing viewkit.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Absolute project root (set after loading)
    #[serde(skip)]
    #[educe(Default = PathBuf::from("./"))]
    pub root: PathBuf,

    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// View tree settings
    #[serde(default)]
    pub views: ViewsConfig,

    /// Preview server settings
    #[serde(default)]
    pub serve: ServeConfig,

    /// User-defined values for templates
    #[serde(default)]
    pub globals: BTreeMap<String, toml::Value>,
}

impl ProjectConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content)
    }

    /// Load the config named by the CLI, or defaults when the file is absent.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let root = cli.root.as_deref().unwrap_or(Path::new("./"));
        let config_path = root.join(&cli.config);

        let mut config = if config_path.exists() {
            Self::from_path(&config_path)?
        } else {
            Self::default()
        };
        config.config_path = config_path;
        config.update_with_cli(cli);
        Ok(config)
    }

    /// Update configuration with CLI arguments
    pub fn update_with_cli(&mut self, cli: &Cli) {
        let root = cli.root.clone().unwrap_or_else(|| self.root.clone());
        Self::update_option(&mut self.views.root, cli.views.as_ref());

        if let Commands::Serve {
            interface,
            port,
            watch,
        } = &cli.command
        {
            Self::update_option(&mut self.serve.interface, interface.as_ref());
            Self::update_option(&mut self.serve.port, port.as_ref());
            Self::update_option(&mut self.serve.watch, watch.as_ref());
        }

        self.update_path_with_root(&root);
    }

    /// Update config option if CLI value is provided
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Resolve every directory against `root` and normalize to absolute paths
    fn update_path_with_root(&mut self, root: &Path) {
        self.root = Self::normalize_path(root);
        if !self.config_path.as_os_str().is_empty() {
            self.config_path = Self::normalize_path(&self.config_path);
        }
        self.views.root = Self::normalize_path(&self.root.join(&self.views.root));
        self.serve.data = Self::normalize_path(&self.root.join(&self.serve.data));
    }

    /// Normalize a path to absolute, using canonicalize if the path exists
    fn normalize_path(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| {
            // For non-existent paths, manually make them absolute
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    /// `[globals]` as a JSON object for template functions.
    pub fn globals_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.globals)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }

    /// Validate configuration before building views
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.views.validate()?;

        if !self.views.root.is_dir() {
            return Err(ConfigError::MissingViews(self.views.root.clone()));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
