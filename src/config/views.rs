//! `[views]` section configuration.
//!
//! Contains the source tree location and its naming convention.

use super::{defaults, error::ConfigError};
use crate::views::Convention;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// `[views]` section in viewkit.toml - view tree settings.
///
/// # Example
/// ```toml
/// [views]
/// root = "templates"
/// extensions = ["html", "htm"]
/// default_layout = "app"
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ViewsConfig {
    /// Source tree root, relative to the project root.
    #[serde(default = "defaults::views::root")]
    #[educe(Default = defaults::views::root())]
    pub root: PathBuf,

    /// Markup file extensions, without the dot.
    #[serde(default = "defaults::views::extensions")]
    #[educe(Default = defaults::views::extensions())]
    pub extensions: Vec<String>,

    /// Base-name prefix marking a partial.
    #[serde(default = "defaults::views::partial_marker")]
    #[educe(Default = defaults::views::partial_marker())]
    pub partial_marker: String,

    /// Top-level folder holding layouts.
    #[serde(default = "defaults::views::layouts_dir")]
    #[educe(Default = defaults::views::layouts_dir())]
    pub layouts_dir: String,

    /// Layout wrapping pages without an override.
    #[serde(default = "defaults::views::default_layout")]
    #[educe(Default = defaults::views::default_layout())]
    pub default_layout: String,

    /// Layout wrapping every partial rendered on its own.
    #[serde(default = "defaults::views::partial_layout")]
    #[educe(Default = defaults::views::partial_layout())]
    pub partial_layout: String,

    /// HTML-escape interpolated values in every template.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub autoescape: bool,
}

impl ViewsConfig {
    /// Naming convention for [`crate::views::RegistryBuilder`].
    pub fn convention(&self) -> Convention {
        Convention {
            partial_marker: self.partial_marker.clone(),
            layouts_dir: self.layouts_dir.clone(),
            extensions: self
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_owned())
                .collect(),
        }
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.extensions.iter().all(|ext| ext.trim_start_matches('.').is_empty()) {
            return Err(ConfigError::Validation(
                "[views.extensions] must list at least one extension".into(),
            ));
        }

        let names = [
            ("partial_marker", &self.partial_marker),
            ("default_layout", &self.default_layout),
            ("partial_layout", &self.partial_layout),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("[views.{field}] must not be empty")));
            }
        }

        let mut components = Path::new(&self.layouts_dir).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(ConfigError::Validation(
                "[views.layouts_dir] must be a single folder name".into(),
            ));
        }

        Ok(())
    }
}
