//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating `viewkit.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("invalid viewkit.toml")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Validation(String),

    /// `[views].root` does not name an existing directory.
    #[error("[views.root] `{0}` is not a directory")]
    MissingViews(PathBuf),
}
