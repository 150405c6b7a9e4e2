//! View engine error types.
//!
//! Two families:
//!
//! - [`ScanError`]: building the registry failed. Fatal at startup; during a
//!   hot reload the previous registry stays live.
//! - [`RenderError`]: one request failed. Nothing was written to the sink.

use super::kind::ViewKind;
use std::{error::Error as StdError, path::PathBuf};
use thiserror::Error;

/// Registry build failures.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("views root `{0}` is not a directory")]
    MissingRoot(PathBuf),

    #[error("failed to walk views tree")]
    Walk(#[from] walkdir::Error),

    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse {kind} `{name}`: {detail}")]
    Parse {
        kind: ViewKind,
        name: String,
        detail: String,
        #[source]
        source: tera::Error,
    },

    #[error("duplicate {kind} name `{name}` (`{}` and `{}`)", .first.display(), .second.display())]
    DuplicateName {
        kind: ViewKind,
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("{kind} name `{name}` is reserved (`{}`)", .path.display())]
    ReservedName {
        kind: ViewKind,
        name: String,
        path: PathBuf,
    },

    #[error("`{}` has an empty view name", .0.display())]
    EmptyName(PathBuf),

    /// A template reaches itself through `{% include %}`.
    #[error("{kind} `{name}` includes itself: {}", .cycle.join(" -> "))]
    IncludeCycle {
        kind: ViewKind,
        name: String,
        cycle: Vec<String>,
    },

    /// Every file parsed on its own, but they do not fit together
    /// (missing `extends` parent, missing macro import).
    #[error("failed to link layouts and partials: {detail}")]
    Link {
        detail: String,
        #[source]
        source: tera::Error,
    },
}

impl ScanError {
    pub(crate) fn parse(kind: ViewKind, name: &str, source: tera::Error) -> Self {
        Self::Parse {
            kind,
            name: name.to_owned(),
            detail: error_chain(&source),
            source,
        }
    }
}

/// Per-request rendering failures.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("view `{0}` not found")]
    ViewNotFound(String),

    #[error("layout `{layout}` not found for view `{view}`")]
    LayoutNotFound { view: String, layout: String },

    #[error("failed to execute `{block}` of view `{view}`: {detail}")]
    Execution {
        view: String,
        block: String,
        detail: String,
        #[source]
        source: Option<tera::Error>,
    },

    #[error("failed to write rendered output")]
    Sink(#[source] std::io::Error),
}

impl RenderError {
    /// Build an execution error from a tera failure, keeping its cause chain.
    pub(crate) fn execution(view: &str, block: &str, source: tera::Error) -> Self {
        Self::Execution {
            view: view.to_owned(),
            block: block.to_owned(),
            detail: error_chain(&source),
            source: Some(source),
        }
    }

    /// Build an execution error that has no underlying tera error.
    pub(crate) fn invalid(view: &str, block: &str, detail: impl Into<String>) -> Self {
        Self::Execution {
            view: view.to_owned(),
            block: block.to_owned(),
            detail: detail.into(),
            source: None,
        }
    }

    /// Whether the caller should answer "not found" rather than "server error".
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ViewNotFound(_))
    }
}

/// Flatten an error and its sources into one line.
///
/// tera reports "Failed to render 'main'" at the top and keeps the useful part
/// (missing variable, bad filter argument) in the sources.
pub(crate) fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(cause) = current {
        let text = cause.to_string();
        if !parts.contains(&text) {
            parts.push(text);
        }
        current = cause.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::DuplicateName {
            kind: ViewKind::Page,
            name: "index".into(),
            first: PathBuf::from("views/index.html"),
            second: PathBuf::from("views/index.htm"),
        };
        let display = err.to_string();
        assert!(display.contains("duplicate page name `index`"));
        assert!(display.contains("views/index.htm"));
    }

    #[test]
    fn test_include_cycle_display() {
        let err = ScanError::IncludeCycle {
            kind: ViewKind::Partial,
            name: "nav".into(),
            cycle: vec!["nav".into(), "menu".into(), "nav".into()],
        };
        assert_eq!(err.to_string(), "partial `nav` includes itself: nav -> menu -> nav");
    }

    #[test]
    fn test_render_error_display() {
        let err = RenderError::LayoutNotFound {
            view: "events/show".into(),
            layout: "layouts/alt".into(),
        };
        assert_eq!(
            err.to_string(),
            "layout `layouts/alt` not found for view `events/show`"
        );
        assert!(!err.is_not_found());
        assert!(RenderError::ViewNotFound("x".into()).is_not_found());
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let inner = tera::Error::msg("Variable `title` not found");
        let outer = tera::Error::chain("Failed to render 'main'", inner);
        let chain = error_chain(&outer);
        assert!(chain.starts_with("Failed to render 'main'"));
        assert!(chain.contains("Variable `title` not found"));
    }
}
