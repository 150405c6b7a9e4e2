//! Naming convention for view source files.
//!
//! Every markup file under the views root is one of three kinds, decided from
//! its path alone:
//!
//! | Path (relative to root)  | Kind      | Logical name      |
//! |--------------------------|-----------|-------------------|
//! | `events/_row.html`       | `Partial` | `events/row`      |
//! | `layouts/base.html`      | `Layout`  | `layouts/base`    |
//! | `layouts/_flash.html`    | `Partial` | `layouts/flash`   |
//! | `events/show.html`       | `Page`    | `events/show`     |
//! | `notes.txt`              | ignored   |                   |
//!
//! Logical names always use `/` as separator, whatever the host platform.

use std::{borrow::Borrow, fmt, path::Path};

/// Role of a markup file in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// Independently routable document.
    Page,
    /// Reusable fragment, base name starts with the partial marker.
    Partial,
    /// Wrapper placed around pages and partials.
    Layout,
}

impl ViewKind {
    /// Short name used in logs and error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Partial => "partial",
            Self::Layout => "layout",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Extension-free, marker-free identifier of a view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalName(String);

impl LogicalName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment (`events/row` → `row`).
    pub fn base(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }
}

impl fmt::Display for LogicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for LogicalName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LogicalName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// File naming rules used to classify a source tree.
#[derive(Debug, Clone)]
pub struct Convention {
    /// Leading character(s) marking a partial's base name.
    pub partial_marker: String,
    /// Top-level folder holding layouts.
    pub layouts_dir: String,
    /// Markup extensions, without the dot.
    pub extensions: Vec<String>,
}

impl Default for Convention {
    fn default() -> Self {
        Self {
            partial_marker: "_".into(),
            layouts_dir: "layouts".into(),
            extensions: vec!["html".into()],
        }
    }
}

impl Convention {
    /// Whether the path carries one of the markup extensions.
    pub fn is_markup(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }

    /// Classify a path relative to the views root and derive its logical name.
    ///
    /// Returns `None` for non-markup files. The caller strips the root; passing
    /// an absolute path yields a name containing the full directory chain.
    ///
    /// Rules, in order:
    /// 1. base name starts with the partial marker → `Partial`, marker removed
    /// 2. first directory is the layouts folder → `Layout`
    /// 3. otherwise → `Page`
    pub fn classify(&self, relative: &Path) -> Option<(ViewKind, LogicalName)> {
        if !self.is_markup(relative) {
            return None;
        }

        let stem = relative.file_stem()?.to_string_lossy();
        let dirs: Vec<String> = relative
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .filter_map(|c| match c {
                        std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let (kind, base) = if let Some(stripped) = stem.strip_prefix(self.partial_marker.as_str()) {
            (ViewKind::Partial, stripped)
        } else if dirs.first().is_some_and(|first| *first == self.layouts_dir) {
            (ViewKind::Layout, &*stem)
        } else {
            (ViewKind::Page, &*stem)
        };

        let mut segments = dirs;
        segments.push(base.to_owned());
        Some((kind, LogicalName(segments.join("/"))))
    }

    /// Name a layout by its short name: `base` → `layouts/base`.
    pub fn layout_name(&self, short: &str) -> String {
        format!("{}/{}", self.layouts_dir, short.trim_matches('/'))
    }
}
