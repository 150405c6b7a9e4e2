//! Request-scoped render inputs and layout negotiation.
//!
//! # Resolution
//!
//! ```text
//!  RenderContext ──► LayoutState ──┬── SkipRequested ──────────► "main"
//!                                  │
//!  ViewKind::Partial ──────────────┼── (any) ─► layouts/partial ─┐
//!                                  │                             │ absent
//!                                  ├── ExplicitOverride(x) ─► layouts/x ──► LayoutNotFound
//!                                  │                             │
//!                                  └── NoOverride ───► layouts/base ─┤
//!                                                                    ▼
//!                                                                 "main"
//! ```
//!
//! Only an explicit override on a page can fail; the conventional wrappers fall
//! back to the view's own `main` body when the tree defines no such layout.

use super::{
    error::RenderError,
    kind::{Convention, ViewKind},
    registry::{CompiledView, MAIN_BLOCK},
};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Header set by Turbo when a request targets a `<turbo-frame>`.
pub const TURBO_FRAME_HEADER: &str = "turbo-frame";

// ============================================================================
// Request Scope
// ============================================================================

/// What the engine knows about the request being answered.
///
/// Populated by external collaborators (session, CSRF, routing) and shared with
/// the request-scoped template functions of a single render.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    headers: FxHashMap<String, String>,
    values: Map<String, Value>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Names are matched case-insensitively.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Add a request value (`csrf_token`, `flash`, `identity`, ...).
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value of `key`, empty when absent or not a string.
    pub fn value_str(&self, key: &str) -> &str {
        self.value(key).and_then(Value::as_str).unwrap_or_default()
    }

    /// Whether the request targets a Turbo frame (layout is wasted work then).
    pub fn is_turbo_frame(&self) -> bool {
        self.header(TURBO_FRAME_HEADER).is_some_and(|v| !v.is_empty())
    }
}

// ============================================================================
// Render Context
// ============================================================================

/// Inputs of one render call. Created per request, dropped after the response.
///
/// # Example
/// ```ignore
/// let ctx = RenderContext::new(json!({ "event": event }))
///     .with_layout("print")
///     .with_request(scope);
/// views.render("events/show", ctx, &mut response)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub(crate) layout: Option<String>,
    pub(crate) skip_layout: bool,
    pub(crate) data: Value,
    pub(crate) request: Arc<RequestScope>,
}

impl RenderContext {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Render pages inside `layouts/<layout>` instead of the default.
    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    /// Emit only the view's own body.
    pub fn skip_layout(mut self) -> Self {
        self.skip_layout = true;
        self
    }

    pub fn with_request(mut self, request: RequestScope) -> Self {
        self.request = Arc::new(request);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn layout(&self) -> Option<&str> {
        self.layout.as_deref()
    }

    pub fn request(&self) -> &RequestScope {
        &self.request
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn state(&self) -> LayoutState<'_> {
        if self.skip_layout {
            LayoutState::SkipRequested
        } else if let Some(layout) = self.layout.as_deref() {
            LayoutState::ExplicitOverride(layout)
        } else {
            LayoutState::NoOverride
        }
    }
}

/// Layout request carried by a [`RenderContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutState<'a> {
    NoOverride,
    ExplicitOverride(&'a str),
    SkipRequested,
}

// ============================================================================
// Layout Resolver
// ============================================================================

/// Decides which template of a [`CompiledView`] to execute.
#[derive(Debug, Clone)]
pub struct LayoutResolver {
    convention: Convention,
    default_layout: String,
    partial_layout: String,
}

impl Default for LayoutResolver {
    fn default() -> Self {
        Self::new(Convention::default(), "base", "partial")
    }
}

impl LayoutResolver {
    pub fn new(convention: Convention, default_layout: &str, partial_layout: &str) -> Self {
        Self {
            convention,
            default_layout: default_layout.to_owned(),
            partial_layout: partial_layout.to_owned(),
        }
    }

    /// Resolve the block name to execute for `view`.
    pub fn resolve(&self, view: &CompiledView, state: LayoutState<'_>) -> Result<String, RenderError> {
        let wrapper = match (state, view.kind()) {
            (LayoutState::SkipRequested, _) => return Ok(MAIN_BLOCK.to_owned()),
            (_, ViewKind::Partial) => self.convention.layout_name(&self.partial_layout),
            (LayoutState::ExplicitOverride(layout), _) => {
                let layout = self.convention.layout_name(layout);
                if !view.has_block(&layout) {
                    return Err(RenderError::LayoutNotFound {
                        view: view.name().to_string(),
                        layout,
                    });
                }
                return Ok(layout);
            }
            (LayoutState::NoOverride, _) => self.convention.layout_name(&self.default_layout),
        };

        // Views of a tree without the conventional wrapper render their own body.
        if view.has_block(&wrapper) {
            Ok(wrapper)
        } else {
            Ok(MAIN_BLOCK.to_owned())
        }
    }
}
