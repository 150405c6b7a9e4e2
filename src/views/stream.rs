//! Turbo stream envelopes.
//!
//! ```text
//! <turbo-stream action="append" target="list"><template>
//! <li>X</li>
//! </template></turbo-stream>
//! ```
//!
//! `remove` carries no content and never touches the registry.

use super::{
    error::RenderError,
    layout::{LayoutState, RenderContext},
    registry::ViewRegistry,
    render::Renderer,
};
use serde::{Deserialize, Serialize};
use std::{fmt, io::Write, str::FromStr, sync::Arc};
use thiserror::Error;

/// Response content type for stream envelopes.
pub const STREAM_CONTENT_TYPE: &str = "text/vnd.turbo-stream.html";

/// Whether an `Accept` header value lists the stream format.
pub fn accepts_stream(accept: &str) -> bool {
    accept
        .split(',')
        .filter_map(|item| item.split(';').next())
        .any(|media| media.trim().eq_ignore_ascii_case(STREAM_CONTENT_TYPE))
}

// ============================================================================
// Action
// ============================================================================

/// DOM operation carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Append,
    Prepend,
    Replace,
    Update,
    Remove,
    Before,
    After,
}

impl StreamAction {
    pub const ALL: [Self; 7] = [
        Self::Append,
        Self::Prepend,
        Self::Replace,
        Self::Update,
        Self::Remove,
        Self::Before,
        Self::After,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Replace => "replace",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Before => "before",
            Self::After => "after",
        }
    }

    /// Whether the action needs a rendered partial.
    pub const fn needs_content(self) -> bool {
        !matches!(self, Self::Remove)
    }
}

impl fmt::Display for StreamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown stream action `{0}` (expected one of append, prepend, replace, update, remove, before, after)")]
pub struct UnknownAction(pub String);

impl FromStr for StreamAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownAction(s.to_owned()))
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// One differential update: action, target DOM id, rendered fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEnvelope {
    pub action: StreamAction,
    pub target: String,
    pub content: String,
}

impl StreamEnvelope {
    pub fn new(action: StreamAction, target: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            content: content.into(),
        }
    }

    pub fn remove(target: impl Into<String>) -> Self {
        Self::new(StreamAction::Remove, target, String::new())
    }

    /// Serialized wrapper markup. Content is emitted verbatim.
    pub fn to_markup(&self) -> String {
        self.to_string()
    }

    pub fn write_to(&self, sink: &mut impl Write) -> Result<(), RenderError> {
        sink.write_all(self.to_markup().as_bytes()).map_err(RenderError::Sink)
    }
}

impl fmt::Display for StreamEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<turbo-stream action=\"{}\" target=\"{}\"><template>\n{}\n</template></turbo-stream>",
            self.action,
            tera::escape_html(&self.target),
            self.content
        )
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Renders partials into [`StreamEnvelope`]s.
#[derive(Clone, Default)]
pub struct StreamEncoder {
    renderer: Renderer,
}

impl StreamEncoder {
    pub fn new(renderer: Renderer) -> Self {
        Self { renderer }
    }

    /// Build the envelope for `partial` rendered with its partial wrapper.
    ///
    /// Layout overrides and skip flags on `ctx` are ignored.
    pub fn encode(
        &self,
        registry: &Arc<ViewRegistry>,
        action: StreamAction,
        target: &str,
        partial: &str,
        ctx: &RenderContext,
    ) -> Result<StreamEnvelope, RenderError> {
        if !action.needs_content() {
            return Ok(StreamEnvelope::remove(target));
        }

        let view = registry
            .partial(partial)
            .ok_or_else(|| RenderError::ViewNotFound(partial.to_owned()))?;
        let content = self
            .renderer
            .render_with(registry, view, LayoutState::NoOverride, ctx)?;

        Ok(StreamEnvelope::new(action, target, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::registry::{RegistryBuilder, tests::write_tree};
    use serde_json::json;

    fn registry(files: &[(&str, &str)]) -> Arc<ViewRegistry> {
        let dir = write_tree(files);
        Arc::new(RegistryBuilder::new(dir.path()).build().unwrap())
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("append".parse::<StreamAction>(), Ok(StreamAction::Append));
        assert_eq!("Replace".parse::<StreamAction>(), Ok(StreamAction::Replace));
        assert_eq!(
            "explode".parse::<StreamAction>(),
            Err(UnknownAction("explode".into()))
        );
        for action in StreamAction::ALL {
            assert_eq!(action.as_str().parse::<StreamAction>(), Ok(action));
        }
    }

    #[test]
    fn test_action_serde_lowercase() {
        assert_eq!(serde_json::to_string(&StreamAction::Before).unwrap(), r#""before""#);
        let action: StreamAction = serde_json::from_str(r#""update""#).unwrap();
        assert_eq!(action, StreamAction::Update);
    }

    #[test]
    fn test_append_markup_is_exact() {
        let registry = registry(&[("_item.html", "<li>{{ label }}</li>")]);
        let envelope = StreamEncoder::default()
            .encode(
                &registry,
                StreamAction::Append,
                "list",
                "item",
                &RenderContext::new(json!({"label": "X"})),
            )
            .unwrap();
        assert_eq!(envelope.content, "<li>X</li>");
        assert_eq!(
            envelope.to_markup(),
            "<turbo-stream action=\"append\" target=\"list\"><template>\n<li>X</li>\n</template></turbo-stream>"
        );
    }

    #[test]
    fn test_remove_skips_lookup() {
        let registry = registry(&[]);
        let envelope = StreamEncoder::default()
            .encode(
                &registry,
                StreamAction::Remove,
                "item-42",
                "whatever",
                &RenderContext::default(),
            )
            .unwrap();
        assert_eq!(envelope, StreamEnvelope::new(StreamAction::Remove, "item-42", ""));
    }

    #[test]
    fn test_missing_partial_is_not_found() {
        let registry = registry(&[("item.html", "a page, not a partial")]);
        let err = StreamEncoder::default()
            .encode(&registry, StreamAction::Update, "x", "item", &RenderContext::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_stream_uses_partial_wrapper_despite_overrides() {
        let registry = registry(&[
            ("layouts/partial.html", r#"<div>{% include "main" %}</div>"#),
            ("_item.html", "<li>x</li>"),
        ]);
        let ctx = RenderContext::default().with_layout("alt").skip_layout();
        let envelope = StreamEncoder::default()
            .encode(&registry, StreamAction::Prepend, "list", "item", &ctx)
            .unwrap();
        assert_eq!(envelope.content, "<div><li>x</li></div>");
    }

    #[test]
    fn test_target_is_attribute_escaped() {
        let envelope = StreamEnvelope::new(StreamAction::Update, r#"a"b"#, "<p>raw</p>");
        let markup = envelope.to_markup();
        assert!(markup.contains(r#"target="a&quot;b""#));
        assert!(markup.contains("<p>raw</p>"));
    }

    #[test]
    fn test_write_to_sink() {
        let mut sink = Vec::new();
        StreamEnvelope::remove("row-1").write_to(&mut sink).unwrap();
        assert_eq!(
            String::from_utf8(sink).unwrap(),
            "<turbo-stream action=\"remove\" target=\"row-1\"><template>\n\n</template></turbo-stream>"
        );
    }

    #[test]
    fn test_accepts_stream() {
        assert!(accepts_stream("text/vnd.turbo-stream.html, text/html"));
        assert!(accepts_stream("text/html;q=0.9, TEXT/VND.TURBO-STREAM.HTML;q=1"));
        assert!(!accepts_stream("text/html, application/xhtml+xml"));
        assert!(!accepts_stream(""));
    }
}
