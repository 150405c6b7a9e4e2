//! View resolution, composition and stream rendering.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── startup ─────────────────────────┐
//! │ views/ ─► Convention::classify ─► RegistryBuilder ─────┐ │
//! └────────────────────────────────────────────────────────┼─┘
//!                                                          ▼
//!                                              RegistryHandle (ArcSwap)
//!                                                          │ load()
//! ┌──────────────────────── request ───────────────────────┼─┐
//! │ Views::render(name, ctx) ─► lookup ─► LayoutResolver ──┤ │
//! │                                        Renderer ◄──────┘ │
//! │ Views::render_stream(...) ─► StreamEncoder ─► Renderer   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let views = Views::builder("views")
//!     .globals(json!({ "site_name": "Events" }))
//!     .injector(|req: &RequestScope, data| with_identity(req, data))
//!     .build()?;
//!
//! let ctx = RenderContext::new(json!({ "event": event })).with_request(scope);
//! views.render("events/show", &ctx, &mut response)?;
//! ```

mod error;
mod funcs;
mod handle;
mod includes;
mod kind;
mod layout;
mod registry;
mod render;
mod stream;

pub use error::{RenderError, ScanError};
pub use funcs::{FunctionSet, PARTIAL_FUNCTION, ScopedFunction, ScopedFunctionSet, SharedFunction};
pub use handle::RegistryHandle;
pub use kind::{Convention, LogicalName, ViewKind};
pub use layout::{LayoutResolver, LayoutState, RenderContext, RequestScope, TURBO_FRAME_HEADER};
pub use registry::{
    CompileOptions, CompiledView, MAIN_BLOCK, RegistryBuilder, SharedTemplates, SourceFile, SourceSet, ViewRegistry,
};
pub use render::{DataInjector, MAX_PARTIAL_DEPTH, Renderer};
#[cfg(test)]
pub(crate) use registry::tests as tests_support;

pub use stream::{STREAM_CONTENT_TYPE, StreamAction, StreamEncoder, StreamEnvelope, UnknownAction, accepts_stream};

use crate::{config::ProjectConfig, log};
use serde_json::Value;
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use tera::Function;

// ============================================================================
// Builder
// ============================================================================

/// Configures and builds a [`Views`] engine.
pub struct ViewsBuilder {
    root: PathBuf,
    convention: Convention,
    autoescape: bool,
    default_layout: String,
    partial_layout: String,
    globals: Value,
    functions: Vec<(String, SharedFunction)>,
    scoped: ScopedFunctionSet,
    injector: Option<Arc<dyn DataInjector>>,
}

impl ViewsBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            convention: Convention::default(),
            autoescape: true,
            default_layout: "base".into(),
            partial_layout: "partial".into(),
            globals: Value::Object(serde_json::Map::new()),
            functions: Vec::new(),
            scoped: ScopedFunctionSet::with_defaults(),
            injector: None,
        }
    }

    /// Start from the `[views]` and `[globals]` sections.
    pub fn from_config(config: &ProjectConfig) -> Self {
        let views = &config.views;
        Self::new(&views.root)
            .convention(views.convention())
            .autoescape(views.autoescape)
            .default_layout(&views.default_layout)
            .partial_layout(&views.partial_layout)
            .globals(config.globals_json())
    }

    pub fn convention(mut self, convention: Convention) -> Self {
        self.convention = convention;
        self
    }

    pub fn autoescape(mut self, enable: bool) -> Self {
        self.autoescape = enable;
        self
    }

    /// Short name of the layout wrapping pages by default.
    pub fn default_layout(mut self, name: &str) -> Self {
        self.default_layout = name.to_owned();
        self
    }

    /// Short name of the layout wrapping partials rendered on their own.
    pub fn partial_layout(mut self, name: &str) -> Self {
        self.partial_layout = name.to_owned();
        self
    }

    /// Value returned by `globals()`.
    pub fn globals(mut self, globals: Value) -> Self {
        self.globals = globals;
        self
    }

    /// Register a request-independent template function.
    pub fn function(mut self, name: &str, function: impl Function + 'static) -> Self {
        self.functions.retain(|(n, _)| n != name);
        self.functions.push((name.to_owned(), SharedFunction::new(function)));
        self
    }

    /// Register a template function that reads the current request.
    pub fn scoped_function(mut self, name: &str, function: impl ScopedFunction + 'static) -> Self {
        self.scoped.insert(name, function);
        self
    }

    /// Hook run before every render to merge request values into the data.
    pub fn injector(mut self, injector: impl DataInjector + 'static) -> Self {
        self.injector = Some(Arc::new(injector));
        self
    }

    /// Scan and compile the tree. Any error aborts; nothing is served half-built.
    pub fn build(self) -> Result<Views, ScanError> {
        let mut functions = FunctionSet::with_defaults(self.globals);
        for (name, function) in self.functions {
            functions.insert(&name, function);
        }

        let builder = RegistryBuilder::new(self.root)
            .convention(self.convention.clone())
            .autoescape(self.autoescape)
            .functions(functions);
        let registry = builder.build()?;

        log!(
            "views";
            "{} pages, {} partials, {} layouts from {}",
            registry.page_count(),
            registry.partial_count(),
            registry.layout_count(),
            builder.root().display()
        );

        let resolver = LayoutResolver::new(self.convention, &self.default_layout, &self.partial_layout);
        let renderer = Renderer::new(resolver)
            .with_scoped_functions(self.scoped)
            .with_shared_injector(self.injector);

        Ok(Views {
            builder,
            handle: RegistryHandle::new(registry),
            streams: StreamEncoder::new(renderer.clone()),
            renderer,
        })
    }
}

// ============================================================================
// Views
// ============================================================================

/// The view engine: a live registry plus the renderer and stream encoder.
///
/// `Sync`; share it between request threads behind an `Arc`.
pub struct Views {
    builder: RegistryBuilder,
    handle: RegistryHandle,
    renderer: Renderer,
    streams: StreamEncoder,
}

impl Views {
    pub fn builder(root: impl Into<PathBuf>) -> ViewsBuilder {
        ViewsBuilder::new(root)
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<ViewRegistry> {
        self.handle.load()
    }

    pub fn root(&self) -> &Path {
        self.builder.root()
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Render a partial or page (partials first) into `sink`.
    ///
    /// On error nothing reaches `sink`.
    pub fn render(&self, name: &str, ctx: &RenderContext, sink: &mut impl Write) -> Result<(), RenderError> {
        let buffer = self.render_to_string(name, ctx)?;
        sink.write_all(buffer.as_bytes()).map_err(RenderError::Sink)
    }

    /// Render a partial or page (partials first) into a string.
    pub fn render_to_string(&self, name: &str, ctx: &RenderContext) -> Result<String, RenderError> {
        self.render_in(name, ctx, ViewRegistry::lookup)
    }

    /// Render from the page namespace only.
    pub fn page(&self, name: &str, ctx: &RenderContext) -> Result<String, RenderError> {
        self.render_in(name, ctx, ViewRegistry::page)
    }

    /// Render from the partial namespace only.
    pub fn partial(&self, name: &str, ctx: &RenderContext) -> Result<String, RenderError> {
        self.render_in(name, ctx, ViewRegistry::partial)
    }

    fn render_in(
        &self,
        name: &str,
        ctx: &RenderContext,
        find: impl for<'r> Fn(&'r ViewRegistry, &str) -> Option<&'r CompiledView>,
    ) -> Result<String, RenderError> {
        let registry = self.handle.load();
        let view = find(registry.as_ref(), name).ok_or_else(|| RenderError::ViewNotFound(name.to_owned()))?;
        self.renderer.render_to_string(&registry, view, ctx)
    }

    /// Build a stream envelope. `remove` never looks up `name`.
    pub fn encode_stream(
        &self,
        action: StreamAction,
        target: &str,
        name: &str,
        ctx: &RenderContext,
    ) -> Result<StreamEnvelope, RenderError> {
        self.streams.encode(&self.handle.load(), action, target, name, ctx)
    }

    /// Write a stream envelope into `sink`.
    ///
    /// The caller declares [`STREAM_CONTENT_TYPE`] on the response.
    pub fn render_stream(
        &self,
        action: StreamAction,
        target: &str,
        name: &str,
        ctx: &RenderContext,
        sink: &mut impl Write,
    ) -> Result<(), RenderError> {
        self.encode_stream(action, target, name, ctx)?.write_to(sink)
    }

    /// Rescan the tree; swap in a new registry if any source changed.
    ///
    /// On error the current registry keeps serving.
    pub fn reload(&self) -> Result<bool, ScanError> {
        self.handle.reload(&self.builder)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::registry::tests::write_tree;
    use serde_json::json;
    use std::{collections::HashMap, fs};
    use tempfile::TempDir;

    fn site() -> (TempDir, Views) {
        let dir = write_tree(&[
            ("layouts/base.html", r#"<main class="base">{% include "main" %}</main>"#),
            ("layouts/alt.html", r#"<main class="alt">{% include "main" %}</main>"#),
            ("layouts/partial.html", r#"<div class="partial">{% include "main" %}</div>"#),
            ("index.html", "<h1>{{ title }}</h1>"),
            ("form.html", r#"<form>{{ csrf() }}</form>"#),
            ("broken.html", "<p>start</p>{{ missing.field }}"),
            ("_nav.html", "{% set g = globals() %}<nav>{{ g.site_name }}</nav>"),
            ("_item.html", "<li>{{ label }}</li>"),
        ]);
        let views = Views::builder(dir.path())
            .globals(json!({"site_name": "Events"}))
            .build()
            .unwrap();
        (dir, views)
    }

    #[test]
    fn test_default_layout() {
        let (_dir, views) = site();
        let html = views
            .render_to_string("index", &RenderContext::new(json!({"title": "Hi"})))
            .unwrap();
        assert_eq!(html, r#"<main class="base"><h1>Hi</h1></main>"#);
    }

    #[test]
    fn test_explicit_override() {
        let (_dir, views) = site();
        let ctx = RenderContext::new(json!({"title": "Hi"})).with_layout("alt");
        assert_eq!(
            views.render_to_string("index", &ctx).unwrap(),
            r#"<main class="alt"><h1>Hi</h1></main>"#
        );

        let ctx = RenderContext::new(json!({"title": "Hi"})).with_layout("print");
        let err = views.render_to_string("index", &ctx).unwrap_err();
        assert!(matches!(err, RenderError::LayoutNotFound { .. }));
    }

    #[test]
    fn test_skip_layout() {
        let (_dir, views) = site();
        let ctx = RenderContext::new(json!({"title": "Hi"})).skip_layout();
        assert_eq!(views.render_to_string("index", &ctx).unwrap(), "<h1>Hi</h1>");
    }

    #[test]
    fn test_partial_fixed_layout() {
        let (_dir, views) = site();
        let ctx = RenderContext::new(json!({"label": "a"})).with_layout("alt");
        assert_eq!(
            views.render_to_string("item", &ctx).unwrap(),
            r#"<div class="partial"><li>a</li></div>"#
        );
    }

    #[test]
    fn test_globals_function() {
        let (_dir, views) = site();
        let ctx = RenderContext::default().skip_layout();
        assert_eq!(views.partial("nav", &ctx).unwrap(), "<nav>Events</nav>");
    }

    #[test]
    fn test_namespaces() {
        let (_dir, views) = site();
        let ctx = RenderContext::default();
        assert!(views.page("nav", &ctx).unwrap_err().is_not_found());
        assert!(views.partial("index", &ctx).unwrap_err().is_not_found());
        assert!(views.render_to_string("nope", &ctx).unwrap_err().is_not_found());
    }

    #[test]
    fn test_buffered_atomicity() {
        let (_dir, views) = site();
        let mut sink: Vec<u8> = Vec::new();
        let err = views
            .render("broken", &RenderContext::default(), &mut sink)
            .unwrap_err();
        assert!(matches!(err, RenderError::Execution { .. }));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_stream_remove_shortcut() {
        let (_dir, views) = site();
        let envelope = views
            .encode_stream(StreamAction::Remove, "item-42", "whatever", &RenderContext::default())
            .unwrap();
        assert_eq!(envelope.action, StreamAction::Remove);
        assert_eq!(envelope.target, "item-42");
        assert_eq!(envelope.content, "");
    }

    #[test]
    fn test_stream_append_literal() {
        let dir = write_tree(&[("_item.html", "<li>{{ label }}</li>")]);
        let views = Views::builder(dir.path()).build().unwrap();
        let mut sink = Vec::new();
        views
            .render_stream(
                StreamAction::Append,
                "list",
                "item",
                &RenderContext::new(json!({"label": "X"})),
                &mut sink,
            )
            .unwrap();
        assert_eq!(
            String::from_utf8(sink).unwrap(),
            "<turbo-stream action=\"append\" target=\"list\"><template>\n<li>X</li>\n</template></turbo-stream>"
        );
    }

    #[test]
    fn test_concurrent_renders_are_isolated() {
        let (_dir, views) = site();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let views = &views;
                    scope.spawn(move || {
                        let token = format!("token-{i}");
                        let ctx = RenderContext::default()
                            .skip_layout()
                            .with_request(RequestScope::new().with_value("csrf_token", token.clone()));
                        let mut outputs = Vec::new();
                        for _ in 0..20 {
                            outputs.push(views.render_to_string("form", &ctx).unwrap());
                        }
                        (token, outputs)
                    })
                })
                .collect();

            for handle in handles {
                let (token, outputs) = handle.join().unwrap();
                for output in outputs {
                    assert_eq!(output, format!("<form>{token}</form>"));
                }
            }
        });
    }

    #[test]
    fn test_custom_functions_and_injector() {
        let dir = write_tree(&[("index.html", "{{ shout(text=who) }} {{ whoami() }}")]);
        let views = Views::builder(dir.path())
            .function("shout", |args: &HashMap<String, Value>| -> tera::Result<Value> {
                let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok(Value::String(text.to_uppercase()))
            })
            .scoped_function(
                "whoami",
                |request: &RequestScope, _: &HashMap<String, Value>| -> tera::Result<Value> {
                    Ok(json!(request.value_str("identity")))
                },
            )
            .injector(|request: &RequestScope, mut data: Value| {
                if let Some(object) = data.as_object_mut() {
                    object.insert("who".into(), json!(request.value_str("identity")));
                }
                data
            })
            .build()
            .unwrap();

        let ctx = RenderContext::default().with_request(RequestScope::new().with_value("identity", "ana"));
        assert_eq!(views.render_to_string("index", &ctx).unwrap(), "ANA ana");
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let (dir, views) = site();
        assert!(!views.reload().unwrap());

        fs::write(dir.path().join("about.html"), "about").unwrap();
        assert!(views.reload().unwrap());
        assert_eq!(
            views.render_to_string("about", &RenderContext::default().skip_layout()).unwrap(),
            "about"
        );
    }

    #[test]
    fn test_build_fails_on_parse_error() {
        let dir = write_tree(&[("index.html", "{% for %}")]);
        assert!(matches!(
            Views::builder(dir.path()).build(),
            Err(ScanError::Parse { .. })
        ));
    }

    #[test]
    fn test_from_config() {
        let dir = write_tree(&[
            ("shells/app.html", r#"[{% include "main" %}]"#),
            ("+card.html", "card"),
            ("index.html", "{% set g = globals() %}{{ g.site_name }}"),
        ]);
        let mut config = ProjectConfig::from_str(
            r#"
            [views]
            partial_marker = "+"
            layouts_dir = "shells"
            default_layout = "app"

            [globals]
            site_name = "Events"
        "#,
        )
        .unwrap();
        config.views.root = dir.path().to_path_buf();

        let views = ViewsBuilder::from_config(&config).build().unwrap();
        let ctx = RenderContext::default();
        assert_eq!(views.render_to_string("index", &ctx).unwrap(), "[Events]");
        assert_eq!(views.render_to_string("card", &ctx).unwrap(), "card");
    }
}
