//! Buffered view execution.
//!
//! # Render Pipeline
//!
//! ```text
//! RenderContext ─► LayoutResolver ─► block name
//!                                        │
//! data ─► DataInjector ─► tera::Context  │
//!                              │         │
//!          view.engine().clone() + request-bound functions
//!                              │
//!                              ▼
//!                       String buffer ──(Ok)──► sink
//!                              │
//!                            (Err) ──► RenderError, sink untouched
//! ```
//!
//! The per-render clone is what keeps one request's `csrf()`, `flash()` and
//! `partial()` bindings invisible to every other request sharing the view.
//! It copies every template of the view, so it happens once per top-level
//! render: `partial()` renders the attached copy of the partial on that same
//! engine, however many times a loop calls it.

use super::{
    error::{RenderError, error_chain},
    funcs::{PARTIAL_FUNCTION, ScopedFunctionSet},
    layout::{LayoutResolver, LayoutState, RenderContext, RequestScope},
    registry::{CompiledView, MAIN_BLOCK, ViewRegistry},
};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    io::Write,
    sync::{
        Arc, Weak,
        atomic::{AtomicUsize, Ordering},
    },
};
use tera::{Context, Function, Tera};

/// Maximum nesting of `partial()` calls within one render.
pub const MAX_PARTIAL_DEPTH: usize = 32;

// ============================================================================
// Data Injector
// ============================================================================

/// Hook merging cross-cutting values into render data before execution.
///
/// Runs once per executed view, nested partials included.
pub trait DataInjector: Send + Sync {
    fn inject(&self, request: &RequestScope, data: Value) -> Value;
}

impl<F> DataInjector for F
where
    F: Fn(&RequestScope, Value) -> Value + Send + Sync,
{
    fn inject(&self, request: &RequestScope, data: Value) -> Value {
        self(request, data)
    }
}

// ============================================================================
// Renderer
// ============================================================================

/// Executes compiled views. Cheap to clone.
#[derive(Clone)]
pub struct Renderer {
    resolver: Arc<LayoutResolver>,
    scoped: Arc<ScopedFunctionSet>,
    injector: Option<Arc<dyn DataInjector>>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(LayoutResolver::default())
    }
}

impl Renderer {
    pub fn new(resolver: LayoutResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
            scoped: Arc::new(ScopedFunctionSet::with_defaults()),
            injector: None,
        }
    }

    pub fn with_scoped_functions(mut self, scoped: ScopedFunctionSet) -> Self {
        self.scoped = Arc::new(scoped);
        self
    }

    pub fn with_injector(mut self, injector: impl DataInjector + 'static) -> Self {
        self.injector = Some(Arc::new(injector));
        self
    }

    pub(crate) fn with_shared_injector(mut self, injector: Option<Arc<dyn DataInjector>>) -> Self {
        self.injector = injector;
        self
    }

    pub fn resolver(&self) -> &LayoutResolver {
        &self.resolver
    }

    /// Render `view` into `sink`. Nothing is written unless rendering succeeds.
    pub fn render(
        &self,
        registry: &Arc<ViewRegistry>,
        view: &CompiledView,
        ctx: &RenderContext,
        sink: &mut impl Write,
    ) -> Result<(), RenderError> {
        let buffer = self.render_to_string(registry, view, ctx)?;
        sink.write_all(buffer.as_bytes()).map_err(RenderError::Sink)
    }

    /// Render `view` into a fresh buffer, resolving the layout from `ctx`.
    pub fn render_to_string(
        &self,
        registry: &Arc<ViewRegistry>,
        view: &CompiledView,
        ctx: &RenderContext,
    ) -> Result<String, RenderError> {
        self.render_with(registry, view, ctx.state(), ctx)
    }

    /// Like [`Renderer::render_to_string`] with an explicit layout state.
    pub(crate) fn render_with(
        &self,
        registry: &Arc<ViewRegistry>,
        view: &CompiledView,
        state: LayoutState<'_>,
        ctx: &RenderContext,
    ) -> Result<String, RenderError> {
        let block = self.resolver.resolve(view, state)?;
        self.execute(registry, view, &block, ctx.data.clone(), &ctx.request)
    }

    fn execute(
        &self,
        registry: &Arc<ViewRegistry>,
        view: &CompiledView,
        block: &str,
        data: Value,
        request: &Arc<RequestScope>,
    ) -> Result<String, RenderError> {
        let name = view.name().as_str();
        let context = self.context(name, block, data, request)?;

        let engine = Arc::new_cyclic(|this: &Weak<Tera>| {
            let mut engine = view.engine().clone();
            self.scoped.bind(&mut engine, request);
            engine.register_function(
                PARTIAL_FUNCTION,
                PartialFunction {
                    engine: this.clone(),
                    registry: Arc::clone(registry),
                    renderer: self.clone(),
                    request: Arc::clone(request),
                    depth: AtomicUsize::new(0),
                },
            );
            engine
        });

        engine
            .render(block, &context)
            .map_err(|e| RenderError::execution(name, block, e))
    }

    /// Inject, normalize and convert render data.
    fn context(&self, name: &str, block: &str, data: Value, request: &RequestScope) -> Result<Context, RenderError> {
        let data = match &self.injector {
            Some(injector) => injector.inject(request, data),
            None => data,
        };
        let data = match data {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => data,
            other => {
                return Err(RenderError::invalid(
                    name,
                    block,
                    format!("render data must be an object, got `{other}`"),
                ));
            }
        };
        Context::from_value(data).map_err(|e| RenderError::execution(name, block, e))
    }
}

// ============================================================================
// partial()
// ============================================================================

/// `partial(name="events/row", data=map(...))`, bound to one request.
///
/// Renders the partial's bare body with the owning [`Renderer`]'s injector,
/// on the engine it is registered in. Failures come back as plain messages:
/// the nested chain is already flattened into the text, so keeping it as a
/// source would repeat it once per level.
struct PartialFunction {
    engine: Weak<Tera>,
    registry: Arc<ViewRegistry>,
    renderer: Renderer,
    request: Arc<RequestScope>,
    depth: AtomicUsize,
}

impl Function for PartialFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("partial() requires a string `name` argument"))?;

        if self.registry.partial(name).is_none() {
            return Err(tera::Error::msg(format!("partial `{name}` not found")));
        }
        let _level = Nested::enter(&self.depth, name)?;
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| tera::Error::msg(format!("partial `{name}` called after its render ended")))?;

        let data = args.get("data").cloned().unwrap_or(Value::Null);
        let context = self
            .renderer
            .context(name, MAIN_BLOCK, data, &self.request)
            .map_err(|err| tera::Error::msg(err.to_string()))?;

        engine
            .render(name, &context)
            .map(Value::String)
            .map_err(|err| tera::Error::msg(format!("failed to render partial `{name}`: {}", error_chain(&err))))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

/// One level of `partial()` nesting, released on drop.
struct Nested<'a>(&'a AtomicUsize);

impl<'a> Nested<'a> {
    fn enter(depth: &'a AtomicUsize, name: &str) -> tera::Result<Self> {
        if depth.fetch_add(1, Ordering::Relaxed) >= MAX_PARTIAL_DEPTH {
            depth.fetch_sub(1, Ordering::Relaxed);
            return Err(tera::Error::msg(format!(
                "partial `{name}` nested deeper than {MAX_PARTIAL_DEPTH} levels"
            )));
        }
        Ok(Self(depth))
    }
}

impl Drop for Nested<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
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

    fn render_page(registry: &Arc<ViewRegistry>, name: &str, ctx: &RenderContext) -> Result<String, RenderError> {
        let view = registry.lookup(name).unwrap();
        Renderer::default().render_to_string(registry, view, ctx)
    }

    #[test]
    fn test_render_default_layout() {
        let registry = registry(&[
            ("layouts/base.html", r#"<html class="base">{% include "main" %}</html>"#),
            ("index.html", "<p>{{ title }}</p>"),
        ]);
        let ctx = RenderContext::new(json!({"title": "Hi"}));
        assert_eq!(
            render_page(&registry, "index", &ctx).unwrap(),
            r#"<html class="base"><p>Hi</p></html>"#
        );
    }

    #[test]
    fn test_render_escapes_data() {
        let registry = registry(&[("index.html", "{{ title }}")]);
        let ctx = RenderContext::new(json!({"title": "<b>"}));
        assert_eq!(render_page(&registry, "index", &ctx).unwrap(), "&lt;b&gt;");
    }

    #[test]
    fn test_failed_render_writes_nothing() {
        let registry = registry(&[("broken.html", "<p>start</p>{{ missing.field }}<p>end</p>")]);
        let view = registry.page("broken").unwrap();
        let mut sink: Vec<u8> = Vec::new();

        let err = Renderer::default()
            .render(&registry, view, &RenderContext::default(), &mut sink)
            .unwrap_err();
        assert!(sink.is_empty());
        assert!(matches!(err, RenderError::Execution { .. }));
        assert!(err.to_string().contains("missing.field"));
    }

    #[test]
    fn test_successful_render_reaches_sink() {
        let registry = registry(&[("index.html", "ok")]);
        let view = registry.page("index").unwrap();
        let mut sink: Vec<u8> = Vec::new();
        Renderer::default()
            .render(&registry, view, &RenderContext::default(), &mut sink)
            .unwrap();
        assert_eq!(sink, b"ok");
    }

    #[test]
    fn test_injector_runs_before_execution() {
        let registry = registry(&[("index.html", "{{ user }}:{{ title }}")]);
        let view = registry.page("index").unwrap();
        let renderer = Renderer::default().with_injector(|request: &RequestScope, mut data: Value| {
            if let Some(object) = data.as_object_mut() {
                object.insert("user".into(), json!(request.value_str("identity")));
            }
            data
        });
        let ctx = RenderContext::new(json!({"title": "t"}))
            .with_request(RequestScope::new().with_value("identity", "ana"));

        assert_eq!(renderer.render_to_string(&registry, view, &ctx).unwrap(), "ana:t");
    }

    #[test]
    fn test_null_data_is_empty_object() {
        let registry = registry(&[("index.html", "{% if title %}x{% else %}empty{% endif %}")]);
        let ctx = RenderContext::new(Value::Null);
        assert_eq!(render_page(&registry, "index", &ctx).unwrap(), "empty");
    }

    #[test]
    fn test_non_object_data_fails() {
        let registry = registry(&[("index.html", "x")]);
        let err = render_page(&registry, "index", &RenderContext::new(json!([1, 2]))).unwrap_err();
        assert!(matches!(err, RenderError::Execution { source: None, .. }));
    }

    #[test]
    fn test_partial_function_renders_bare_body() {
        let registry = registry(&[
            ("layouts/partial.html", r#"<div class="wrap">{% include "main" %}</div>"#),
            ("_item.html", "<li>{{ label }}</li>"),
            ("list.html", r#"<ul>{{ partial(name="item", data=map(label="a")) }}</ul>"#),
        ]);
        assert_eq!(
            render_page(&registry, "list", &RenderContext::default()).unwrap(),
            "<ul><li>a</li></ul>"
        );
    }

    #[test]
    fn test_partial_function_sees_request() {
        let registry = registry(&[
            ("_token.html", "{{ csrf() }}"),
            ("form.html", r#"<form>{{ partial(name="token") }}</form>"#),
        ]);
        let ctx = RenderContext::default().with_request(RequestScope::new().with_value("csrf_token", "abc"));
        assert_eq!(render_page(&registry, "form", &ctx).unwrap(), "<form>abc</form>");
    }

    #[test]
    fn test_partial_function_missing_partial() {
        let registry = registry(&[("index.html", r#"{{ partial(name="nope") }}"#)]);
        let err = render_page(&registry, "index", &RenderContext::default()).unwrap_err();
        assert!(err.to_string().contains("partial `nope` not found"));
    }

    #[test]
    fn test_partial_recursion_is_bounded() {
        let registry = registry(&[
            ("_loop.html", r#"{{ partial(name="loop") }}"#),
            ("index.html", r#"{{ partial(name="loop") }}"#),
        ]);
        let err = render_page(&registry, "index", &RenderContext::default()).unwrap_err();
        assert!(err.to_string().contains("nested deeper than"));
    }

    /// `_p0` includes `_p1` through `partial()` and so on; the last one fails.
    fn partial_chain(depth: usize) -> Arc<ViewRegistry> {
        let mut files: Vec<(String, String)> = (0..depth)
            .map(|i| (format!("_p{i}.html"), format!(r#"<i>{{{{ partial(name="p{}") }}}}</i>"#, i + 1)))
            .collect();
        files.push((format!("_p{depth}.html"), "{{ missing.field }}".to_owned()));
        files.push(("index.html".to_owned(), r#"{{ partial(name="p0") }}"#.to_owned()));

        let refs: Vec<(&str, &str)> = files.iter().map(|(p, b)| (p.as_str(), b.as_str())).collect();
        registry(&refs)
    }

    #[test]
    fn test_nested_partial_error_grows_linearly() {
        let error_len = |depth| {
            let registry = partial_chain(depth);
            let err = render_page(&registry, "index", &RenderContext::default()).unwrap_err();
            let text = err.to_string();
            assert!(text.contains("missing.field"), "{text}");
            assert!(text.contains(&format!("failed to render partial `p{depth}`")));
            text.len()
        };

        let short = error_len(8);
        let long = error_len(16);
        let longer = error_len(24);
        // Each level adds a few wrapper lines, not a copy of the levels below.
        assert!(long < short * 3, "8: {short}, 16: {long}");
        assert!(longer < short * 4, "8: {short}, 24: {longer}");
    }

    #[test]
    fn test_partial_in_loop_runs_injector_per_call() {
        let registry = registry(&[
            ("_row.html", "<li>{{ n }}{{ mark }}</li>"),
            ("list.html", r#"{% for n in rows %}{{ partial(name="row", data=map(n=n)) }}{% endfor %}"#),
        ]);
        let view = registry.page("list").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let renderer = Renderer::default().with_injector(move |_: &RequestScope, mut data: Value| {
            counter.fetch_add(1, Ordering::Relaxed);
            if let Some(object) = data.as_object_mut() {
                object.insert("mark".into(), json!("."));
            }
            data
        });
        let rows: Vec<usize> = (0..100).collect();
        let ctx = RenderContext::new(json!({ "rows": rows }));

        let out = renderer.render_to_string(&registry, view, &ctx).unwrap();
        assert!(out.starts_with("<li>0.</li><li>1.</li>"));
        assert!(out.ends_with("<li>99.</li>"));
        assert_eq!(calls.load(Ordering::Relaxed), 101);
    }

    #[test]
    fn test_partial_function_rejects_layouts() {
        let registry = registry(&[
            ("layouts/base.html", r#"{% include "main" %}"#),
            ("index.html", r#"{{ partial(name="layouts/base") }}"#),
        ]);
        let err = render_page(&registry, "index", &RenderContext::default().skip_layout()).unwrap_err();
        assert!(err.to_string().contains("partial `layouts/base` not found"));
    }

    #[test]
    fn test_scoped_bindings_stay_off_shared_engine() {
        let registry = registry(&[("index.html", "{{ csrf() }}")]);
        let ctx = RenderContext::default().with_request(RequestScope::new().with_value("csrf_token", "abc"));
        render_page(&registry, "index", &ctx).unwrap();

        let shared = registry.page("index").unwrap().engine();
        assert!(shared.render(MAIN_BLOCK, &Context::new()).is_err());
    }
}
