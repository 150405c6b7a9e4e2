//! Template function bindings.
//!
//! Two tables, with different lifetimes:
//!
//! - [`FunctionSet`]: installed on every compiled view at build time and shared
//!   by all requests. Must not capture request state.
//! - [`ScopedFunctionSet`]: bound to one [`RequestScope`] and installed on a
//!   private clone of the view's engine for a single render. The registry's
//!   shared instances never see them.

use super::layout::RequestScope;
use serde_json::Map;
use std::{collections::HashMap, sync::Arc};
use tera::{Function, Tera, Value};

/// Function name reserved for nested partial rendering.
pub const PARTIAL_FUNCTION: &str = "partial";

// ============================================================================
// Static Functions
// ============================================================================

/// A tera function that can be installed on many engines.
#[derive(Clone)]
pub struct SharedFunction(Arc<dyn Function>);

impl SharedFunction {
    pub fn new(function: impl Function + 'static) -> Self {
        Self(Arc::new(function))
    }
}

impl Function for SharedFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        self.0.call(args)
    }

    fn is_safe(&self) -> bool {
        self.0.is_safe()
    }
}

/// Functions available to every view regardless of the request.
#[derive(Clone, Default)]
pub struct FunctionSet {
    entries: Vec<(String, SharedFunction)>,
}

impl FunctionSet {
    /// `map(...)` plus `globals()` returning `globals`.
    pub fn with_defaults(globals: Value) -> Self {
        let mut set = Self::default();
        set.insert("map", map);
        set.insert("globals", Globals(globals));
        set
    }

    /// Add or replace a function.
    pub fn insert(&mut self, name: &str, function: impl Function + 'static) {
        self.entries.retain(|(n, _)| n != name);
        self.entries.push((name.to_owned(), SharedFunction::new(function)));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn install(&self, tera: &mut Tera) {
        for (name, function) in &self.entries {
            tera.register_function(name, function.clone());
        }
    }
}

/// `map(title="x", count=2)` → `{"title": "x", "count": 2}`.
///
/// tera has no object literals; this is how templates hand data to partials.
fn map(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let object: Map<String, Value> = args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Ok(Value::Object(object))
}

/// `globals()` → site-wide values from configuration.
struct Globals(Value);

impl Function for Globals {
    fn call(&self, _args: &HashMap<String, Value>) -> tera::Result<Value> {
        Ok(self.0.clone())
    }
}

// ============================================================================
// Request-Scoped Functions
// ============================================================================

/// A template function that reads the current request.
pub trait ScopedFunction: Send + Sync {
    fn call(&self, request: &RequestScope, args: &HashMap<String, Value>) -> tera::Result<Value>;

    /// Whether the output skips autoescaping.
    fn is_safe(&self) -> bool {
        false
    }
}

impl<F> ScopedFunction for F
where
    F: Fn(&RequestScope, &HashMap<String, Value>) -> tera::Result<Value> + Send + Sync,
{
    fn call(&self, request: &RequestScope, args: &HashMap<String, Value>) -> tera::Result<Value> {
        self(request, args)
    }
}

/// Request-aware functions, bound per render.
#[derive(Clone, Default)]
pub struct ScopedFunctionSet {
    entries: Vec<(String, Arc<dyn ScopedFunction>)>,
}

impl ScopedFunctionSet {
    /// `csrf()` and `flash()`.
    pub fn with_defaults() -> Self {
        let mut set = Self::default();
        set.insert("csrf", csrf);
        set.insert("flash", flash);
        set
    }

    /// Add or replace a function.
    pub fn insert(&mut self, name: &str, function: impl ScopedFunction + 'static) {
        self.entries.retain(|(n, _)| n != name);
        self.entries.push((name.to_owned(), Arc::new(function)));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Install every function on `tera`, closed over `request`.
    ///
    /// `tera` must be a per-render clone.
    pub(crate) fn bind(&self, tera: &mut Tera, request: &Arc<RequestScope>) {
        for (name, function) in &self.entries {
            tera.register_function(
                name,
                BoundFunction {
                    function: Arc::clone(function),
                    request: Arc::clone(request),
                },
            );
        }
    }
}

/// A [`ScopedFunction`] closed over one request.
struct BoundFunction {
    function: Arc<dyn ScopedFunction>,
    request: Arc<RequestScope>,
}

impl Function for BoundFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        self.function.call(&self.request, args)
    }

    fn is_safe(&self) -> bool {
        self.function.is_safe()
    }
}

fn csrf(request: &RequestScope, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(request.value_str("csrf_token").to_owned()))
}

fn flash(request: &RequestScope, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(request.value_str("flash").to_owned()))
}
