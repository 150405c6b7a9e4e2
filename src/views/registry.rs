//! Startup scan and compilation of the views tree.
//!
//! # Build Flow
//!
//! ```text
//! scan(root) ──► SourceSet { pages, partials, layouts, fingerprint }
//!                    │
//!                    ▼
//! SharedTemplates ──► layouts + partials parsed once, include cycles checked
//!                    │
//!                    ▼ clone + `main`
//! compile() ──► one CompiledView per page
//!           └─► one CompiledView per partial
//!                    │
//!                    ▼
//!               ViewRegistry (immutable, shared by every request)
//! ```
//!
//! Any IO, naming, parse or include-cycle failure aborts the whole build: a
//! registry is either complete or absent.

use super::{
    error::{ScanError, error_chain},
    funcs::FunctionSet,
    includes::{IncludeGraph, include_targets},
    kind::{Convention, LogicalName, ViewKind},
};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tera::{Template, Tera};
use walkdir::WalkDir;

/// Template name of a view's own body inside its compiled engine.
pub const MAIN_BLOCK: &str = "main";

// ============================================================================
// Sources
// ============================================================================

/// One classified markup file, read into memory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub kind: ViewKind,
    pub name: LogicalName,
    pub path: PathBuf,
    pub body: String,
}

/// Result of scanning a views tree.
#[derive(Debug, Default)]
pub struct SourceSet {
    pub pages: Vec<SourceFile>,
    pub partials: Vec<SourceFile>,
    pub layouts: Vec<SourceFile>,
    /// Hash over every source path and body, in walk order.
    pub fingerprint: Option<blake3::Hash>,
}

impl SourceSet {
    pub fn len(&self) -> usize {
        self.pages.len() + self.partials.len() + self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, source: SourceFile) {
        match source.kind {
            ViewKind::Page => self.pages.push(source),
            ViewKind::Partial => self.partials.push(source),
            ViewKind::Layout => self.layouts.push(source),
        }
    }
}

// ============================================================================
// Shared Templates
// ============================================================================

/// Layouts and partials, parsed once per build and cloned into every view.
#[derive(Clone)]
pub struct SharedTemplates {
    engine: Tera,
    includes: IncludeGraph,
}

impl SharedTemplates {
    /// Parse `attached` into one engine and reject include cycles among them.
    pub fn build(attached: &[&SourceFile], options: &CompileOptions) -> Result<Self, ScanError> {
        let mut engine = Tera::default();
        if options.autoescape {
            // Logical names carry no `.html` suffix for tera to key off.
            engine.autoescape_on(vec![""]);
        } else {
            engine.autoescape_on(vec![]);
        }
        options.functions.install(&mut engine);

        let templates = attached.iter().map(|s| (s.name.as_str(), s.body.as_str()));
        if let Err(source) = engine.add_raw_templates(templates) {
            return Err(blame(attached, source));
        }

        let includes = IncludeGraph::from_engine(&engine);
        if let Some(cycle) = includes.find_cycle() {
            let name = cycle.first().cloned().unwrap_or_default();
            let kind = attached
                .iter()
                .find(|s| s.name.as_str() == name)
                .map_or(ViewKind::Partial, |s| s.kind);
            return Err(ScanError::IncludeCycle { kind, name, cycle });
        }

        Ok(Self { engine, includes })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engine.get_template_names()
    }
}

/// Pin a failed batch parse on the file that caused it.
///
/// The batch error only says which template name failed; reparsing alone
/// recovers the file's kind. Runs on the error path only.
fn blame(attached: &[&SourceFile], source: tera::Error) -> ScanError {
    let culprit = attached
        .iter()
        .find(|s| Template::new(s.name.as_str(), None, &s.body).is_err());
    match culprit {
        Some(s) => ScanError::parse(s.kind, s.name.as_str(), source),
        None => ScanError::Link {
            detail: error_chain(&source),
            source,
        },
    }
}

// ============================================================================
// Compiled View
// ============================================================================

/// A page or partial together with every template it may reference.
///
/// Never mutated after the build. Renders that need request-bound functions
/// work on a clone of [`CompiledView::engine`].
#[derive(Clone)]
pub struct CompiledView {
    name: LogicalName,
    kind: ViewKind,
    source: PathBuf,
    engine: Tera,
    blocks: FxHashSet<String>,
}

impl std::fmt::Debug for CompiledView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledView")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("blocks", &self.blocks)
            .finish_non_exhaustive()
    }
}

impl CompiledView {
    /// Compile `root` as `main` on a copy of the shared templates.
    pub fn compile(root: &SourceFile, shared: &SharedTemplates) -> Result<Self, ScanError> {
        let mut engine = shared.engine.clone();
        engine
            .add_raw_template(MAIN_BLOCK, &root.body)
            .map_err(|source| ScanError::parse(root.kind, root.name.as_str(), source))?;

        let main = engine
            .get_template(MAIN_BLOCK)
            .map(|template| include_targets(template, |name| engine.get_template(name).is_ok()))
            .unwrap_or_default();
        if let Some(cycle) = shared.includes.find_cycle_through(&main) {
            return Err(ScanError::IncludeCycle {
                kind: root.kind,
                name: root.name.to_string(),
                cycle,
            });
        }

        let blocks = std::iter::once(MAIN_BLOCK.to_owned())
            .chain(shared.names().map(str::to_owned))
            .collect();

        Ok(Self {
            name: root.name.clone(),
            kind: root.kind,
            source: root.path.clone(),
            engine,
            blocks,
        })
    }

    pub fn name(&self) -> &LogicalName {
        &self.name
    }

    pub const fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Source file of the root body.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Whether `block` (a logical name or `main`) is part of this view.
    pub fn has_block(&self, block: &str) -> bool {
        self.blocks.contains(block)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(String::as_str)
    }

    /// The shared engine. Do not register request-bound functions on it.
    pub(crate) fn engine(&self) -> &Tera {
        &self.engine
    }
}

/// Settings applied to every compiled view.
#[derive(Clone, Default)]
pub struct CompileOptions {
    pub autoescape: bool,
    pub functions: FunctionSet,
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable lookup tables of compiled pages and partials.
///
/// Pages and partials are separate namespaces; layouts exist only inside the
/// compiled views they wrap.
#[derive(Debug, Default)]
pub struct ViewRegistry {
    pages: FxHashMap<LogicalName, CompiledView>,
    partials: FxHashMap<LogicalName, CompiledView>,
    layouts: Vec<LogicalName>,
    fingerprint: Option<blake3::Hash>,
}

impl ViewRegistry {
    pub fn page(&self, name: &str) -> Option<&CompiledView> {
        self.pages.get(name)
    }

    pub fn partial(&self, name: &str) -> Option<&CompiledView> {
        self.partials.get(name)
    }

    /// Look up a view by name, partials first.
    pub fn lookup(&self, name: &str) -> Option<&CompiledView> {
        self.partial(name).or_else(|| self.page(name))
    }

    /// Sorted names of one kind.
    pub fn names(&self, kind: ViewKind) -> Vec<&str> {
        let mut names: Vec<&str> = match kind {
            ViewKind::Page => self.pages.keys().map(LogicalName::as_str).collect(),
            ViewKind::Partial => self.partials.keys().map(LogicalName::as_str).collect(),
            ViewKind::Layout => self.layouts.iter().map(LogicalName::as_str).collect(),
        };
        names.sort_unstable();
        names
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn partial_count(&self) -> usize {
        self.partials.len()
    }

    pub fn layout_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn fingerprint(&self) -> Option<blake3::Hash> {
        self.fingerprint
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Walks a views root once and compiles a [`ViewRegistry`].
#[derive(Clone)]
pub struct RegistryBuilder {
    root: PathBuf,
    convention: Convention,
    options: CompileOptions,
}

impl RegistryBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            convention: Convention::default(),
            options: CompileOptions {
                autoescape: true,
                functions: FunctionSet::with_defaults(serde_json::Value::Null),
            },
        }
    }

    pub fn convention(mut self, convention: Convention) -> Self {
        self.convention = convention;
        self
    }

    pub fn autoescape(mut self, enable: bool) -> Self {
        self.options.autoescape = enable;
        self
    }

    pub fn functions(mut self, functions: FunctionSet) -> Self {
        self.options.functions = functions;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get_convention(&self) -> &Convention {
        &self.convention
    }

    /// Scan and compile.
    pub fn build(&self) -> Result<ViewRegistry, ScanError> {
        let sources = self.scan()?;
        self.compile(&sources)
    }

    /// Walk the tree, classify and read every markup file.
    ///
    /// Fails on unreadable files, empty or reserved names, and names that
    /// collide within a namespace.
    pub fn scan(&self) -> Result<SourceSet, ScanError> {
        if !self.root.is_dir() {
            return Err(ScanError::MissingRoot(self.root.clone()));
        }

        let mut sources = SourceSet::default();
        let mut seen: FxHashMap<(bool, LogicalName), PathBuf> = FxHashMap::default();
        let mut hasher = blake3::Hasher::new();

        for entry in WalkDir::new(&self.root).follow_links(true).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let Some((kind, name)) = self.convention.classify(relative) else {
                continue;
            };

            if name.base().is_empty() {
                return Err(ScanError::EmptyName(path));
            }
            if kind == ViewKind::Partial && name.as_str() == MAIN_BLOCK {
                return Err(ScanError::ReservedName {
                    kind,
                    name: name.to_string(),
                    path,
                });
            }

            // Layouts and partials are attached side by side, so they share names.
            let key = (kind == ViewKind::Page, name.clone());
            if let Some(first) = seen.get(&key) {
                return Err(ScanError::DuplicateName {
                    kind,
                    name: name.to_string(),
                    first: first.clone(),
                    second: path,
                });
            }

            let body = fs::read_to_string(&path).map_err(|err| ScanError::Io(path.clone(), err))?;
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update(&[0]);
            hasher.update(body.as_bytes());
            hasher.update(&[0]);

            seen.insert(key, path.clone());
            sources.push(SourceFile {
                kind,
                name,
                path,
                body,
            });
        }

        sources.fingerprint = Some(hasher.finalize());
        Ok(sources)
    }

    /// Compile scanned sources. Pages and partials compile in parallel.
    pub fn compile(&self, sources: &SourceSet) -> Result<ViewRegistry, ScanError> {
        let attached: Vec<&SourceFile> = sources
            .layouts
            .iter()
            .chain(sources.partials.iter())
            .collect();
        let shared = SharedTemplates::build(&attached, &self.options)?;

        type Compiled = FxHashMap<LogicalName, CompiledView>;
        let compile_all = |roots: &[SourceFile]| -> Result<Compiled, ScanError> {
            roots
                .par_iter()
                .map(|root| {
                    CompiledView::compile(root, &shared)
                        .map(|view| (root.name.clone(), view))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|views| views.into_iter().collect())
        };

        let pages = compile_all(&sources.pages)?;
        let partials = compile_all(&sources.partials)?;

        Ok(ViewRegistry {
            pages,
            partials,
            layouts: sources.layouts.iter().map(|s| s.name.clone()).collect(),
            fingerprint: sources.fingerprint,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
