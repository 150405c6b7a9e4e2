//! Live registry with atomic hot reload.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 RegistryHandle (ArcSwap)                    │
//! │                                                             │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐    │
//! │  │  Request 1  │     │  Request 2  │     │   Watcher   │    │
//! │  └──────┬──────┘     └──────┬──────┘     └──────┬──────┘    │
//! │         ▼                   ▼                   ▼           │
//! │       load()              load()             reload()       │
//! │    (lock-free)         (lock-free)      (atomic replace)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A render holds the `Arc` it loaded until it finishes, so a reload never
//! changes the views under an in-flight request.

use super::{
    error::ScanError,
    registry::{RegistryBuilder, ViewRegistry},
};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared, replaceable [`ViewRegistry`].
pub struct RegistryHandle {
    current: ArcSwap<ViewRegistry>,
}

impl RegistryHandle {
    pub fn new(registry: ViewRegistry) -> Self {
        Self {
            current: ArcSwap::from_pointee(registry),
        }
    }

    /// Current registry. Wait-free.
    #[inline]
    pub fn load(&self) -> Arc<ViewRegistry> {
        self.current.load_full()
    }

    /// Swap in a new registry unconditionally.
    pub fn replace(&self, registry: ViewRegistry) {
        self.current.store(Arc::new(registry));
    }

    /// Rescan with `builder` and swap if any source changed.
    ///
    /// Returns `Ok(false)` when the sources hash to the live fingerprint. On
    /// error the live registry is left untouched.
    pub fn reload(&self, builder: &RegistryBuilder) -> Result<bool, ScanError> {
        let sources = builder.scan()?;
        if sources.fingerprint.is_some() && sources.fingerprint == self.load().fingerprint() {
            return Ok(false);
        }

        let registry = builder.compile(&sources)?;
        self.replace(registry);
        Ok(true)
    }
}

impl std::fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.load();
        f.debug_struct("RegistryHandle")
            .field("pages", &current.page_count())
            .field("partials", &current.partial_count())
            .field("layouts", &current.layout_count())
            .finish()
    }
}
