//! File system watcher for view hot reload.
//!
//! Monitors the views root and swaps in a freshly compiled registry when any
//! source changes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Event Loop                              │
//! │                                                              │
//! │  ┌──────────┐    ┌──────────┐    ┌────────────────────────┐  │
//! │  │ notify   │───▶│ Debouncer│───▶│    handle_changes()    │  │
//! │  │ events   │    │ (300ms)  │    │                        │  │
//! │  └──────────┘    └──────────┘    │  Views::reload()       │  │
//! │                                  │   ├─ unchanged → skip  │  │
//! │                                  │   ├─ Ok → swap         │  │
//! │                                  │   └─ Err → keep old    │  │
//! │                                  └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::{log, logger::WatchStatus, views::Views};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

// =============================================================================
// Constants
// =============================================================================

const DEBOUNCE_MS: u64 = 300;
const RELOAD_COOLDOWN_MS: u64 = 500;

// =============================================================================
// Path Utilities
// =============================================================================

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

/// Format path relative to the views root for log display.
///
/// `/proj/views/events/show.html` → `events/show.html`
fn rel_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

// =============================================================================
// Debounce State
// =============================================================================

/// Batches rapid file events with debouncing and reload cooldown.
struct Debouncer {
    pending: FxHashSet<PathBuf>,
    last_event: Option<Instant>,
    last_reload: Option<Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            pending: FxHashSet::default(),
            last_event: None,
            last_reload: None,
        }
    }

    fn in_cooldown(&self) -> bool {
        self.last_reload
            .is_some_and(|t| t.elapsed() < Duration::from_millis(RELOAD_COOLDOWN_MS))
    }

    fn add(&mut self, event: Event) {
        for path in event.paths {
            if !is_temp_file(&path) {
                self.pending.insert(path);
            }
        }
        self.last_event = Some(Instant::now());
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty()
            && self
                .last_event
                .is_some_and(|t| t.elapsed() >= Duration::from_millis(DEBOUNCE_MS))
    }

    fn take(&mut self) -> Vec<PathBuf> {
        self.last_event = None;
        let mut paths: Vec<_> = self.pending.drain().collect();
        paths.sort();
        paths
    }

    fn mark_reload(&mut self) {
        self.last_reload = Some(Instant::now());
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_secs(60)
        } else {
            Duration::from_millis(DEBOUNCE_MS)
        }
    }
}

// =============================================================================
// Event Handler
// =============================================================================

/// Reload the registry for a batch of changed paths. Returns true on swap.
fn handle_changes(paths: &[PathBuf], views: &Views, status: &mut WatchStatus) -> bool {
    let Some(first) = paths.first() else {
        return false;
    };

    let root = views.root();
    let trigger = match paths.len() {
        1 => rel_path(first, root),
        n => format!("{} (+{} more)", rel_path(first, root), n - 1),
    };

    match views.reload() {
        Ok(true) => {
            let registry = views.registry();
            status.success(&format!(
                "reloaded: {trigger} ({} pages, {} partials, {} layouts)",
                registry.page_count(),
                registry.partial_count(),
                registry.layout_count()
            ));
            true
        }
        Ok(false) => {
            status.unchanged(&trigger);
            false
        }
        Err(err) => {
            let detail = anyhow::Error::new(err);
            status.error(&format!("reload failed: {trigger}"), &format!("{detail:#}"));
            false
        }
    }
}

const fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

// =============================================================================
// Public API
// =============================================================================

/// Start blocking file watcher on the views root.
pub fn watch_for_changes_blocking(views: Arc<Views>) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
    watcher
        .watch(views.root(), RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch views: {}", views.root().display()))?;

    log!("watch"; "{}", views.root().display());

    let mut debouncer = Debouncer::new();
    let mut status = WatchStatus::new();

    loop {
        match rx.recv_timeout(debouncer.timeout()) {
            Ok(Ok(event)) if is_relevant(&event) && !debouncer.in_cooldown() => {
                debouncer.add(event);
            }
            Ok(Err(e)) => log!("watch"; "error: {e}"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) if debouncer.ready() => {
                if handle_changes(&debouncer.take(), &views, &mut status) {
                    debouncer.mark_reload();
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            // Irrelevant events, or a timeout with nothing ready
            _ => {}
        }
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(Path::new("views/index.html~")));
        assert!(is_temp_file(Path::new("views/.index.html.swp")));
        assert!(is_temp_file(Path::new("views/index.bak")));
        assert!(!is_temp_file(Path::new("views/index.html")));
        assert!(!is_temp_file(Path::new("views/_nav.html")));
    }

    #[test]
    fn test_rel_path() {
        let root = Path::new("/proj/views");
        assert_eq!(rel_path(Path::new("/proj/views/events/show.html"), root), "events/show.html");
        assert_eq!(rel_path(Path::new("/elsewhere/x.html"), root), "/elsewhere/x.html");
    }

    #[test]
    fn test_is_relevant() {
        assert!(is_relevant(&event(EventKind::Create(CreateKind::File), &[])));
        assert!(is_relevant(&event(EventKind::Modify(ModifyKind::Any), &[])));
        assert!(!is_relevant(&event(EventKind::Access(notify::event::AccessKind::Any), &[])));
    }

    #[test]
    fn test_debouncer_collects_and_filters() {
        let mut debouncer = Debouncer::new();
        assert_eq!(debouncer.timeout(), Duration::from_secs(60));

        debouncer.add(event(
            EventKind::Modify(ModifyKind::Any),
            &["/v/b.html", "/v/a.html", "/v/a.html~", "/v/b.html"],
        ));
        assert_eq!(debouncer.timeout(), Duration::from_millis(DEBOUNCE_MS));
        // Not ready until the debounce window has passed.
        assert!(!debouncer.ready());

        let taken = debouncer.take();
        assert_eq!(taken, vec![PathBuf::from("/v/a.html"), PathBuf::from("/v/b.html")]);
        assert!(debouncer.pending.is_empty());
        assert!(!debouncer.ready());
    }

    #[test]
    fn test_debouncer_cooldown() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.in_cooldown());
        debouncer.mark_reload();
        assert!(debouncer.in_cooldown());
    }
}
