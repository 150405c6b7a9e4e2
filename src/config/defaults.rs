//! Default values for configuration fields.
//!
//! These functions are used by serde for default deserialization.

// ============================================================================
// Common Defaults
// ============================================================================

pub fn r#true() -> bool {
    true
}

// ============================================================================
// [views] Section Defaults
// ============================================================================

pub mod views {
    use std::path::PathBuf;

    pub fn root() -> PathBuf {
        "views".into()
    }

    pub fn extensions() -> Vec<String> {
        vec!["html".into()]
    }

    pub fn partial_marker() -> String {
        "_".into()
    }

    pub fn layouts_dir() -> String {
        "layouts".into()
    }

    pub fn default_layout() -> String {
        "base".into()
    }

    pub fn partial_layout() -> String {
        "partial".into()
    }
}

// ============================================================================
// [serve] Section Defaults
// ============================================================================

pub mod serve {
    use std::path::PathBuf;

    pub fn interface() -> String {
        "127.0.0.1".into()
    }

    pub fn port() -> u16 {
        5277
    }

    pub fn data() -> PathBuf {
        "data".into()
    }
}
