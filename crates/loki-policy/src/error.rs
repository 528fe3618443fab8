// error.rs — Error types for the policy engine.
//
// Uses `thiserror` to derive the standard Rust `Error` trait automatically.
// Note the narrow surface: loading problems are not errors but validation
// issues on the snapshot (decisions are data, not exceptions), so only the
// watcher plumbing can actually fail.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while operating the policy engine.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Failed to read a file or directory.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to install or tear down the policy file observer.
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}
