// error.rs — Error types for the approval subsystem.
//
// Uses `thiserror` to derive the standard Rust `Error` trait automatically.
// Persistence failures are logged by the manager, never propagated to a
// caller waiting on an approval — the in-memory state is authoritative.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while persisting approval state.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// Failed to write or rename the state file.
    #[error("failed to write approval state at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize approval state (malformed JSON).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
