// store.rs — File-backed approval state.
//
// State lives at `<project>/.loki/state/approvals.json` as a single JSON
// document `{ pending: [...], audit: [...] }`. Every write goes to a
// sibling temp file first and is renamed into place, so a crash mid-write
// leaves the previous state intact rather than a torn file.
//
// A corrupt or unreadable state file is treated as empty with a warning —
// it must never prevent startup. The host truncates/rotates the file; the
// store never trims.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ApprovalError;
use crate::request::ApprovalRequest;

/// The persisted shape: in-flight requests plus the resolved audit list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalState {
    #[serde(default)]
    pub pending: Vec<ApprovalRequest>,
    #[serde(default)]
    pub audit: Vec<ApprovalRequest>,
}

/// Store handle bound to one project's state file.
pub struct ApprovalStateStore {
    path: PathBuf,
}

impl ApprovalStateStore {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            path: project_dir
                .as_ref()
                .join(".loki")
                .join("state")
                .join("approvals.json"),
        }
    }

    /// Load persisted state. Missing and corrupt files both yield the
    /// empty state; corruption is logged.
    pub fn load(&self) -> ApprovalState {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return ApprovalState::default()
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to read approval state, starting empty");
                return ApprovalState::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "corrupt approval state, starting empty");
                ApprovalState::default()
            }
        }
    }

    /// Atomically persist a state snapshot: write a sibling temp file,
    /// then rename over the target.
    pub fn save(&self, state: &ApprovalState) -> Result<(), ApprovalError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ApprovalError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| ApprovalError::WriteFailed {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| ApprovalError::WriteFailed {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Resolution;
    use serde_json::json;
    use tempfile::tempdir;

    fn request(phase: &str) -> ApprovalRequest {
        ApprovalRequest::new(phase, "gate", json!({}))
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = ApprovalStateStore::new(dir.path());
        let state = store.load();
        assert!(state.pending.is_empty());
        assert!(state.audit.is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = ApprovalStateStore::new(dir.path());

        let mut state = ApprovalState::default();
        state.pending.push(request("deploy"));
        let mut resolved = request("release");
        resolved.resolution = Some(Resolution::Allow);
        state.audit.push(resolved);

        store.save(&state).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.pending.len(), 1);
        assert_eq!(loaded.pending[0].phase, "deploy");
        assert_eq!(loaded.audit.len(), 1);
        assert_eq!(loaded.audit[0].resolution, Some(Resolution::Allow));
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = ApprovalStateStore::new(dir.path());
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{this is not json").unwrap();

        let state = store.load();
        assert!(state.pending.is_empty());
        assert!(state.audit.is_empty());
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let store = ApprovalStateStore::new(dir.path());
        store.save(&ApprovalState::default()).unwrap();

        let entries: Vec<_> = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("approvals.json")]);
    }
}
