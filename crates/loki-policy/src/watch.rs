// watch.rs — Policy file observer with debounced reload.
//
// Watches the `.loki` directory and re-runs the loader when the policy
// file changes. Editors and atomic-save tools fire several filesystem
// events per write, so events are collapsed: the reload runs only after
// 250 ms of quiet, and every fresh event during the window restarts the
// wait. The delayed action is a blocking `recv_timeout` on a channel, so
// stopping the watcher cancels it immediately — there is no polling loop.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::PolicyError;
use crate::loader;
use crate::types::PolicySet;

const DEBOUNCE: Duration = Duration::from_millis(250);

enum WatchMsg {
    Changed,
    Stop,
}

/// Handle to a running policy file observer. Dropping it stops the
/// observer and joins the debounce thread.
pub struct PolicyWatcher {
    tx: Sender<WatchMsg>,
    handle: Option<JoinHandle<()>>,
    // Keeps the OS-level watch registered for as long as the handle lives.
    _watcher: RecommendedWatcher,
}

impl PolicyWatcher {
    /// Install a watcher on `<project>/.loki` that reloads into `snapshot`.
    pub fn spawn(
        project_dir: PathBuf,
        snapshot: Arc<RwLock<Arc<PolicySet>>>,
    ) -> Result<Self, PolicyError> {
        let dir = project_dir.join(loader::POLICY_DIR);
        let (tx, rx) = mpsc::channel();

        let event_tx = tx.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        // Only events that mention the policy file matter;
                        // state files share the directory.
                        if event.paths.iter().any(|path| loader::is_policy_file(path)) {
                            let _ = event_tx.send(WatchMsg::Changed);
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "policy watcher event error"),
                }
            })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let handle = std::thread::spawn(move || debounce_loop(rx, project_dir, snapshot));

        Ok(Self {
            tx,
            handle: Some(handle),
            _watcher: watcher,
        })
    }
}

impl Drop for PolicyWatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(WatchMsg::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn debounce_loop(
    rx: Receiver<WatchMsg>,
    project_dir: PathBuf,
    snapshot: Arc<RwLock<Arc<PolicySet>>>,
) {
    loop {
        match rx.recv() {
            Ok(WatchMsg::Stop) | Err(_) => return,
            Ok(WatchMsg::Changed) => {
                // Collapse the burst: keep waiting while events arrive,
                // reload once the window stays quiet.
                loop {
                    match rx.recv_timeout(DEBOUNCE) {
                        Ok(WatchMsg::Changed) => continue,
                        Ok(WatchMsg::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                        Err(RecvTimeoutError::Timeout) => break,
                    }
                }

                let fresh = Arc::new(loader::load(&project_dir));
                let issue_count = fresh.issues.len();
                match snapshot.write() {
                    Ok(mut guard) => *guard = fresh,
                    Err(poisoned) => *poisoned.into_inner() = fresh,
                }
                tracing::info!(
                    project_dir = %project_dir.display(),
                    issues = issue_count,
                    "policies reloaded"
                );
            }
        }
    }
}
