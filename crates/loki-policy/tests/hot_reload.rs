// hot_reload.rs — end-to-end hot reload through the file observer.
//
// These tests exercise the real notify watcher against a temp directory,
// so they wait with a bounded polling helper rather than a fixed sleep.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::tempdir;

use loki_policy::{Decision, PolicyEngine};

const AGENT_CAP_5: &str = r#"{"policies": {"pre_execution": [
    {"name": "max-agents", "rule": "active_agents <= 5", "action": "deny"}
]}}"#;

const AGENT_CAP_10: &str = r#"{"policies": {"pre_execution": [
    {"name": "max-agents", "rule": "active_agents <= 10", "action": "deny"}
]}}"#;

fn write_policies(project: &Path, content: &str) {
    let loki = project.join(".loki");
    fs::create_dir_all(&loki).unwrap();
    fs::write(loki.join("policies.json"), content).unwrap();
}

/// Wait up to `deadline` for `check` to become true.
fn wait_for(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    check()
}

#[test]
fn watcher_reloads_after_edit() {
    let dir = tempdir().unwrap();
    write_policies(dir.path(), AGENT_CAP_5);

    let engine = PolicyEngine::watching(dir.path()).unwrap();
    let ctx = json!({"active_agents": 7});
    assert_eq!(engine.evaluate("pre_execution", &ctx).decision, Decision::Deny);

    write_policies(dir.path(), AGENT_CAP_10);

    // Debounce is 250 ms; give the watcher a generous but bounded window.
    let reloaded = wait_for(Duration::from_secs(10), || {
        engine.evaluate("pre_execution", &ctx).decision == Decision::Allow
    });
    assert!(reloaded, "engine never observed the edited policy file");

    engine.destroy();
}

#[test]
fn destroy_stops_the_observer() {
    let dir = tempdir().unwrap();
    write_policies(dir.path(), AGENT_CAP_5);

    let engine = PolicyEngine::watching(dir.path()).unwrap();
    engine.destroy();

    write_policies(dir.path(), AGENT_CAP_10);
    std::thread::sleep(Duration::from_millis(600));

    // The observer is gone, so the old snapshot still answers.
    let ctx = json!({"active_agents": 7});
    assert_eq!(engine.evaluate("pre_execution", &ctx).decision, Decision::Deny);

    // A forced reload still works after destroy.
    engine.reload();
    assert_eq!(engine.evaluate("pre_execution", &ctx).decision, Decision::Allow);
}

#[test]
fn watching_without_policy_dir_is_supported() {
    let dir = tempdir().unwrap();
    let engine = PolicyEngine::watching(dir.path()).unwrap();
    assert!(!engine.has_policies());
    assert_eq!(
        engine.evaluate("pre_execution", &json!({})).decision,
        Decision::Allow
    );
}
