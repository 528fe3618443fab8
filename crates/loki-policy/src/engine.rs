// engine.rs — Policy evaluation front-end.
//
// The PolicyEngine holds an immutable PolicySet snapshot behind an atomic
// pointer swap. Every evaluation clones the Arc once, then walks the
// relevant category in declaration order and short-circuits on the first
// non-Allow entry. A reload (manual or from the file watcher) builds a new
// snapshot and swaps the pointer — evaluations in flight keep the snapshot
// they sampled, never a torn mix.
//
// `evaluate()` never panics and performs no I/O: rules and scanner patterns
// are compiled at load time, and missing context fields fail the check
// instead of throwing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;

use crate::error::PolicyError;
use crate::loader;
use crate::rules::RuleOutcome;
use crate::scanner;
use crate::types::{
    Decision, DecisionRecord, EnforcementPoint, ExceedAction, GateConfig, PolicySet, PolicyViolation,
    ResourcePolicy,
};
use crate::watch::PolicyWatcher;

/// The policy engine — one instance per project directory.
pub struct PolicyEngine {
    project_dir: PathBuf,
    snapshot: Arc<RwLock<Arc<PolicySet>>>,
    watcher: Mutex<Option<PolicyWatcher>>,
}

impl PolicyEngine {
    /// Create an engine for a project directory and load its policies.
    ///
    /// Loading never fails — configuration problems surface through
    /// [`PolicyEngine::get_validation_errors`], and a missing policy file
    /// means an empty set (universal Allow).
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        let project_dir = project_dir.as_ref().to_path_buf();
        let set = Arc::new(loader::load(&project_dir));
        Self {
            project_dir,
            snapshot: Arc::new(RwLock::new(set)),
            watcher: Mutex::new(None),
        }
    }

    /// Create an engine with hot reload: a file observer on `.loki/`
    /// re-runs the loader (debounced) whenever the policy file changes.
    pub fn watching(project_dir: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let engine = Self::new(project_dir);
        let dir = engine.project_dir.join(loader::POLICY_DIR);
        if dir.is_dir() {
            let watcher =
                PolicyWatcher::spawn(engine.project_dir.clone(), Arc::clone(&engine.snapshot))?;
            *lock(&engine.watcher) = Some(watcher);
        } else {
            // No .loki directory means nothing to watch; the empty set is
            // already a supported state.
            tracing::debug!(dir = %dir.display(), "no policy directory, hot reload disabled");
        }
        Ok(engine)
    }

    /// Evaluate the policies for an enforcement point against a context.
    ///
    /// Unknown points and empty categories return Allow. Entries are
    /// applied in declaration order; the first non-Allow wins, so a Deny
    /// beats a RequireApproval only by being declared first.
    pub fn evaluate(&self, point: &str, ctx: &Value) -> DecisionRecord {
        let set = self.current();
        match EnforcementPoint::parse(point) {
            Some(EnforcementPoint::PreExecution) => evaluate_execution(&set, ctx),
            Some(EnforcementPoint::PreDeployment) => evaluate_deployment(&set, ctx),
            Some(EnforcementPoint::Resource) => evaluate_resource(&set, ctx),
            Some(EnforcementPoint::Data) => evaluate_data(&set, ctx),
            None => DecisionRecord::allow(),
        }
    }

    /// True iff at least one category holds at least one valid entry.
    pub fn has_policies(&self) -> bool {
        self.current().has_policies()
    }

    /// Errors and warnings collected by the last load, formatted for
    /// operator display. The host refuses to start on severity=error.
    pub fn get_validation_errors(&self) -> Vec<String> {
        self.current()
            .issues
            .iter()
            .map(|issue| issue.to_string())
            .collect()
    }

    /// The `approval_gates` configuration — consumed by the gate manager,
    /// never evaluated here.
    pub fn get_approval_gates(&self) -> Vec<GateConfig> {
        self.current().approval_gates.clone()
    }

    /// The `resource` entries — used by the host to pre-configure budgets.
    pub fn get_resource_policies(&self) -> Vec<ResourcePolicy> {
        self.current().resource.clone()
    }

    /// Force a synchronous reload from disk, swapping in a new snapshot.
    pub fn reload(&self) {
        let fresh = Arc::new(loader::load(&self.project_dir));
        *write_lock(&self.snapshot) = fresh;
    }

    /// Tear down the file observer. Idempotent; also runs on drop.
    pub fn destroy(&self) {
        lock(&self.watcher).take();
    }

    /// One Arc clone per evaluation — readers never hold the lock while
    /// evaluating, and the reloader never mutates a published snapshot.
    fn current(&self) -> Arc<PolicySet> {
        Arc::clone(&read_lock(&self.snapshot))
    }
}

impl Drop for PolicyEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn evaluate_execution(set: &PolicySet, ctx: &Value) -> DecisionRecord {
    for entry in &set.execution {
        match entry.compiled.evaluate(ctx) {
            RuleOutcome::Satisfied | RuleOutcome::Unrecognized => continue,
            RuleOutcome::Violated(detail) => {
                return triggered(
                    &entry.name,
                    "pre_execution",
                    detail,
                    entry.action.decision(),
                    Vec::new(),
                );
            }
        }
    }
    DecisionRecord::allow()
}

fn evaluate_deployment(set: &PolicySet, ctx: &Value) -> DecisionRecord {
    let passed: HashSet<&str> = ctx
        .get("passed_gates")
        .and_then(Value::as_array)
        .map(|gates| gates.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for entry in &set.deployment {
        let missing: Vec<&str> = entry
            .gates
            .iter()
            .map(String::as_str)
            .filter(|gate| !passed.contains(gate))
            .collect();
        if !missing.is_empty() {
            return triggered(
                &entry.name,
                "pre_deployment",
                format!("missing required gates: {}", missing.join(", ")),
                Decision::Deny,
                Vec::new(),
            );
        }
    }
    DecisionRecord::allow()
}

fn evaluate_resource(set: &PolicySet, ctx: &Value) -> DecisionRecord {
    // Alert-only violations are recorded but do not stop iteration, so a
    // later entry can still deny or escalate.
    let mut violations = Vec::new();

    for entry in &set.resource {
        // Budget sub-form.
        if let Some(max_tokens) = entry.max_tokens {
            let consumed = ctx
                .get("tokens_consumed")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if consumed > max_tokens {
                let detail = format!("consumed {} tokens, budget is {}", consumed, max_tokens);
                let decision = match entry.on_exceed {
                    Some(ExceedAction::RequireApproval) => Decision::RequireApproval,
                    Some(ExceedAction::Shutdown) => Decision::Deny,
                    Some(ExceedAction::Alert) => {
                        violations.push(PolicyViolation {
                            entry_name: entry.name.clone(),
                            category: "resource".to_string(),
                            details: detail,
                        });
                        continue;
                    }
                    None => entry
                        .action
                        .map(|action| action.decision())
                        .unwrap_or(Decision::Deny),
                };
                return triggered(&entry.name, "resource", detail, decision, violations);
            }
        }

        // Provider allow-list sub-form.
        if let Some(providers) = &entry.providers {
            let detail = match ctx.get("provider").and_then(Value::as_str) {
                Some(provider) if providers.iter().any(|p| p == provider) => None,
                Some(provider) => Some(format!("provider '{}' is not allow-listed", provider)),
                None => Some("context missing provider".to_string()),
            };
            if let Some(detail) = detail {
                let decision = entry
                    .action
                    .map(|action| action.decision())
                    .unwrap_or(Decision::Deny);
                return triggered(&entry.name, "resource", detail, decision, violations);
            }
        }
    }

    DecisionRecord {
        allowed: true,
        decision: Decision::Allow,
        reason: None,
        violations,
    }
}

fn evaluate_data(set: &PolicySet, ctx: &Value) -> DecisionRecord {
    let content = ctx.get("content").and_then(Value::as_str).unwrap_or("");
    for entry in &set.data {
        let findings = scanner::scan(content, entry.kind, &entry.compiled_patterns);
        if let Some(first) = findings.first() {
            let detail = format!(
                "{} detected {} finding(s), first: {}",
                entry.kind.as_str(),
                findings.len(),
                first.pattern_id
            );
            let decision = entry
                .action
                .map(|action| action.decision())
                .unwrap_or(Decision::Deny);
            return triggered(&entry.name, "data", detail, decision, Vec::new());
        }
    }
    DecisionRecord::allow()
}

/// Build the short-circuit decision record for a triggered entry.
fn triggered(
    entry_name: &str,
    category: &str,
    details: String,
    decision: Decision,
    mut violations: Vec<PolicyViolation>,
) -> DecisionRecord {
    let reason = format!("{}: {}", entry_name, details);
    violations.push(PolicyViolation {
        entry_name: entry_name.to_string(),
        category: category.to_string(),
        details,
    });
    DecisionRecord {
        allowed: false,
        decision,
        reason: Some(reason),
        violations,
    }
}

// Lock helpers: a poisoned lock only means another thread panicked while
// holding it; the snapshot Arc inside is still valid, so recover it rather
// than propagating the panic out of `evaluate`.
fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<'a, T>(rwlock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    rwlock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<'a, T>(rwlock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    rwlock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
