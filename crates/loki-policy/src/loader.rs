// loader.rs — Reads and validates the policy file.
//
// The policy file lives at `<project>/.loki/policies.<ext>`. Two surface
// formats are probed in order: the curly-brace structured form
// (policies.json), then the YAML form (policies.yaml / policies.yml).
// The first file that exists wins.
//
// Loading never fails: a missing file is a supported state (empty set,
// universal Allow), and every other problem — unparseable document, invalid
// entry, unrecognized rule text — is captured as a ValidationIssue on the
// returned snapshot. Invalid entries are dropped; valid ones stay live.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::rules::CompiledRule;
use crate::types::{
    DataPolicy, DeploymentPolicy, ExecutionPolicy, GateConfig, PolicySet, ResourcePolicy,
    ValidationIssue,
};
use crate::validate;

/// Directory under the project root that holds policy and state files.
pub const POLICY_DIR: &str = ".loki";

/// Known policy file names, in probe order.
const POLICY_FILES: &[&str] = &["policies.json", "policies.yaml", "policies.yml"];

/// The policy schema version this loader understands.
const KNOWN_VERSION: i64 = 1;

/// Locate the policy file for a project, honoring probe order.
pub fn policy_file_path(project_dir: &Path) -> Option<PathBuf> {
    POLICY_FILES
        .iter()
        .map(|name| project_dir.join(POLICY_DIR).join(name))
        .find(|path| path.is_file())
}

/// True iff the given path refers to one of the recognized policy files.
/// Used by the watcher to filter directory events.
pub fn is_policy_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| POLICY_FILES.contains(&name))
}

/// Load and validate the project's policies into an immutable snapshot.
pub fn load(project_dir: &Path) -> PolicySet {
    let Some(path) = policy_file_path(project_dir) else {
        // Operators opting out of policies get an empty set, not an error.
        return PolicySet::default();
    };

    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) => {
            let mut set = PolicySet::default();
            set.issues.push(ValidationIssue::error(
                "policies",
                0,
                format!("failed to read {}: {}", path.display(), err),
            ));
            return set;
        }
    };

    let doc = match parse_document(&path, &text) {
        Ok(doc) => doc,
        Err(message) => {
            let mut set = PolicySet::default();
            set.issues.push(ValidationIssue::error("policies", 0, message));
            return set;
        }
    };

    build_set(&doc)
}

/// Parse the document text by file extension: JSON for `.json`, YAML
/// otherwise. Both produce the same in-memory tree.
fn parse_document(path: &Path, text: &str) -> Result<Value, String> {
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(text)
            .map_err(|err| format!("failed to parse {}: {}", path.display(), err))
    } else {
        serde_yaml::from_str(text)
            .map_err(|err| format!("failed to parse {}: {}", path.display(), err))
    }
}

/// Walk the parsed document, validate every entry, and assemble the set.
fn build_set(doc: &Value) -> PolicySet {
    let mut set = PolicySet::default();

    let Some(root) = doc.as_object() else {
        set.issues.push(ValidationIssue::error(
            "policies",
            0,
            "policy document must be a mapping",
        ));
        return set;
    };

    // `version` is informational; unknown values are accepted with a warning.
    match root.get("version") {
        None => {}
        Some(v) => match v.as_i64() {
            Some(KNOWN_VERSION) => {}
            Some(other) => set.issues.push(ValidationIssue::warning(
                "policies",
                0,
                format!("unknown policy schema version {}", other),
            )),
            None => set.issues.push(ValidationIssue::warning(
                "policies",
                0,
                "version must be an integer".to_string(),
            )),
        },
    }

    let Some(categories) = root.get("policies").and_then(Value::as_object) else {
        set.issues.push(ValidationIssue::warning(
            "policies",
            0,
            "document has no 'policies' mapping",
        ));
        return set;
    };

    for (category, entries) in categories {
        let Some(entries) = entries.as_array() else {
            set.issues.push(ValidationIssue::error(
                category,
                0,
                format!("category '{}' must be a list of entries", category),
            ));
            continue;
        };

        match category.as_str() {
            "pre_execution" => load_execution(entries, &mut set),
            "pre_deployment" => load_deployment(entries, &mut set),
            "resource" => load_resource(entries, &mut set),
            "data" => load_data(entries, &mut set),
            "approval_gates" => load_gates(entries, &mut set),
            other => set.issues.push(ValidationIssue::warning(
                other,
                0,
                format!("unknown policy category '{}'", other),
            )),
        }
    }

    set
}

fn load_execution(entries: &[Value], set: &mut PolicySet) {
    for (index, entry) in entries.iter().enumerate() {
        if record_errors("pre_execution", index, validate::validate_execution(entry), set) {
            continue;
        }
        let Some(mut policy) = decode::<ExecutionPolicy>("pre_execution", index, entry, set)
        else {
            continue;
        };
        policy.compiled = CompiledRule::parse(&policy.rule);
        if policy.compiled == CompiledRule::Unknown {
            // The engine treats unknown rules as Allow; make sure the
            // operator can see the typo instead of a silently dead policy.
            set.issues.push(ValidationIssue::warning(
                "pre_execution",
                index,
                format!("entry '{}': unrecognized rule '{}'", policy.name, policy.rule),
            ));
        }
        set.execution.push(policy);
    }
}

fn load_deployment(entries: &[Value], set: &mut PolicySet) {
    for (index, entry) in entries.iter().enumerate() {
        if record_errors("pre_deployment", index, validate::validate_deployment(entry), set) {
            continue;
        }
        if let Some(policy) = decode::<DeploymentPolicy>("pre_deployment", index, entry, set) {
            set.deployment.push(policy);
        }
    }
}

fn load_resource(entries: &[Value], set: &mut PolicySet) {
    for (index, entry) in entries.iter().enumerate() {
        if record_errors("resource", index, validate::validate_resource(entry), set) {
            continue;
        }
        if let Some(policy) = decode::<ResourcePolicy>("resource", index, entry, set) {
            set.resource.push(policy);
        }
    }
}

fn load_data(entries: &[Value], set: &mut PolicySet) {
    for (index, entry) in entries.iter().enumerate() {
        if record_errors("data", index, validate::validate_data(entry), set) {
            continue;
        }
        let Some(mut policy) = decode::<DataPolicy>("data", index, entry, set) else {
            continue;
        };
        for pattern in policy.patterns.as_deref().unwrap_or_default() {
            match regex::Regex::new(pattern) {
                Ok(compiled) => policy.compiled_patterns.push(compiled),
                Err(err) => set.issues.push(ValidationIssue::warning(
                    "data",
                    index,
                    format!("entry '{}': invalid pattern '{}': {}", policy.name, pattern, err),
                )),
            }
        }
        set.data.push(policy);
    }
}

fn load_gates(entries: &[Value], set: &mut PolicySet) {
    for (index, entry) in entries.iter().enumerate() {
        if record_errors("approval_gates", index, validate::validate_gate(entry), set) {
            continue;
        }
        if let Some(gate) = decode::<GateConfig>("approval_gates", index, entry, set) {
            set.approval_gates.push(gate);
        }
    }
}

/// Record validation errors for an entry. Returns true if the entry must
/// be dropped.
fn record_errors(
    category: &str,
    index: usize,
    errors: Vec<String>,
    set: &mut PolicySet,
) -> bool {
    let invalid = !errors.is_empty();
    for message in errors {
        set.issues.push(ValidationIssue::error(category, index, message));
    }
    invalid
}

/// Typed decode of a validated entry. Validation should make this
/// infallible; a failure here is still captured rather than propagated.
fn decode<T: serde::de::DeserializeOwned>(
    category: &str,
    index: usize,
    entry: &Value,
    set: &mut PolicySet,
) -> Option<T> {
    match serde_json::from_value(entry.clone()) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            set.issues.push(ValidationIssue::error(
                category,
                index,
                format!("failed to decode entry: {}", err),
            ));
            None
        }
    }
}
