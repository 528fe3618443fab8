// validate.rs — Per-category schema validators.
//
// Each validator takes a candidate entry (raw JSON, before typed decode)
// and returns the list of problems found. An empty list means the entry is
// valid. Validators are pure and stateless; the loader is responsible for
// dropping invalid entries and recording the errors.

use serde_json::Value;

const ACTIONS: &[&str] = &["deny", "require_approval"];
const ON_EXCEED: &[&str] = &["shutdown", "alert", "require_approval"];
const DATA_TYPES: &[&str] = &["secret_detection", "pii_scanning"];

/// Validate a `pre_execution` entry.
pub fn validate_execution(entry: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    require_object(entry, &mut errors);
    require_string(entry, "name", &mut errors);
    require_string(entry, "rule", &mut errors);
    require_enum(entry, "action", ACTIONS, true, &mut errors);
    errors
}

/// Validate a `pre_deployment` entry.
pub fn validate_deployment(entry: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    require_object(entry, &mut errors);
    require_string(entry, "name", &mut errors);
    require_string_list(entry, "gates", true, &mut errors);
    errors
}

/// Validate a `resource` entry.
pub fn validate_resource(entry: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    require_object(entry, &mut errors);
    require_string(entry, "name", &mut errors);

    match entry.get("max_tokens") {
        None | Some(Value::Null) => {}
        Some(v) => match v.as_i64() {
            Some(n) if n >= 0 => {}
            Some(_) => errors.push("max_tokens must be non-negative".to_string()),
            None => errors.push("max_tokens must be a non-negative integer".to_string()),
        },
    }

    match entry.get("alerts") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                match item.as_f64() {
                    Some(pct) if (0.0..=100.0).contains(&pct) => {}
                    Some(pct) => {
                        errors.push(format!("alerts[{}] is {} — must be within 0..100", i, pct))
                    }
                    None => errors.push(format!("alerts[{}] must be numeric", i)),
                }
            }
        }
        Some(_) => errors.push("alerts must be an array of numbers".to_string()),
    }

    require_enum(entry, "on_exceed", ON_EXCEED, false, &mut errors);
    require_enum(entry, "action", ACTIONS, false, &mut errors);

    if entry.get("providers").is_some_and(|v| !v.is_null()) {
        require_string_list(entry, "providers", true, &mut errors);
    }
    errors
}

/// Validate a `data` entry.
pub fn validate_data(entry: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    require_object(entry, &mut errors);
    require_string(entry, "name", &mut errors);
    require_enum(entry, "type", DATA_TYPES, true, &mut errors);
    if entry.get("patterns").is_some_and(|v| !v.is_null()) {
        require_string_list(entry, "patterns", false, &mut errors);
    }
    require_enum(entry, "action", ACTIONS, false, &mut errors);
    errors
}

/// Validate an `approval_gates` entry.
pub fn validate_gate(entry: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    require_object(entry, &mut errors);
    require_string(entry, "name", &mut errors);
    require_string(entry, "phase", &mut errors);

    match entry.get("timeout_minutes") {
        None | Some(Value::Null) => {}
        Some(v) => match v.as_f64() {
            Some(m) if m >= 0.0 => {}
            Some(_) => errors.push("timeout_minutes must be non-negative".to_string()),
            None => errors.push("timeout_minutes must be a number".to_string()),
        },
    }

    match entry.get("auto_approve_on_timeout") {
        None | Some(Value::Null) | Some(Value::Bool(_)) => {}
        Some(_) => errors.push("auto_approve_on_timeout must be a boolean".to_string()),
    }

    match entry.get("webhook") {
        None | Some(Value::Null) => {}
        Some(Value::String(url)) => {
            if !webhook_scheme_ok(url) {
                errors.push(format!("webhook URL '{}' must use http or https", url));
            }
        }
        Some(_) => errors.push("webhook must be a string".to_string()),
    }
    errors
}

/// Only http and https webhooks are accepted. Anything else — file://,
/// gopher://, or a string with no scheme at all — is rejected here, and the
/// gate manager re-checks the resolved address again at delivery time.
fn webhook_scheme_ok(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"))
                && !rest.is_empty()
        }
        None => false,
    }
}

fn require_object(entry: &Value, errors: &mut Vec<String>) {
    if !entry.is_object() {
        errors.push("entry must be a mapping".to_string());
    }
}

fn require_string(entry: &Value, field: &str, errors: &mut Vec<String>) {
    match entry.get(field) {
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(Value::String(_)) => errors.push(format!("{} must not be empty", field)),
        Some(_) => errors.push(format!("{} must be a string", field)),
        None => errors.push(format!("missing required field '{}'", field)),
    }
}

fn require_enum(
    entry: &Value,
    field: &str,
    allowed: &[&str],
    required: bool,
    errors: &mut Vec<String>,
) {
    match entry.get(field) {
        Some(Value::String(s)) if allowed.contains(&s.as_str()) => {}
        Some(Value::String(s)) => errors.push(format!(
            "{} must be one of {}, got '{}'",
            field,
            allowed.join("|"),
            s
        )),
        None | Some(Value::Null) if !required => {}
        None | Some(Value::Null) => errors.push(format!("missing required field '{}'", field)),
        Some(_) => errors.push(format!("{} must be a string", field)),
    }
}

fn require_string_list(entry: &Value, field: &str, non_empty: bool, errors: &mut Vec<String>) {
    match entry.get(field) {
        Some(Value::Array(items)) => {
            if non_empty && items.is_empty() {
                errors.push(format!("{} must not be empty", field));
            }
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    errors.push(format!("{}[{}] must be a string", field, i));
                }
            }
        }
        Some(_) => errors.push(format!("{} must be a list of strings", field)),
        None => errors.push(format!("missing required field '{}'", field)),
    }
}
