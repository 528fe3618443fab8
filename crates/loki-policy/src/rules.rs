// rules.rs — The closed rule grammar for pre_execution policies.
//
// Rule strings are compiled once at load time into a CompiledRule. The
// grammar is deliberately closed: only the forms below are recognized, and
// anything else compiles to Unknown. Unknown rules evaluate to Allow at
// runtime — the loader has already surfaced a warning for them, so a typo
// is visible to the operator instead of silently denying everything.
//
// The key invariant: rule evaluation never touches the filesystem or the
// network. The path-containment rule is a lexical check, which is exactly
// what makes it safe against `..` traversal and sibling-prefix attacks.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;

/// Integer comparison operators accepted by the `active_agents` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Le,
    Lt,
    Eq,
    Ge,
    Gt,
}

impl CompareOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "<=" => Some(Self::Le),
            "<" => Some(Self::Lt),
            "==" => Some(Self::Eq),
            ">=" => Some(Self::Ge),
            ">" => Some(Self::Gt),
            _ => None,
        }
    }

    fn holds(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Le => lhs <= rhs,
            Self::Lt => lhs < rhs,
            Self::Eq => lhs == rhs,
            Self::Ge => lhs >= rhs,
            Self::Gt => lhs > rhs,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Le => "<=",
            Self::Lt => "<",
            Self::Eq => "==",
            Self::Ge => ">=",
            Self::Gt => ">",
        }
    }
}

/// A rule string compiled into its evaluable form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CompiledRule {
    /// `file_path must start with project_dir`
    PathWithinProject,
    /// `active_agents <op> N` — N is parsed once here and cached.
    AgentCeiling { op: CompareOp, limit: i64 },
    /// Anything the closed grammar does not recognize.
    #[default]
    Unknown,
}

/// The result of evaluating one rule against a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule is satisfied — no violation.
    Satisfied,
    /// The rule is violated; the string is a human-readable detail.
    Violated(String),
    /// The rule text was not recognized at load time. Treated as Allow.
    Unrecognized,
}

impl CompiledRule {
    /// Compile a rule string. Never fails — unrecognized text becomes
    /// [`CompiledRule::Unknown`], which the loader reports as a warning.
    pub fn parse(rule: &str) -> Self {
        let rule = rule.trim();
        if rule == "file_path must start with project_dir" {
            return Self::PathWithinProject;
        }

        // "active_agents <op> N"
        let tokens: Vec<&str> = rule.split_whitespace().collect();
        if let ["active_agents", op, n] = tokens.as_slice() {
            if let (Some(op), Ok(limit)) = (CompareOp::parse(op), n.parse::<i64>()) {
                return Self::AgentCeiling { op, limit };
            }
        }

        Self::Unknown
    }

    /// Evaluate the compiled rule against a context object.
    ///
    /// Missing context fields fail the check (fail-safe): a sandbox rule
    /// with no `file_path` to inspect must not silently pass.
    pub fn evaluate(&self, ctx: &Value) -> RuleOutcome {
        match self {
            Self::PathWithinProject => {
                let file_path = ctx.get("file_path").and_then(Value::as_str);
                let project_dir = ctx.get("project_dir").and_then(Value::as_str);
                match (file_path, project_dir) {
                    (Some(file), Some(project)) => {
                        if path_within(file, project) {
                            RuleOutcome::Satisfied
                        } else {
                            RuleOutcome::Violated(format!(
                                "file path '{}' escapes project directory '{}'",
                                file, project
                            ))
                        }
                    }
                    _ => RuleOutcome::Violated(
                        "context missing file_path or project_dir".to_string(),
                    ),
                }
            }
            Self::AgentCeiling { op, limit } => {
                match ctx.get("active_agents").and_then(Value::as_i64) {
                    Some(count) if op.holds(count, *limit) => RuleOutcome::Satisfied,
                    Some(count) => RuleOutcome::Violated(format!(
                        "active_agents is {}, policy requires {} {}",
                        count,
                        op.symbol(),
                        limit
                    )),
                    None => RuleOutcome::Violated("context missing active_agents".to_string()),
                }
            }
            Self::Unknown => RuleOutcome::Unrecognized,
        }
    }
}

/// Lexically resolve `.` and `..` segments without touching the filesystem.
///
/// `..` above the root clamps at the root, so `/a/../../etc` normalizes to
/// `/etc` — the containment check then rejects it honestly instead of
/// letting the extra `..` wrap around.
fn normalize(path: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Never pop past the root or prefix.
                if matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// True iff `file` is the project directory itself or lexically inside it.
///
/// Comparison is component-wise, so `/home/project-evil` does not match a
/// project dir of `/home/project`.
fn path_within(file: &str, project: &str) -> bool {
    if file.is_empty() || project.is_empty() {
        return false;
    }
    let file = normalize(file);
    let project = normalize(project);
    file.starts_with(&project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_path_rule() {
        assert_eq!(
            CompiledRule::parse("file_path must start with project_dir"),
            CompiledRule::PathWithinProject
        );
    }

    #[test]
    fn parses_all_comparison_forms() {
        for (text, op) in [
            ("active_agents <= 5", CompareOp::Le),
            ("active_agents < 5", CompareOp::Lt),
            ("active_agents == 5", CompareOp::Eq),
            ("active_agents >= 5", CompareOp::Ge),
            ("active_agents > 5", CompareOp::Gt),
        ] {
            assert_eq!(
                CompiledRule::parse(text),
                CompiledRule::AgentCeiling { op, limit: 5 },
                "failed to parse '{}'",
                text
            );
        }
    }

    #[test]
    fn unrecognized_text_compiles_to_unknown() {
        assert_eq!(CompiledRule::parse("disk_usage <= 5"), CompiledRule::Unknown);
        assert_eq!(
            CompiledRule::parse("active_agents <= five"),
            CompiledRule::Unknown
        );
        assert_eq!(CompiledRule::parse("active_agents ~ 5"), CompiledRule::Unknown);
        assert_eq!(CompiledRule::parse(""), CompiledRule::Unknown);
    }

    #[test]
    fn path_inside_project_is_satisfied() {
        let rule = CompiledRule::PathWithinProject;
        let ctx = json!({"file_path": "/home/project/src/main.rs", "project_dir": "/home/project"});
        assert_eq!(rule.evaluate(&ctx), RuleOutcome::Satisfied);

        // The project dir itself counts as inside.
        let ctx = json!({"file_path": "/home/project", "project_dir": "/home/project"});
        assert_eq!(rule.evaluate(&ctx), RuleOutcome::Satisfied);
    }

    #[test]
    fn path_outside_project_is_violated() {
        let rule = CompiledRule::PathWithinProject;
        let ctx = json!({"file_path": "/etc/passwd", "project_dir": "/home/project"});
        assert!(matches!(rule.evaluate(&ctx), RuleOutcome::Violated(_)));
    }

    #[test]
    fn sibling_prefix_does_not_match() {
        let rule = CompiledRule::PathWithinProject;
        let ctx = json!({"file_path": "/home/project-evil/x", "project_dir": "/home/project"});
        assert!(matches!(rule.evaluate(&ctx), RuleOutcome::Violated(_)));
    }

    #[test]
    fn dotdot_traversal_is_violated() {
        let rule = CompiledRule::PathWithinProject;
        let ctx = json!({
            "file_path": "/home/project/../etc/passwd",
            "project_dir": "/home/project"
        });
        assert!(matches!(rule.evaluate(&ctx), RuleOutcome::Violated(_)));

        // Traversal past the root clamps instead of wrapping around.
        let ctx = json!({
            "file_path": "/home/project/../../../etc/passwd",
            "project_dir": "/home/project"
        });
        assert!(matches!(rule.evaluate(&ctx), RuleOutcome::Violated(_)));
    }

    #[test]
    fn dotdot_that_stays_inside_is_satisfied() {
        let rule = CompiledRule::PathWithinProject;
        let ctx = json!({
            "file_path": "/home/project/src/../Cargo.toml",
            "project_dir": "/home/project"
        });
        assert_eq!(rule.evaluate(&ctx), RuleOutcome::Satisfied);
    }

    #[test]
    fn missing_path_operands_are_violations() {
        let rule = CompiledRule::PathWithinProject;
        assert!(matches!(
            rule.evaluate(&json!({"project_dir": "/home/project"})),
            RuleOutcome::Violated(_)
        ));
        assert!(matches!(
            rule.evaluate(&json!({"file_path": "/home/project/x"})),
            RuleOutcome::Violated(_)
        ));
        assert!(matches!(rule.evaluate(&json!({})), RuleOutcome::Violated(_)));
    }

    #[test]
    fn agent_ceiling_comparisons() {
        let rule = CompiledRule::parse("active_agents <= 5");
        assert_eq!(rule.evaluate(&json!({"active_agents": 3})), RuleOutcome::Satisfied);
        assert_eq!(rule.evaluate(&json!({"active_agents": 5})), RuleOutcome::Satisfied);
        assert!(matches!(
            rule.evaluate(&json!({"active_agents": 10})),
            RuleOutcome::Violated(_)
        ));
    }

    #[test]
    fn missing_active_agents_is_violation() {
        let rule = CompiledRule::parse("active_agents <= 5");
        assert!(matches!(rule.evaluate(&json!({})), RuleOutcome::Violated(_)));
    }

    #[test]
    fn unknown_rule_is_unrecognized_at_runtime() {
        let rule = CompiledRule::parse("memory_usage <= 100");
        assert_eq!(rule.evaluate(&json!({})), RuleOutcome::Unrecognized);
    }

    #[test]
    fn violation_detail_names_the_numbers() {
        let rule = CompiledRule::parse("active_agents <= 5");
        match rule.evaluate(&json!({"active_agents": 10})) {
            RuleOutcome::Violated(detail) => {
                assert!(detail.contains("10"));
                assert!(detail.contains("<= 5"));
            }
            other => panic!("expected Violated, got {:?}", other),
        }
    }
}
