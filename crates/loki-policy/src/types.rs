// types.rs — Core policy data model.
//
// Decisions, enforcement points, per-category policy entries, and the
// immutable PolicySet snapshot the engine evaluates against. Entries are
// deserialized from the policy file only after their category validator
// has accepted them, so a PolicySet never contains a malformed entry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rules::CompiledRule;
use crate::scanner::ScanKind;

/// The outcome of a policy evaluation.
///
/// `Allow` is the default in the absence of any triggering entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "ALLOW")]
    Allow,
    #[serde(rename = "DENY")]
    Deny,
    #[serde(rename = "REQUIRE_APPROVAL")]
    RequireApproval,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "ALLOW"),
            Decision::Deny => write!(f, "DENY"),
            Decision::RequireApproval => write!(f, "REQUIRE_APPROVAL"),
        }
    }
}

/// Where in the host's execution a decision is being requested.
///
/// Unknown tags are not an error — the engine returns Allow for them, so
/// hosts can introduce new enforcement points before policies exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementPoint {
    PreExecution,
    PreDeployment,
    Resource,
    Data,
}

impl EnforcementPoint {
    /// Parse an enforcement-point tag. Returns `None` for unrecognized tags.
    ///
    /// `approval_gates` is deliberately absent: it is a configuration
    /// category, never an enforcement point.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "pre_execution" => Some(Self::PreExecution),
            "pre_deployment" => Some(Self::PreDeployment),
            "resource" => Some(Self::Resource),
            "data" => Some(Self::Data),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreExecution => "pre_execution",
            Self::PreDeployment => "pre_deployment",
            Self::Resource => "resource",
            Self::Data => "data",
        }
    }
}

/// What happens when a policy entry's check fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Deny,
    RequireApproval,
}

impl PolicyAction {
    pub fn decision(&self) -> Decision {
        match self {
            PolicyAction::Deny => Decision::Deny,
            PolicyAction::RequireApproval => Decision::RequireApproval,
        }
    }
}

/// What happens when a resource budget is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceedAction {
    Shutdown,
    Alert,
    RequireApproval,
}

/// A `pre_execution` entry: a rule string evaluated against the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub name: String,
    pub rule: String,
    pub action: PolicyAction,
    /// Compiled form of `rule`, filled in by the loader.
    #[serde(skip)]
    pub compiled: CompiledRule,
}

/// A `pre_deployment` entry: the context's `passed_gates` must cover `gates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPolicy {
    pub name: String,
    pub gates: Vec<String>,
}

/// A `resource` entry. Two sub-forms share the struct: a token budget
/// (`max_tokens` + `on_exceed`) and a provider allow-list (`providers`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePolicy {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Budget-consumed percentages at which the host should raise alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerts: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exceed: Option<ExceedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<PolicyAction>,
}

/// A `data` entry: the content scanner inspects `ctx.content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPolicy {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScanKind,
    /// Extra operator-supplied patterns, on top of the built-in set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<PolicyAction>,
    /// Compiled forms of `patterns`, filled in by the loader.
    #[serde(skip)]
    pub compiled_patterns: Vec<regex::Regex>,
}

fn default_timeout_minutes() -> f64 {
    30.0
}

/// An `approval_gates` entry — configuration for the gate manager, never
/// evaluated by `evaluate()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub name: String,
    pub phase: String,
    /// Minutes before a pending approval times out. Fractional values are
    /// legal; zero means immediate expiry.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: f64,
    /// Fail-closed by default: silence means denial unless the operator
    /// explicitly opts in to auto-approval.
    #[serde(default)]
    pub auto_approve_on_timeout: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
}

/// How serious a validation finding is.
///
/// Hosts are expected to refuse to start when any `Error` issue is present;
/// `Warning` issues are advisory (e.g. unrecognized rule text).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation finding from the loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: String,
    pub index: usize,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(category: &str, index: usize, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category: category.to_string(),
            index,
            message: message.into(),
        }
    }

    pub fn warning(category: &str, index: usize, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            category: category.to_string(),
            index,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {}[{}]: {}",
            self.severity, self.category, self.index, self.message
        )
    }
}

/// An immutable snapshot of every validated policy entry, in declaration
/// order, plus the validation issues collected while loading.
///
/// The engine publishes snapshots behind an atomic pointer swap; a snapshot
/// is never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    pub execution: Vec<ExecutionPolicy>,
    pub deployment: Vec<DeploymentPolicy>,
    pub resource: Vec<ResourcePolicy>,
    pub data: Vec<DataPolicy>,
    pub approval_gates: Vec<GateConfig>,
    pub issues: Vec<ValidationIssue>,
}

impl PolicySet {
    /// True iff at least one category holds at least one valid entry.
    pub fn has_policies(&self) -> bool {
        !self.execution.is_empty()
            || !self.deployment.is_empty()
            || !self.resource.is_empty()
            || !self.data.is_empty()
            || !self.approval_gates.is_empty()
    }
}

/// One entry's check failing, as reported on the decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub entry_name: String,
    pub category: String,
    pub details: String,
}

/// The result of `PolicyEngine::evaluate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub allowed: bool,
    pub decision: Decision,
    pub reason: Option<String>,
    pub violations: Vec<PolicyViolation>,
}

impl DecisionRecord {
    /// The default record: nothing triggered, action may proceed.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            decision: Decision::Allow,
            reason: None,
            violations: Vec::new(),
        }
    }
}
