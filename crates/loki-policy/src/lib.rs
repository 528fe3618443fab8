//! # loki-policy
//!
//! Declarative policy engine for the Loki agent runtime.
//!
//! At each enforcement point (`pre_execution`, `pre_deployment`, `resource`,
//! `data`) the host calls [`PolicyEngine::evaluate`] with a context object
//! and gets back Allow, Deny, or RequireApproval. Policies are declared in
//! `<project>/.loki/policies.json` (or `.yaml`), validated at load, and
//! hot-reloaded when the file changes. The rule grammar is closed — a fixed
//! set of evaluators, no scripting — so a policy file can never be turned
//! into an execution vector.

pub mod engine;
pub mod error;
pub mod loader;
pub mod rules;
pub mod scanner;
pub mod types;
mod validate;
mod watch;

pub use engine::PolicyEngine;
pub use error::PolicyError;
pub use scanner::{Finding, ScanKind};
pub use types::{
    DataPolicy, Decision, DecisionRecord, DeploymentPolicy, EnforcementPoint, ExceedAction,
    ExecutionPolicy, GateConfig, PolicyAction, PolicySet, PolicyViolation, ResourcePolicy,
    Severity, ValidationIssue,
};
