//! # loki-approval
//!
//! Approval gates for the Loki policy engine.
//!
//! When [`loki_policy::PolicyEngine`] returns REQUIRE_APPROVAL at a phase
//! with a configured gate, the caller acquires a [`PendingApproval`] ticket
//! from the [`ApprovalGateManager`] and suspends until a human resolves it
//! or the gate times out. Timeouts are fail-closed: absent an explicit
//! operator opt-in, silence means denial. State is persisted atomically to
//! `<project>/.loki/state/approvals.json`, and outbound webhooks pass an
//! SSRF guard before any network traffic leaves the process.

pub mod error;
pub mod manager;
pub mod request;
pub mod store;
pub mod webhook;

pub use error::ApprovalError;
pub use manager::{ApprovalGateManager, PendingApproval};
pub use request::{ApprovalMethod, ApprovalOutcome, ApprovalRequest, Resolution};
pub use store::{ApprovalState, ApprovalStateStore};
