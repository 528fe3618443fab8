// request.rs — Approval request records and outcomes.
//
// An ApprovalRequest is the durable record of one REQUIRE_APPROVAL
// decision waiting on a human (or external resolver). The id doubles as
// the resolution capability: whoever knows it can resolve the request, so
// it comes from a CSPRNG with at least 128 bits of entropy. Counters,
// timestamps, and weak RNGs are not acceptable here.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "ALLOW")]
    Allow,
    #[serde(rename = "DENY")]
    Deny,
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

/// One approval request, pending or resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub phase: String,
    pub gate_name: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
    pub reason: Option<String>,
}

impl ApprovalRequest {
    pub fn new(phase: &str, gate_name: &str, context: Value) -> Self {
        Self {
            id: new_request_id(),
            phase: phase.to_string(),
            gate_name: gate_name.to_string(),
            context,
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
            reason: None,
        }
    }
}

/// How the outcome was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMethod {
    /// No gate was configured for the phase.
    Auto,
    /// A resolver called `resolve_approval`.
    Manual,
    /// The gate's timer expired (or the manager shut down).
    Timeout,
}

/// What a caller awaiting an approval receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub approved: bool,
    pub method: ApprovalMethod,
    pub reason: Option<String>,
}

impl ApprovalOutcome {
    pub fn auto() -> Self {
        Self {
            approved: true,
            method: ApprovalMethod::Auto,
            reason: None,
        }
    }

    pub fn manual(approved: bool, reason: Option<String>) -> Self {
        Self {
            approved,
            method: ApprovalMethod::Manual,
            reason,
        }
    }

    pub fn timeout(approved: bool) -> Self {
        Self {
            approved,
            method: ApprovalMethod::Timeout,
            reason: None,
        }
    }

    /// The fail-closed outcome delivered when the manager shuts down with
    /// requests still pending.
    pub fn shutdown() -> Self {
        Self {
            approved: false,
            method: ApprovalMethod::Timeout,
            reason: Some("shutdown".to_string()),
        }
    }
}

/// Generate a request id: `apr-` + 128 bits of CSPRNG output in hex.
///
/// `rand::thread_rng` is a cryptographically secure generator, which is
/// load-bearing: ids are handed to external resolvers, and a guessable id
/// would allow unauthorized resolution.
pub fn new_request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut id = String::with_capacity(4 + bytes.len() * 2);
    id.push_str("apr-");
    for byte in bytes {
        let _ = write!(id, "{:02x}", byte);
    }
    id
}
