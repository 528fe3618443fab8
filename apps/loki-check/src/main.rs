//! # loki-check
//!
//! Policy check wrapper for the Loki agent runtime.
//!
//! The runtime shells out to this binary at each enforcement point and
//! reads the decision from the exit code:
//!
//! - `0` — ALLOW (also for unknown enforcement points)
//! - `1` — DENY (and argument/context errors)
//! - `2` — REQUIRE_APPROVAL
//!
//! The full decision record is emitted as JSON on stdout in all cases;
//! diagnostics go to stderr so stdout stays machine-readable.
//!
//! ## Usage
//!
//! ```text
//! loki-check pre_execution '{"file_path": "/etc/passwd", "project_dir": "/home/project"}'
//! ```
//!
//! `LOKI_PROJECT_DIR` overrides the project root (defaults to the current
//! directory).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use loki_policy::{Decision, PolicyEngine};

/// Evaluate Loki policies at an enforcement point.
#[derive(Parser)]
#[command(name = "loki-check", version, about)]
struct Cli {
    /// Enforcement point tag (pre_execution, pre_deployment, resource, data).
    enforcement_point: String,

    /// Evaluation context as a JSON object.
    context_json: String,
}

fn main() -> ExitCode {
    // Logs go to stderr so they don't interfere with the JSON on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            // Missing or extra arguments: usage on stderr, exit 1.
            eprint!("{}", err);
            return ExitCode::from(1);
        }
        Err(err) => {
            // --help / --version are not failures.
            print!("{}", err);
            return ExitCode::SUCCESS;
        }
    };

    let ctx = match parse_context(&cli.context_json) {
        Ok(ctx) => ctx,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(1);
        }
    };

    let project_dir = std::env::var_os("LOKI_PROJECT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let engine = PolicyEngine::new(&project_dir);
    for issue in engine.get_validation_errors() {
        tracing::warn!("{}", issue);
    }

    let record = engine.evaluate(&cli.enforcement_point, &ctx);
    match serde_json::to_string(&record) {
        Ok(json) => println!("{}", json),
        Err(err) => eprintln!("failed to serialize decision record: {}", err),
    }

    ExitCode::from(exit_code(record.decision))
}

/// Parse the context argument. It must be a JSON object — scalars and
/// arrays are as much a caller bug as unparseable text.
fn parse_context(raw: &str) -> Result<serde_json::Value, String> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err("context must be a JSON object".to_string()),
        Err(err) => Err(format!("failed to parse context JSON: {}", err)),
    }
}

/// The exit-code contract with the surrounding runtime.
fn exit_code(decision: Decision) -> u8 {
    match decision {
        Decision::Allow => 0,
        Decision::Deny => 1,
        Decision::RequireApproval => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_must_be_an_object() {
        assert!(parse_context(r#"{"active_agents": 3}"#).is_ok());
        assert!(parse_context("{}").is_ok());
        assert!(parse_context("[1, 2]").is_err());
        assert!(parse_context("42").is_err());
        assert!(parse_context("not json").is_err());
    }

    #[test]
    fn exit_codes_follow_the_contract() {
        assert_eq!(exit_code(Decision::Allow), 0);
        assert_eq!(exit_code(Decision::Deny), 1);
        assert_eq!(exit_code(Decision::RequireApproval), 2);
    }
}
