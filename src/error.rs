//! Fatal error kinds for a harness invocation.
//!
//! Scenario failures are never represented here: they are recorded in the
//! bundle and the run continues. Everything in this enum aborts the run before
//! (or instead of) the remaining scenarios.
use std::path::PathBuf;
use thiserror::Error;

const NODE_TROUBLESHOOTING: &[&str] = &[
    "troubleshooting:",
    "- start/restart VeilVM node: docker compose -f docker-compose.local.yml up -d --build node",
    "- ensure shielded verifier gate is active: VEIL_ZK_REQUIRED_CIRCUIT_ID=shielded-ledger-v1",
    "- verify readiness endpoint: http://127.0.0.1:9660/ext/health/readiness",
    "- if docker commands hang, restart Docker Desktop and retry",
];

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Bad flag or environment value; raised before any network activity.
    #[error("{0}")]
    Configuration(String),

    #[error("{}", node_unreachable_message(.candidates, .last_error))]
    NodeUnreachable {
        candidates: Vec<String>,
        last_error: String,
    },

    #[error("no VEIL VM chains found on {node_url}")]
    ChainNotFound { node_url: String },

    #[error("shielded proving key not found: {}", .0.display())]
    ProvingKeyMissing(PathBuf),

    #[error("docker daemon not reachable; start Docker Desktop and retry\n{detail}")]
    ContainerRuntime { detail: String },

    #[error("{0}")]
    Image(String),

    #[error("{0}")]
    Provisioning(String),

    /// Key generation or prefunding failed; later scenarios would run with an
    /// inconsistent key set.
    #[error("{0}")]
    Setup(String),
}

impl HarnessError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup(message.into())
    }
}

fn node_unreachable_message(candidates: &[String], last_error: &str) -> String {
    let mut lines = vec![
        format!(
            "node did not become healthy after trying: {}",
            candidates.join(", ")
        ),
        format!("last error: {last_error}"),
    ];
    lines.extend(NODE_TROUBLESHOOTING.iter().map(|line| line.to_string()));
    lines.join("\n")
}
