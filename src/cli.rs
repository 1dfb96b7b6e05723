//! CLI argument parsing for the evidence runner.
//!
//! Every value is optional here: defaults and environment fallbacks are applied
//! in `config::RunConfiguration::resolve`, so flag > env > default precedence
//! lives in one place. Numeric flags are range-checked by clap; their
//! environment fallbacks are validated during resolution.
use clap::Parser;
use std::path::PathBuf;

const ENV_HELP: &str = "Environment fallbacks:\n  NODE_URL, CHAIN_ID, GROTH16_PK_PATH, PRIVATE_KEY, VEIL_EVIDENCE_OUT_DIR\n  VEIL_EVIDENCE_BATCH_SIZE, VEIL_EVIDENCE_WINDOWS_PER_SIZE, VEIL_EVIDENCE_TIMEOUT_MINUTES\n  VEIL_EVIDENCE_TIMEOUT_BATCHES\n  VEIL_EVIDENCE_BACKUP_PRIVATE_KEY, VEIL_EVIDENCE_FAUCET_PRIVATE_KEY\n  VEIL_EVIDENCE_PROOF_CONFIG_PRIVATE_KEY\n  VEIL_EVIDENCE_PREFUND_AMOUNT, VEIL_EVIDENCE_SKIP_PREFUND_BACKUP\n  VEIL_EVIDENCE_RUNNER, VEIL_EVIDENCE_DOCKER_IMAGE, VEIL_EVIDENCE_DOCKERFILE\n  VEIL_EVIDENCE_SKIP_IMAGE_BUILD, VEIL_EVIDENCE_SKIP_ZKBENCH_PREBUILD, VEIL_EVIDENCE_BENCH_BINARY\n  VEIL_EVIDENCE_PROJECT_ROOT, VEIL_EVIDENCE_WORKSPACE_ROOT, VEIL_EVIDENCE_VM_IDS\n  VEIL_EVIDENCE_PREFLIGHT_ONLY, VEIL_EVIDENCE_SKIP_MALFORMED, VEIL_EVIDENCE_SKIP_BACKUP_TAKEOVER\n  VEIL_EVIDENCE_SKIP_TIMEOUT, VEIL_EVIDENCE_SKIP_NEGATIVE\n\nBoolean environment values accept 1/true/yes/on (case-insensitive).";

/// VEIL launch-gate evidence bundle runner.
#[derive(Parser, Debug, Default)]
#[command(
    name = "launch-gate-evidence",
    version,
    about = "VEIL launch-gate evidence bundle runner",
    after_help = ENV_HELP
)]
pub struct EvidenceArgs {
    /// AvalancheGo base URL (default: http://127.0.0.1:9660)
    #[arg(long, value_name = "URL")]
    pub node_url: Option<String>,

    /// VEIL chain ID (auto-discovered if omitted)
    #[arg(long, value_name = "CHAIN_ID")]
    pub chain_id: Option<String>,

    /// Groth16 shielded proving key path
    #[arg(long, value_name = "PATH")]
    pub pk_path: Option<PathBuf>,

    /// Evidence bundle output root
    #[arg(long, value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    /// Shielded smoke batch size (default: 8)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: Option<u64>,

    /// Windows per size for smoke/negative (default: 1)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub windows_per_size: Option<u64>,

    /// zkbench timeout minutes (default: 20)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_minutes: Option<u64>,

    /// Timeout drill attempts, comma list (default: 8,32)
    #[arg(long, value_name = "LIST")]
    pub timeout_batches: Option<String>,

    /// Bench signer private key override
    #[arg(long, value_name = "HEX")]
    pub private_key: Option<String>,

    /// Optional faucet key to top up run wallets before checks
    #[arg(long, value_name = "HEX")]
    pub faucet_private_key: Option<String>,

    /// Backup signer private key for takeover drill
    #[arg(long, value_name = "HEX")]
    pub backup_private_key: Option<String>,

    /// Signer key for set_proof_config (defaults to genesis key)
    #[arg(long, value_name = "HEX")]
    pub proof_config_private_key: Option<String>,

    /// Prefund transfer amount before checks (default: 35000001)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub prefund_amount: Option<u64>,

    /// Skip backup wallet prefund step
    #[arg(long)]
    pub skip_prefund_backup: bool,

    /// Run zkbench in docker (default) or with the local go toolchain
    #[arg(long, value_name = "docker|local")]
    pub runner: Option<String>,

    /// Docker image tag (default: veilvm-zkbench-evidence:local)
    #[arg(long, value_name = "TAG")]
    pub docker_image: Option<String>,

    /// Dockerfile path (default: <project>/scripts/zkbench-runner.Dockerfile)
    #[arg(long, value_name = "PATH")]
    pub dockerfile: Option<PathBuf>,

    /// Do not build docker image when missing
    #[arg(long)]
    pub skip_image_build: bool,

    /// Skip binary prebuild and run via go run (slower)
    #[arg(long)]
    pub skip_zkbench_prebuild: bool,

    /// Use an existing zkbench binary instead of building one
    #[arg(long, value_name = "PATH", conflicts_with = "skip_zkbench_prebuild")]
    pub bench_binary: Option<PathBuf>,

    /// VeilVM project root (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub project_root: Option<PathBuf>,

    /// Root mounted at /workspace in docker mode (default: project root's grandparent)
    #[arg(long, value_name = "DIR")]
    pub workspace_root: Option<PathBuf>,

    /// Expected VEIL VM IDs for chain discovery, comma list
    #[arg(long, value_name = "LIST")]
    pub vm_ids: Option<String>,

    /// Validate readiness and exit before running checks
    #[arg(long)]
    pub preflight_only: bool,

    /// Skip malformed-proof drill
    #[arg(long)]
    pub skip_malformed: bool,

    /// Skip backup takeover drill
    #[arg(long)]
    pub skip_backup_takeover: bool,

    /// Skip timeout drill
    #[arg(long)]
    pub skip_timeout: bool,

    /// Skip synthetic negative drill
    #[arg(long)]
    pub skip_negative: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        EvidenceArgs::command().debug_assert();
    }

    #[test]
    fn numeric_flags_parse_as_positive_integers() {
        let args = EvidenceArgs::try_parse_from([
            "launch-gate-evidence",
            "--batch-size",
            "16",
            "--timeout-batches",
            "8, 32",
            "--skip-timeout",
        ])
        .expect("parse args");
        assert_eq!(args.batch_size, Some(16));
        assert_eq!(args.timeout_batches.as_deref(), Some("8, 32"));
        assert!(args.skip_timeout);
        assert!(!args.skip_negative);
    }

    #[test]
    fn zero_or_non_numeric_flags_are_rejected() {
        for (flag, value) in [("--batch-size", "0"), ("--timeout-minutes", "soon")] {
            let result = EvidenceArgs::try_parse_from(["launch-gate-evidence", flag, value]);
            assert!(result.is_err(), "{flag} {value} should be rejected");
        }
    }

    #[test]
    fn bench_binary_conflicts_with_skip_prebuild() {
        let result = EvidenceArgs::try_parse_from([
            "launch-gate-evidence",
            "--bench-binary",
            "/tmp/zkbench",
            "--skip-zkbench-prebuild",
        ]);
        assert!(result.is_err());
    }
}
