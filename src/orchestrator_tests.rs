use super::*;
use crate::cli::EvidenceArgs;
use crate::config::VEIL_VM_ID;
use crate::node::{BlockchainRow, HealthEndpoint};
use crate::runner::process::{CapturedOutput, Invocation, ProcessOutcome};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BACKUP: &str = "3333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333c";

/// Healthy only at the fallback port; lists one VEIL chain.
struct FallbackNode;

impl NodeClient for FallbackNode {
    fn probe_health(&self, base_url: &str, _endpoint: HealthEndpoint, _timeout: Duration) -> Result<bool> {
        if base_url.ends_with(":9650") {
            Ok(true)
        } else {
            anyhow::bail!("connection refused")
        }
    }

    fn list_blockchains(&self, _base_url: &str) -> Result<Vec<BlockchainRow>> {
        Ok(vec![BlockchainRow {
            id: "2L5JL1ouyg4bVMaC4EvY3Fy7Lrhx2sDv6jaTmy7yk8oQBxMvy".to_string(),
            name: "VEIL".to_string(),
            subnet_id: "subnet-1".to_string(),
            vm_id: VEIL_VM_ID.to_string(),
        }])
    }
}

struct Scripted {
    case: &'static str,
    exit_code: i32,
    stderr: &'static str,
    summary: Option<(u64, u64, u64)>,
}

const fn scripted(
    case: &'static str,
    exit_code: i32,
    stderr: &'static str,
    summary: Option<(u64, u64, u64)>,
) -> Scripted {
    Scripted {
        case,
        exit_code,
        stderr,
        summary,
    }
}

/// Answers bench runs by case id, taken from the `OUTPUT_DIR` suffix.
struct BenchDouble {
    script: Vec<Scripted>,
    cases: RefCell<Vec<String>>,
}

impl BenchDouble {
    fn new(script: Vec<Scripted>) -> Self {
        Self {
            script,
            cases: RefCell::new(Vec::new()),
        }
    }
}

impl Launcher for BenchDouble {
    fn run_logged(
        &self,
        invocation: &Invocation,
        stdout_log: &Path,
        stderr_log: &Path,
        _timeout: Duration,
    ) -> Result<ProcessOutcome> {
        let output_dir = &invocation.env["OUTPUT_DIR"];
        let entry = self
            .script
            .iter()
            .find(|entry| output_dir.ends_with(&format!("-{}", entry.case)))
            .ok_or_else(|| anyhow::anyhow!("unscripted case {output_dir}"))?;
        self.cases.borrow_mut().push(entry.case.to_string());
        std::fs::write(stdout_log, "")?;
        std::fs::write(stderr_log, entry.stderr)?;
        if let Some((accepted, rejected, missed)) = entry.summary {
            let dir = invocation.cwd.join(output_dir);
            std::fs::create_dir_all(&dir)?;
            let summary = serde_json::json!({
                "results": [{ "summary": {
                    "total_accepted_batches": accepted,
                    "total_rejected_batches": rejected,
                    "total_missed_proof_deadlines": missed,
                }}]
            });
            std::fs::write(dir.join("summary.json"), summary.to_string())?;
        }
        Ok(ProcessOutcome::exited(entry.exit_code))
    }

    fn run_captured(&self, invocation: &Invocation, _timeout: Duration) -> Result<CapturedOutput> {
        anyhow::bail!("unexpected captured run: {}", invocation.command_line())
    }
}

fn healthy_script() -> Vec<Scripted> {
    vec![
        scripted("prefund-backup", 0, "", None),
        scripted("shielded-smoke", 0, "", Some((1, 0, 0))),
        scripted("backup-takeover-primary-fails", 1, "tx failed: unauthorized prover", None),
        scripted("backup-takeover-backup-recovers", 0, "", Some((2, 0, 0))),
        scripted("synthetic-negative", 1, "proof verification failed", None),
        scripted("malformed-proof", 1, "invalid proof envelope", None),
        scripted("timeout-drill-b8", 0, "", Some((1, 0, 0))),
        scripted("timeout-drill-b32", 1, "missed proof deadline at height 12", None),
    ]
}

struct Workspace {
    _dir: tempfile::TempDir,
    project: PathBuf,
    bench: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = dir.path().join("hypersdk/examples/veilvm");
        std::fs::create_dir_all(project.join("zk-fixture-new")).expect("mkdir");
        std::fs::write(
            project.join("zk-fixture-new/groth16_shielded_ledger_pk.bin"),
            b"pk",
        )
        .expect("pk");
        let bench = dir.path().join("veilvm-zkbench");
        std::fs::write(&bench, b"bin").expect("bench");
        Self {
            _dir: dir,
            project,
            bench,
        }
    }

    fn args(&self) -> EvidenceArgs {
        EvidenceArgs {
            project_root: Some(self.project.clone()),
            runner: Some("local".to_string()),
            bench_binary: Some(self.bench.clone()),
            backup_private_key: Some(BACKUP.to_string()),
            ..EvidenceArgs::default()
        }
    }

    fn config(&self, args: &EvidenceArgs) -> RunConfiguration {
        RunConfiguration::resolve(args, &EnvSnapshot::default(), &self.project).expect("config")
    }

    fn bundles(&self) -> PathBuf {
        self.project.join("evidence-bundles")
    }
}

fn quick_health() -> HealthPolicy {
    HealthPolicy {
        deadline: Duration::from_millis(50),
        max_request: Duration::from_millis(10),
        max_poll: Duration::from_millis(10),
    }
}

fn execute(workspace: &Workspace, args: &EvidenceArgs, launcher: &dyn Launcher) -> Result<RunOutcome> {
    let config = workspace.config(args);
    let services = Services {
        node: &FallbackNode,
        launcher,
        health: quick_health(),
    };
    run(&config, &EnvSnapshot::default(), &services)
}

#[test]
fn full_run_writes_a_passing_bundle() {
    let workspace = Workspace::new();
    let bench = BenchDouble::new(healthy_script());
    let outcome = execute(&workspace, &workspace.args(), &bench).expect("run");
    assert!(outcome.passed());

    let RunOutcome::Completed { paths, .. } = outcome else {
        panic!("expected a bundle");
    };
    assert!(paths.json.starts_with(workspace.bundles()));
    let bundle: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.json).expect("json")).expect("parse");
    assert_eq!(bundle["node_url"], "http://127.0.0.1:9650");
    assert_eq!(bundle["chain_discovery_strategy"], "vm-id");
    assert_eq!(bundle["runner"], "local");
    assert!(bundle.get("docker_image").is_none());
    assert_eq!(bundle["discovered_chains"][0]["name"], "VEIL");

    let ids: Vec<&str> = bundle["checks"]
        .as_array()
        .expect("checks")
        .iter()
        .filter_map(|check| check["id"].as_str())
        .collect();
    assert_eq!(
        ids,
        [
            "shielded-smoke",
            "backup-takeover",
            "synthetic-negative",
            "malformed-proof",
            "timeout-drill"
        ]
    );
    assert_eq!(bundle["checks"][4]["attempts"].as_array().map(Vec::len), Some(2));
    assert_eq!(bench.cases.borrow()[0], "prefund-backup");
    assert!(paths.markdown.is_file());
}

#[test]
fn failing_check_flips_the_verdict_but_still_writes_the_bundle() {
    let workspace = Workspace::new();
    let mut script = healthy_script();
    script[4] = scripted("synthetic-negative", 0, "", Some((1, 0, 0)));
    let bench = BenchDouble::new(script);
    let outcome = execute(&workspace, &workspace.args(), &bench).expect("run");
    assert!(!outcome.passed());
    let RunOutcome::Completed { paths, .. } = outcome else {
        panic!("expected a bundle");
    };
    let markdown = std::fs::read_to_string(paths.markdown).expect("md");
    assert!(markdown.contains("- Verdict: **FAIL**"));
    assert!(markdown.contains("| synthetic-negative | FAIL |"));
}

#[test]
fn preflight_stops_before_any_bench_run() {
    let workspace = Workspace::new();
    let mut args = workspace.args();
    args.preflight_only = true;
    let bench = BenchDouble::new(Vec::new());
    let outcome = execute(&workspace, &args, &bench).expect("preflight");
    assert!(matches!(outcome, RunOutcome::PreflightPassed));
    assert!(outcome.passed());
    assert!(bench.cases.borrow().is_empty());
    assert!(!workspace.bundles().exists());
}

#[test]
fn missing_proving_key_is_fatal() {
    let workspace = Workspace::new();
    let mut args = workspace.args();
    args.pk_path = Some(PathBuf::from("./missing/pk.bin"));
    let err = execute(&workspace, &args, &BenchDouble::new(Vec::new())).expect_err("missing pk");
    assert!(matches!(
        err.downcast_ref::<HarnessError>(),
        Some(HarnessError::ProvingKeyMissing(_))
    ));
}

#[test]
fn failed_prefund_aborts_without_a_bundle() {
    let workspace = Workspace::new();
    let bench = BenchDouble::new(vec![scripted("prefund-backup", 1, "insufficient balance", None)]);
    let err = execute(&workspace, &workspace.args(), &bench).expect_err("abort");
    assert!(err.to_string().starts_with("prefund backup failed (exit=1)"));
    let bundles: Vec<_> = std::fs::read_dir(workspace.bundles())
        .expect("bundle root")
        .filter_map(|entry| entry.ok())
        .collect();
    assert_eq!(bundles.len(), 1);
    assert!(!bundles[0].path().join("bundle.json").exists());
}

#[test]
fn bench_env_carries_resolved_node_and_chain() {
    let workspace = Workspace::new();
    let config = workspace.config(&workspace.args());
    let env: EnvSnapshot = [("HOME", "/home/ci"), ("CHAIN_ID", "stale")].into_iter().collect();
    let vars = base_env(&config, &env, "http://127.0.0.1:9650", "chain-1");
    assert_eq!(vars["HOME"], "/home/ci");
    assert_eq!(vars["CHAIN_ID"], "chain-1");
    assert_eq!(vars["NODE_URL"], "http://127.0.0.1:9650");
    assert_eq!(vars["TIMEOUT_MINUTES"], "20");
    assert_eq!(vars["PRIVATE_KEY"], config.keys.primary);
}
