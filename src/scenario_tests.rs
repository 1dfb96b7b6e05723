use super::*;
use crate::cli::EvidenceArgs;
use crate::config::EnvSnapshot;
use crate::summary::SummaryCounters;
use std::cell::RefCell;
use std::path::Path;

const BACKUP: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

fn config_with(env: &[(&str, &str)]) -> RunConfiguration {
    let env: EnvSnapshot = env.iter().copied().collect();
    RunConfiguration::resolve(
        &EvidenceArgs::default(),
        &env,
        Path::new("/work/hypersdk/examples/veilvm"),
    )
    .expect("resolve")
}

/// Answers each case id from a fixed table and records the order of calls.
struct ScriptedExecutor {
    outcomes: Vec<(&'static str, ExecutionResult)>,
    calls: RefCell<Vec<String>>,
    envs: RefCell<Vec<BTreeMap<String, String>>>,
}

impl ScriptedExecutor {
    fn new(outcomes: Vec<(&'static str, ExecutionResult)>) -> Self {
        Self {
            outcomes,
            calls: RefCell::new(Vec::new()),
            envs: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ScenarioExecutor for ScriptedExecutor {
    fn execute(&self, spec: &ScenarioSpec) -> Result<ExecutionResult> {
        self.calls.borrow_mut().push(spec.id.clone());
        self.envs.borrow_mut().push(spec.env.clone());
        self.outcomes
            .iter()
            .find(|(id, _)| *id == spec.id)
            .map(|(_, result)| result.clone())
            .ok_or_else(|| anyhow::anyhow!("unexpected case {}", spec.id))
    }
}

fn ok(name: &str, accepted: u64, rejected: u64, missed: u64) -> ExecutionResult {
    ExecutionResult::fixture(
        name,
        0,
        Some(SummaryCounters::new(accepted, rejected, missed)),
        "",
    )
}

fn failed(name: &str, error_text: &str) -> ExecutionResult {
    ExecutionResult::fixture(name, 1, None, error_text)
}

#[test]
fn timeout_drill_stops_at_first_passing_batch() {
    let config = config_with(&[]);
    let executor = ScriptedExecutor::new(vec![
        ("timeout-drill-b8", ok("timeout-drill-b8", 4, 0, 0)),
        (
            "timeout-drill-b32",
            failed("timeout-drill-b32", "batch 32: missed proof deadline"),
        ),
    ]);
    let record = run_check(&executor, &config, &Check::TimeoutDrill).expect("check");
    assert!(record.passed);
    assert_eq!(record.attempts.len(), 2);
    assert!(!record.attempts[0].evaluation.pass);
    assert!(record.attempts[1].evaluation.pass);
    assert_eq!(executor.calls(), ["timeout-drill-b8", "timeout-drill-b32"]);
}

#[test]
fn timeout_drill_skips_remaining_batches_after_a_pass() {
    let config = config_with(&[("VEIL_EVIDENCE_TIMEOUT_BATCHES", "8,32,64")]);
    let executor = ScriptedExecutor::new(vec![("timeout-drill-b8", ok("timeout-drill-b8", 0, 0, 1))]);
    let record = run_check(&executor, &config, &Check::TimeoutDrill).expect("check");
    assert!(record.passed);
    assert_eq!(executor.calls(), ["timeout-drill-b8"]);
}

#[test]
fn timeout_drill_fails_when_no_batch_triggers() {
    let config = config_with(&[]);
    let executor = ScriptedExecutor::new(vec![
        ("timeout-drill-b8", ok("timeout-drill-b8", 4, 0, 0)),
        ("timeout-drill-b32", ok("timeout-drill-b32", 4, 0, 0)),
    ]);
    let record = run_check(&executor, &config, &Check::TimeoutDrill).expect("check");
    assert!(!record.passed);
    assert_eq!(record.attempts.len(), 2);
}

#[test]
fn timeout_drill_caps_bench_timeout() {
    let spec = timeout_drill(&config_with(&[("VEIL_EVIDENCE_TIMEOUT_MINUTES", "45")]), 32);
    assert_eq!(spec.id, "timeout-drill-b32");
    assert_eq!(spec.env["TIMEOUT_MINUTES"], "10");
    assert_eq!(spec.env["BATCH_SIZES"], "32");
    assert_eq!(spec.env["PROOF_DEADLINE_MS"], "1");
    assert_eq!(spec.env["PROOF_SUBMIT_DELAY_MS"], "1500");
    let short = timeout_drill(&config_with(&[("VEIL_EVIDENCE_TIMEOUT_MINUTES", "3")]), 8);
    assert_eq!(short.env["TIMEOUT_MINUTES"], "3");
}

#[test]
fn backup_takeover_needs_both_sub_runs() {
    let config = config_with(&[]);
    let check = Check::BackupTakeover {
        backup_key: BACKUP.to_string(),
    };
    let passing = ScriptedExecutor::new(vec![
        (
            "backup-takeover-primary-fails",
            failed("backup-takeover-primary-fails", "prover authority mismatch"),
        ),
        (
            "backup-takeover-backup-recovers",
            ok("backup-takeover-backup-recovers", 1, 0, 0),
        ),
    ]);
    let record = run_check(&passing, &config, &check).expect("check");
    assert!(record.passed);
    assert_eq!(record.id, "backup-takeover");
    assert_eq!(record.attempts.len(), 2);

    let primary_succeeds = ScriptedExecutor::new(vec![
        (
            "backup-takeover-primary-fails",
            ok("backup-takeover-primary-fails", 1, 0, 0),
        ),
        (
            "backup-takeover-backup-recovers",
            ok("backup-takeover-backup-recovers", 1, 0, 0),
        ),
    ]);
    let record = run_check(&primary_succeeds, &config, &check).expect("check");
    assert!(!record.passed);
    assert_eq!(
        record.attempts[0].evaluation.reason,
        "primary prover unexpectedly succeeded"
    );
    assert_eq!(
        primary_succeeds.calls().len(),
        2,
        "backup sub-run still executes"
    );
}

#[test]
fn takeover_envs_assign_authority_to_backup() {
    let config = config_with(&[]);
    let primary = takeover_primary_fails(&config, BACKUP);
    assert_eq!(primary.env["PRIVATE_KEY"], config.keys.primary);
    assert_eq!(primary.env["PROVER_AUTHORITY_PRIVATE_KEY"], BACKUP);
    assert_eq!(primary.kind, Some(ScenarioKind::BackupPrimaryFails));

    let backup = takeover_backup_recovers(&config, BACKUP);
    assert_eq!(backup.env["PRIVATE_KEY"], BACKUP);
    assert_eq!(backup.env["REFUEL_PRIVATE_KEY"], config.keys.primary);
    assert_eq!(backup.env["GAS_SAFETY_BPS"], "10000");
    assert_eq!(backup.env["GAS_RESERVE"], "1");
}

#[test]
fn catalogue_environments() {
    let config = config_with(&[("VEIL_EVIDENCE_BATCH_SIZE", "16")]);
    let smoke = shielded_smoke(&config);
    assert_eq!(smoke.env["PROOF_MODE"], "groth16");
    assert_eq!(smoke.env["PROOF_CIRCUIT_ID"], "shielded-ledger-v1");
    assert_eq!(smoke.env["BATCH_SIZES"], "16");
    assert_eq!(smoke.env["BATCH_WINDOW_MS"], "5000");
    assert_eq!(smoke.env["PROOF_DEADLINE_MS"], "10000");
    assert_eq!(
        smoke.env["GROTH16_PK_PATH"],
        config.pk_path.display().to_string()
    );

    let negative = synthetic_negative(&config);
    assert_eq!(negative.env["PROOF_MODE"], "synthetic");
    assert!(!negative.env.contains_key("GROTH16_PK_PATH"));

    let malformed = malformed_proof(&config);
    assert_eq!(malformed.env["PROOF_TAMPER_MODE"], "truncate");
    assert_eq!(malformed.env["PROOF_MODE"], "groth16");

    let funding = prefund("prefund-backup", BACKUP, &config.keys.primary, 42);
    assert_eq!(funding.kind, None);
    assert_eq!(funding.env["PREFUND_ONLY"], "true");
    assert_eq!(funding.env["REFUEL_AMOUNT"], "42");
    assert_eq!(funding.env["PROOF_MODE"], "synthetic");
}

#[test]
fn plan_follows_fixed_order_and_toggles() {
    let config = config_with(&[]);
    let ids: Vec<&str> = plan_checks(&config, Some(BACKUP))
        .iter()
        .map(Check::id)
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

    let trimmed = config_with(&[
        ("VEIL_EVIDENCE_SKIP_NEGATIVE", "1"),
        ("VEIL_EVIDENCE_SKIP_TIMEOUT", "yes"),
        ("VEIL_EVIDENCE_SKIP_BACKUP_TAKEOVER", "true"),
    ]);
    let ids: Vec<&str> = plan_checks(&trimmed, Some(BACKUP))
        .iter()
        .map(Check::id)
        .collect();
    assert_eq!(ids, ["shielded-smoke", "malformed-proof"]);
}

#[test]
fn setup_specs_cannot_be_evaluated() {
    let config = config_with(&[]);
    let executor = ScriptedExecutor::new(vec![("prefund-primary", ok("prefund-primary", 0, 0, 0))]);
    let spec = prefund("prefund-primary", &config.keys.primary, BACKUP, 1);
    assert!(evaluated(&executor, &spec).is_err());
}

#[test]
fn executor_errors_propagate() {
    let config = config_with(&[]);
    let executor = ScriptedExecutor::new(Vec::new());
    assert!(run_check(&executor, &config, &Check::ShieldedSmoke).is_err());
    assert_eq!(executor.envs.borrow().len(), 1);
}
