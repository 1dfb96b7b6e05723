//! Scenario catalogue and check execution.
//!
//! Each check is one or more bench runs evaluated by its [`ScenarioKind`].
//! The backup-takeover check always runs both sub-runs and passes only when
//! both do; the timeout drill walks the configured batch sizes and stops at
//! the first passing attempt.
use crate::bundle::{Attempt, CheckRecord};
use crate::config::RunConfiguration;
use crate::evaluate::ScenarioKind;
use crate::runner::{CaseRunner, ExecutionResult};
use anyhow::Result;
use std::collections::BTreeMap;

const CIRCUIT_ID: &str = "shielded-ledger-v1";
const NOMINAL_WINDOW_MS: &str = "5000";
const NOMINAL_DEADLINE_MS: &str = "10000";
const TIMEOUT_DRILL_MAX_MINUTES: u64 = 10;
const TIMEOUT_DRILL_SUBMIT_DELAY_MS: &str = "1500";
const FULL_GAS_SAFETY_BPS: &str = "10000";

/// One bench run: a case id, its environment overrides, and how to judge it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioSpec {
    pub id: String,
    pub env: BTreeMap<String, String>,
    /// `None` for setup runs (prefund) that are not evaluated.
    pub kind: Option<ScenarioKind>,
}

impl ScenarioSpec {
    fn new(id: impl Into<String>, kind: Option<ScenarioKind>) -> Self {
        Self {
            id: id.into(),
            env: BTreeMap::new(),
            kind,
        }
    }

    fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    fn groth16(self, config: &RunConfiguration) -> Self {
        self.set("PROOF_MODE", "groth16")
            .set("PROOF_CIRCUIT_ID", CIRCUIT_ID)
            .set("GROTH16_PK_PATH", config.pk_path.display().to_string())
            .set("BATCH_SIZES", config.batch_size.to_string())
            .set("WINDOWS_PER_SIZE", config.windows_per_size.to_string())
            .set("BATCH_WINDOW_MS", NOMINAL_WINDOW_MS)
            .set("PROOF_DEADLINE_MS", NOMINAL_DEADLINE_MS)
    }
}

pub fn shielded_smoke(config: &RunConfiguration) -> ScenarioSpec {
    ScenarioSpec::new("shielded-smoke", Some(ScenarioKind::ShieldedSmoke)).groth16(config)
}

pub fn synthetic_negative(config: &RunConfiguration) -> ScenarioSpec {
    ScenarioSpec::new("synthetic-negative", Some(ScenarioKind::SyntheticNegative))
        .set("PROOF_MODE", "synthetic")
        .set("PROOF_CIRCUIT_ID", CIRCUIT_ID)
        .set("BATCH_SIZES", config.batch_size.to_string())
        .set("WINDOWS_PER_SIZE", config.windows_per_size.to_string())
        .set("BATCH_WINDOW_MS", NOMINAL_WINDOW_MS)
        .set("PROOF_DEADLINE_MS", NOMINAL_DEADLINE_MS)
}

pub fn malformed_proof(config: &RunConfiguration) -> ScenarioSpec {
    ScenarioSpec::new("malformed-proof", Some(ScenarioKind::MalformedProof))
        .groth16(config)
        .set("PROOF_TAMPER_MODE", "truncate")
}

/// Primary signs while prover authority is assigned to the backup key.
pub fn takeover_primary_fails(config: &RunConfiguration, backup_key: &str) -> ScenarioSpec {
    ScenarioSpec::new(
        "backup-takeover-primary-fails",
        Some(ScenarioKind::BackupPrimaryFails),
    )
    .groth16(config)
    .set("PRIVATE_KEY", config.keys.primary.as_str())
    .set("PROOF_CONFIG_PRIVATE_KEY", config.keys.proof_config.as_str())
    .set("PROVER_AUTHORITY_PRIVATE_KEY", backup_key)
}

/// Backup signs, refuelling from the primary key.
pub fn takeover_backup_recovers(config: &RunConfiguration, backup_key: &str) -> ScenarioSpec {
    ScenarioSpec::new(
        "backup-takeover-backup-recovers",
        Some(ScenarioKind::BackupRecovers),
    )
    .groth16(config)
    .set("PRIVATE_KEY", backup_key)
    .set("REFUEL_PRIVATE_KEY", config.keys.primary.as_str())
    .set("PROOF_CONFIG_PRIVATE_KEY", config.keys.proof_config.as_str())
    .set("PROVER_AUTHORITY_PRIVATE_KEY", backup_key)
    .set("GAS_SAFETY_BPS", FULL_GAS_SAFETY_BPS)
    .set("GAS_RESERVE", "1")
}

pub fn timeout_drill(config: &RunConfiguration, batch: u64) -> ScenarioSpec {
    ScenarioSpec::new(
        format!("timeout-drill-b{batch}"),
        Some(ScenarioKind::TimeoutDrill),
    )
    .groth16(config)
    .set("BATCH_SIZES", batch.to_string())
    .set("WINDOWS_PER_SIZE", "1")
    .set("BATCH_WINDOW_MS", "1")
    .set("PROOF_DEADLINE_MS", "1")
    .set("PROOF_SUBMIT_DELAY_MS", TIMEOUT_DRILL_SUBMIT_DELAY_MS)
    .set(
        "TIMEOUT_MINUTES",
        config.timeout_minutes.min(TIMEOUT_DRILL_MAX_MINUTES).to_string(),
    )
}

/// A funding-only run: `signer` is topped up from `refuel_source`.
pub fn prefund(id: &str, signer: &str, refuel_source: &str, amount: u64) -> ScenarioSpec {
    ScenarioSpec::new(id, None)
        .set("PRIVATE_KEY", signer)
        .set("REFUEL_PRIVATE_KEY", refuel_source)
        .set("GAS_SAFETY_BPS", FULL_GAS_SAFETY_BPS)
        .set("GAS_RESERVE", "1")
        .set("REFUEL_AMOUNT", amount.to_string())
        .set("PREFUND_ONLY", "true")
        .set("PROOF_MODE", "synthetic")
        .set("BATCH_SIZES", "1")
        .set("WINDOWS_PER_SIZE", "1")
        .set("BATCH_WINDOW_MS", "1000")
        .set("PROOF_DEADLINE_MS", "2000")
}

/// Runs a spec to completion. [`CaseRunner`] is the production implementation.
pub trait ScenarioExecutor {
    fn execute(&self, spec: &ScenarioSpec) -> Result<ExecutionResult>;
}

impl ScenarioExecutor for CaseRunner<'_> {
    fn execute(&self, spec: &ScenarioSpec) -> Result<ExecutionResult> {
        self.run(spec)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Check {
    ShieldedSmoke,
    BackupTakeover { backup_key: String },
    SyntheticNegative,
    MalformedProof,
    TimeoutDrill,
}

impl Check {
    pub fn id(&self) -> &'static str {
        match self {
            Check::ShieldedSmoke => "shielded-smoke",
            Check::BackupTakeover { .. } => "backup-takeover",
            Check::SyntheticNegative => "synthetic-negative",
            Check::MalformedProof => "malformed-proof",
            Check::TimeoutDrill => "timeout-drill",
        }
    }
}

/// Enabled checks in execution order. The takeover drill needs a resolved
/// backup key and is dropped without one.
pub fn plan_checks(config: &RunConfiguration, backup_key: Option<&str>) -> Vec<Check> {
    let toggles = &config.toggles;
    let mut checks = vec![Check::ShieldedSmoke];
    if let (false, Some(backup_key)) = (toggles.skip_backup_takeover, backup_key) {
        checks.push(Check::BackupTakeover {
            backup_key: backup_key.to_string(),
        });
    }
    if !toggles.skip_negative {
        checks.push(Check::SyntheticNegative);
    }
    if !toggles.skip_malformed {
        checks.push(Check::MalformedProof);
    }
    if !toggles.skip_timeout {
        checks.push(Check::TimeoutDrill);
    }
    checks
}

pub fn run_check(
    executor: &dyn ScenarioExecutor,
    config: &RunConfiguration,
    check: &Check,
) -> Result<CheckRecord> {
    let record = match check {
        Check::ShieldedSmoke => {
            println!("Running shielded smoke...");
            single_run(executor, check.id(), &shielded_smoke(config))?
        }
        Check::SyntheticNegative => {
            println!("Running synthetic negative...");
            single_run(executor, check.id(), &synthetic_negative(config))?
        }
        Check::MalformedProof => {
            println!("Running malformed-proof drill...");
            single_run(executor, check.id(), &malformed_proof(config))?
        }
        Check::BackupTakeover { backup_key } => {
            println!("Running backup takeover drill (primary prover rejection)...");
            let primary = evaluated(executor, &takeover_primary_fails(config, backup_key))?;
            println!("Running backup takeover drill (backup prover recovery)...");
            let backup = evaluated(executor, &takeover_backup_recovers(config, backup_key))?;
            CheckRecord::from_attempts(check.id(), vec![primary, backup])
        }
        Check::TimeoutDrill => {
            let mut attempts = Vec::new();
            for batch in &config.timeout_batches {
                let spec = timeout_drill(config, *batch);
                println!("Running timeout drill attempt ({})...", spec.id);
                let attempt = evaluated(executor, &spec)?;
                let passed = attempt.evaluation.pass;
                attempts.push(attempt);
                if passed {
                    break;
                }
            }
            CheckRecord::any_attempt(check.id(), attempts)
        }
    };
    tracing::info!(
        check = record.id.as_str(),
        passed = record.passed,
        attempts = record.attempts.len(),
        "check evaluated"
    );
    Ok(record)
}

fn single_run(
    executor: &dyn ScenarioExecutor,
    id: &str,
    spec: &ScenarioSpec,
) -> Result<CheckRecord> {
    let attempt = evaluated(executor, spec)?;
    Ok(CheckRecord::from_attempts(id, vec![attempt]))
}

fn evaluated(executor: &dyn ScenarioExecutor, spec: &ScenarioSpec) -> Result<Attempt> {
    let run = executor.execute(spec)?;
    let evaluation = match spec.kind {
        Some(kind) => kind.evaluate(&run.eval_input()),
        None => anyhow::bail!("scenario {} has no evaluator", spec.id),
    };
    Ok(Attempt { run, evaluation })
}

#[cfg(test)]
#[path = "scenario_tests.rs"]
mod tests;
