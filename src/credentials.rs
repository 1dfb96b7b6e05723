//! Signer key setup ahead of the evidence checks.
//!
//! The takeover drill needs a backup key distinct from the primary; one is
//! generated with the repository's keygen command when none is configured.
//! Prefund runs top up the signers from the faucet (or the primary) so that
//! fee exhaustion cannot masquerade as a proof failure.
use crate::config::RunConfiguration;
use crate::error::HarnessError;
use crate::runner::process::Launcher;
use crate::runner::Sandbox;
use crate::scenario::{prefund, ScenarioExecutor, ScenarioSpec};
use crate::util::{short_id, tail_lines};
use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

const KEYGEN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const KEYGEN_PACKAGE: &str = "./cmd/veilvm-keygen";

/// Pull the 128-hex private key out of keygen output, lowercased.
pub fn extract_private_key(output: &str) -> Option<String> {
    static KEY_LINE: OnceLock<Regex> = OnceLock::new();
    let re = KEY_LINE.get_or_init(|| {
        Regex::new(r"Private Key \(hex\):\s*([0-9a-fA-F]{128})").expect("valid keygen regex")
    });
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|key| key.as_str().to_ascii_lowercase())
}

/// The backup key for the takeover drill, or `None` when the drill is skipped.
pub fn resolve_backup_key(
    config: &RunConfiguration,
    sandbox: &Sandbox,
    launcher: &dyn Launcher,
) -> Result<Option<String>> {
    if config.toggles.skip_backup_takeover {
        return Ok(None);
    }
    let key = match &config.keys.backup {
        Some(key) => key.clone(),
        None => {
            println!("Generating backup private key for takeover drill...");
            let key = generate_backup_key(sandbox, launcher)?;
            println!("Backup key generated: {}", short_id(&key));
            key
        }
    };
    if key.eq_ignore_ascii_case(&config.keys.primary) {
        return Err(
            HarnessError::setup("backup private key must differ from primary private key").into(),
        );
    }
    Ok(Some(key))
}

pub fn generate_backup_key(sandbox: &Sandbox, launcher: &dyn Launcher) -> Result<String> {
    let invocation = sandbox.go_command(&["run", KEYGEN_PACKAGE])?;
    let output = launcher.run_captured(&invocation, KEYGEN_TIMEOUT)?;
    let combined = output.combined();
    if !output.outcome.success() {
        return Err(HarnessError::setup(format!(
            "failed to generate backup key (exit={})\n{}",
            output.outcome.exit_code_or_sentinel(),
            tail_lines(combined.trim(), 40)
        ))
        .into());
    }
    let key = extract_private_key(&combined)
        .ok_or_else(|| HarnessError::setup("failed to parse backup key from keygen output"))?;
    tracing::info!(key = short_id(&key).as_str(), "backup key generated");
    Ok(key)
}

/// One funding run and how it is announced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefundRun {
    pub spec: ScenarioSpec,
    pub label: &'static str,
    pub announce: String,
}

/// Funding runs needed before the checks, in execution order.
pub fn plan_prefunds(
    config: &RunConfiguration,
    backup_key: Option<&str>,
) -> Result<Vec<PrefundRun>, HarnessError> {
    let keys = &config.keys;
    let mut runs = Vec::new();

    if let Some(faucet) = keys
        .faucet
        .as_deref()
        .filter(|faucet| !faucet.eq_ignore_ascii_case(&keys.primary))
    {
        runs.push(PrefundRun {
            spec: prefund("prefund-primary", &keys.primary, faucet, config.prefund_amount),
            label: "prefund primary",
            announce: format!(
                "Prefunding primary key ({}) from faucet...",
                short_id(&keys.primary)
            ),
        });
    }

    let wants_backup =
        !config.toggles.skip_backup_takeover && !config.toggles.skip_prefund_backup;
    if let (true, Some(backup)) = (wants_backup, backup_key) {
        let source = keys.faucet.as_deref().unwrap_or(&keys.primary);
        if source.eq_ignore_ascii_case(backup) {
            return Err(HarnessError::setup(
                "backup prefund source key must differ from backup private key",
            ));
        }
        runs.push(PrefundRun {
            spec: prefund("prefund-backup", backup, source, config.prefund_amount),
            label: "prefund backup",
            announce: format!(
                "Prefunding backup key ({}) before evidence checks...",
                short_id(backup)
            ),
        });
    }
    Ok(runs)
}

/// Execute funding runs; any non-zero exit aborts the invocation.
pub fn run_prefunds(executor: &dyn ScenarioExecutor, runs: &[PrefundRun]) -> Result<()> {
    for run in runs {
        println!("{}", run.announce);
        let result = executor.execute(&run.spec)?;
        if !result.succeeded() {
            return Err(HarnessError::setup(format!(
                "{} failed (exit={}). stderr: {}\n{}",
                run.label,
                result.exit_code,
                result.logs.stderr.display(),
                result.error_snippet.as_deref().unwrap_or_default()
            ))
            .into());
        }
        tracing::info!(case = run.spec.id.as_str(), "prefund complete");
    }
    Ok(())
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
