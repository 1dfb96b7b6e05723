//! Scenario execution.
//!
//! A [`CaseRunner`] turns one [`ScenarioSpec`] into an [`ExecutionResult`]:
//! it layers the scenario's overrides onto the base bench environment, runs
//! the bench through the configured [`Sandbox`], and collects logs plus the
//! summary artifact. Cache-corruption recovery applies in docker mode only,
//! where the module cache belongs to the harness.
pub mod docker;
pub mod process;

use crate::classify::{classify, ErrorClass};
use crate::error::HarnessError;
use crate::evaluate::EvalInput;
use crate::provision::{BenchExec, CacheDirs};
use crate::recovery::{reset_module_cache, run_with_cache_recovery, AttemptVerdict, RecoveryOutcome};
use crate::scenario::ScenarioSpec;
use crate::summary::{load_summary, primary_counters, SummaryCounters, SUMMARY_FILE_NAME};
use crate::util::{rfc3339, tail_lines};
use anyhow::{Context, Result};
use chrono::Utc;
use docker::DockerSandbox;
use process::{Invocation, Launcher, ProcessOutcome};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const ERROR_SNIPPET_LINES: usize = 80;
const BENCH_TIMEOUT_GRACE_MINUTES: u64 = 5;
const FALLBACK_BENCH_TIMEOUT_MINUTES: u64 = 30;

/// Host toolchain used by the local runner.
#[derive(Clone, Debug)]
pub struct LocalToolchain {
    pub go: PathBuf,
    pub project_root: PathBuf,
    pub caches: CacheDirs,
    pub host_env: BTreeMap<String, String>,
}

impl LocalToolchain {
    pub fn go<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(&self.go, &self.project_root)
            .args(args)
            .envs(&self.host_env)
    }
}

/// Where bench, build, and keygen processes run.
#[derive(Clone, Debug)]
pub enum Sandbox {
    Local(LocalToolchain),
    Docker(DockerSandbox),
}

impl Sandbox {
    pub fn caches(&self) -> &CacheDirs {
        match self {
            Sandbox::Local(local) => &local.caches,
            Sandbox::Docker(docker) => &docker.caches,
        }
    }

    pub fn project_root(&self) -> &Path {
        match self {
            Sandbox::Local(local) => &local.project_root,
            Sandbox::Docker(docker) => &docker.project_root,
        }
    }

    /// Only the docker runner owns its module cache, so only it may wipe it.
    pub fn recovers_from_cache_corruption(&self) -> bool {
        matches!(self, Sandbox::Docker(_))
    }

    /// `go <args>` on the host or inside the runner image.
    pub fn go_command(&self, args: &[&str]) -> Result<Invocation, HarnessError> {
        match self {
            Sandbox::Local(local) => Ok(local.go(args.iter().copied())),
            Sandbox::Docker(docker) => {
                let script = shell_words::join(std::iter::once("go").chain(args.iter().copied()));
                docker.shell(&script)
            }
        }
    }

    /// The bench with `run_env` as its complete environment.
    pub fn bench_command(
        &self,
        bench: &BenchExec,
        run_env: &BTreeMap<String, String>,
    ) -> Result<Invocation, HarnessError> {
        match self {
            Sandbox::Docker(docker) => docker.bench(run_env, bench.binary_path()),
            Sandbox::Local(local) => Ok(match bench.binary_path() {
                Some(path) => Invocation::new(path, &local.project_root).envs(run_env),
                None => Invocation::new(&local.go, &local.project_root)
                    .args(["run", "./cmd/veilvm-zkbench"])
                    .envs(run_env),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogPaths {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl LogPaths {
    pub fn for_case(logs_dir: &Path, case: &str) -> Self {
        Self {
            stdout: logs_dir.join(format!("{case}.stdout.log")),
            stderr: logs_dir.join(format!("{case}.stderr.log")),
        }
    }

    /// stdout then stderr, lossily decoded; unreadable files read as empty.
    fn read_combined(&self) -> String {
        let read = |path: &Path| {
            std::fs::read(path)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        };
        format!("{}\n{}", read(&self.stdout), read(&self.stderr))
    }
}

/// Observable record of one scenario run.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionResult {
    pub name: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    /// `-1` when the process produced no exit code.
    pub exit_code: i32,
    pub signal: String,
    pub timed_out: bool,
    pub command_line: String,
    pub output_dir: String,
    pub summary_path: Option<PathBuf>,
    pub summary: Option<Value>,
    pub retries: u32,
    pub recovered_after_cache_reset: bool,
    pub logs: LogPaths,
    pub error_snippet: Option<String>,
}

impl ExecutionResult {
    pub fn counters(&self) -> Option<SummaryCounters> {
        self.summary.as_ref().and_then(primary_counters)
    }

    pub fn eval_input(&self) -> EvalInput<'_> {
        EvalInput {
            exit_code: self.exit_code,
            counters: self.counters(),
            error_text: self.error_snippet.as_deref().unwrap_or_default(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
impl ExecutionResult {
    /// A finished run with an optional `results[0].summary` block.
    pub(crate) fn fixture(
        name: &str,
        exit_code: i32,
        counters: Option<SummaryCounters>,
        error_text: &str,
    ) -> Self {
        let logs = LogPaths::for_case(Path::new("/work/veilvm/bundle/logs"), name);
        let summary = counters.map(|counters| serde_json::json!({ "results": [{ "summary": counters }] }));
        Self {
            name: name.to_string(),
            started_at: "2026-01-01T00:00:00.000Z".to_string(),
            ended_at: "2026-01-01T00:00:12.345Z".to_string(),
            duration_ms: 12_345,
            exit_code,
            signal: String::new(),
            timed_out: false,
            command_line: "veilvm-zkbench".to_string(),
            output_dir: format!("./zkbench-out-evidence-20260101-000000-{name}"),
            summary_path: summary.as_ref().map(|_| {
                PathBuf::from(format!(
                    "/work/veilvm/zkbench-out-evidence-20260101-000000-{name}/summary.json"
                ))
            }),
            summary,
            retries: 0,
            recovered_after_cache_reset: false,
            logs,
            error_snippet: (exit_code != 0).then(|| error_text.to_string()),
        }
    }
}

/// Shared context for every scenario in one invocation.
pub struct CaseRunner<'a> {
    pub launcher: &'a dyn Launcher,
    pub sandbox: &'a Sandbox,
    pub bench: &'a BenchExec,
    /// Host environment plus the bench variables common to every case.
    pub base_env: &'a BTreeMap<String, String>,
    pub bundle_dir: &'a Path,
    pub bundle_stamp: &'a str,
}

impl CaseRunner<'_> {
    pub fn run(&self, spec: &ScenarioSpec) -> Result<ExecutionResult> {
        let output_dir_name = format!("zkbench-out-evidence-{}-{}", self.bundle_stamp, spec.id);
        let output_dir = format!("./{output_dir_name}");
        let mut run_env = self.base_env.clone();
        run_env.extend(spec.env.iter().map(|(key, value)| (key.clone(), value.clone())));
        run_env.insert("OUTPUT_DIR".to_string(), output_dir.clone());

        let logs_dir = self.bundle_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("create {}", logs_dir.display()))?;
        let logs = LogPaths::for_case(&logs_dir, &spec.id);
        let invocation = self.sandbox.bench_command(self.bench, &run_env)?;
        let hard_timeout = bench_timeout(&run_env);
        let eligible = self.sandbox.recovers_from_cache_corruption();
        let go_mod_cache = self.sandbox.caches().go_mod.clone();

        tracing::info!(case = spec.id.as_str(), "scenario started");
        let started_at = rfc3339(Utc::now());
        let start = Instant::now();

        let recovered = run_with_cache_recovery(
            |_| {
                let outcome =
                    self.launcher
                        .run_logged(&invocation, &logs.stdout, &logs.stderr, hard_timeout)?;
                let text = logs.read_combined();
                Ok((outcome, text))
            },
            |(outcome, text): &(ProcessOutcome, String)| {
                if outcome.success() {
                    AttemptVerdict::Success
                } else if eligible
                    && ErrorClass::CacheCorrupted.matches(&tail_lines(text.trim(), ERROR_SNIPPET_LINES))
                {
                    AttemptVerdict::CacheFailure
                } else {
                    AttemptVerdict::OtherFailure
                }
            },
            || reset_module_cache(&go_mod_cache),
        )?;
        let ((outcome, text), retries) = match recovered {
            RecoveryOutcome::Completed { outcome, retries } => (outcome, retries),
            RecoveryOutcome::CacheStillCorrupted { .. } => {
                return Err(HarnessError::Provisioning(format!(
                    "{}: module cache still corrupted after reset; see {}",
                    spec.id,
                    logs.stderr.display()
                ))
                .into())
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let summary_file = self
            .sandbox
            .project_root()
            .join(&output_dir_name)
            .join(SUMMARY_FILE_NAME);
        let summary = match load_summary(&summary_file) {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(case = spec.id.as_str(), error = %format!("{err:#}"), "ignoring unreadable summary");
                None
            }
        };
        let exit_code = outcome.exit_code_or_sentinel();
        let result = ExecutionResult {
            name: spec.id.clone(),
            started_at,
            ended_at: rfc3339(Utc::now()),
            duration_ms,
            exit_code,
            signal: outcome.signal.clone().unwrap_or_default(),
            timed_out: outcome.timed_out,
            command_line: invocation.command_line(),
            output_dir,
            summary_path: summary_file.is_file().then(|| summary_file.clone()),
            summary,
            retries,
            recovered_after_cache_reset: retries > 0 && outcome.success(),
            logs,
            error_snippet: (exit_code != 0).then(|| tail_lines(text.trim(), ERROR_SNIPPET_LINES)),
        };
        if result.succeeded() {
            tracing::info!(case = spec.id.as_str(), duration_ms, retries, "scenario finished");
        } else {
            tracing::info!(
                case = spec.id.as_str(),
                exit_code,
                duration_ms,
                retries,
                timed_out = result.timed_out,
                error_class = ?classify(&text),
                "scenario failed"
            );
        }
        Ok(result)
    }
}

/// The bench's own `TIMEOUT_MINUTES` plus a grace period for teardown.
fn bench_timeout(run_env: &BTreeMap<String, String>) -> Duration {
    let minutes = run_env
        .get("TIMEOUT_MINUTES")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(FALLBACK_BENCH_TIMEOUT_MINUTES);
    Duration::from_secs(
        minutes
            .saturating_add(BENCH_TIMEOUT_GRACE_MINUTES)
            .saturating_mul(60),
    )
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
