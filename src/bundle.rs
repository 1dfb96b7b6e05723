//! Evidence bundle aggregation and rendering.
//!
//! The bundle is assembled in memory and written once, after every check has
//! run. A run that aborts earlier leaves only the per-case logs behind.
use crate::chain::DiscoveryStrategy;
use crate::config::RunnerMode;
use crate::evaluate::Evaluation;
use crate::node::BlockchainRow;
use crate::provision::BenchExec;
use crate::runner::ExecutionResult;
use crate::util::display_path;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

pub const BUNDLE_JSON: &str = "bundle.json";
pub const BUNDLE_MARKDOWN: &str = "bundle.md";

#[derive(Clone, Debug, Serialize)]
pub struct Attempt {
    pub run: ExecutionResult,
    pub evaluation: Evaluation,
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckRecord {
    pub id: String,
    pub required: bool,
    pub passed: bool,
    pub attempts: Vec<Attempt>,
}

impl CheckRecord {
    /// Passes only when there is at least one attempt and every attempt passed.
    pub fn from_attempts(id: &str, attempts: Vec<Attempt>) -> Self {
        let passed =
            !attempts.is_empty() && attempts.iter().all(|attempt| attempt.evaluation.pass);
        Self::required(id, passed, attempts)
    }

    /// Passes when any attempt passed.
    pub fn any_attempt(id: &str, attempts: Vec<Attempt>) -> Self {
        let passed = attempts.iter().any(|attempt| attempt.evaluation.pass);
        Self::required(id, passed, attempts)
    }

    fn required(id: &str, passed: bool, attempts: Vec<Attempt>) -> Self {
        Self {
            id: id.to_string(),
            required: true,
            passed,
            attempts,
        }
    }
}

/// AND of `passed` over required records; an empty set passes.
pub fn overall_pass(checks: &[CheckRecord]) -> bool {
    checks.iter().all(|check| !check.required || check.passed)
}

#[derive(Clone, Debug, Serialize)]
pub struct EvidenceBundle {
    pub generated_at: String,
    pub node_url: String,
    pub chain_id: String,
    pub chain_discovery_strategy: DiscoveryStrategy,
    pub runner: RunnerMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
    pub bench_exec: BenchExec,
    pub pk_path: PathBuf,
    pub discovered_chains: Vec<BlockchainRow>,
    pub overall_pass: bool,
    pub checks: Vec<CheckRecord>,
}

impl EvidenceBundle {
    /// Human-readable report; artifact paths are shown relative to `project_root`.
    pub fn render_markdown(&self, project_root: &Path) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# VEIL Launch-Gate Evidence Bundle");
        let _ = writeln!(out);
        let _ = writeln!(out, "- Generated: {}", self.generated_at);
        let _ = writeln!(out, "- Node URL: `{}`", self.node_url);
        let _ = writeln!(out, "- Chain ID: `{}`", self.chain_id);
        let _ = writeln!(out, "- Verdict: **{}**", verdict_label(self.overall_pass));
        let _ = writeln!(out);
        let _ = writeln!(out, "## Checks");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "| Check | Status | Duration (s) | Accepted | Rejected | Missed | Output Dir | Notes |"
        );
        let _ = writeln!(out, "|---|---|---:|---:|---:|---:|---|---|");
        for attempt in self.attempts() {
            let run = &attempt.run;
            let counters = run.counters().unwrap_or_default();
            let _ = writeln!(
                out,
                "| {} | {} | {:.1} | {} | {} | {} | `{}` | {} |",
                run.name,
                verdict_label(attempt.evaluation.pass),
                run.duration_ms as f64 / 1000.0,
                counters.accepted,
                counters.rejected,
                counters.missed,
                run.output_dir,
                escape_cell(&attempt.evaluation.reason)
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "## Artifacts");
        let _ = writeln!(out);
        for attempt in self.attempts() {
            let run = &attempt.run;
            let summary = run
                .summary_path
                .as_deref()
                .map(|path| format!("`{}`", display_path(path, Some(project_root))))
                .unwrap_or_else(|| "(none)".to_string());
            let _ = writeln!(out, "- {}", run.name);
            let _ = writeln!(out, "  - summary: {summary}");
            let _ = writeln!(
                out,
                "  - stdout: `{}`",
                display_path(&run.logs.stdout, Some(project_root))
            );
            let _ = writeln!(
                out,
                "  - stderr: `{}`",
                display_path(&run.logs.stderr, Some(project_root))
            );
        }
        out
    }

    fn attempts(&self) -> impl Iterator<Item = &Attempt> {
        self.checks.iter().flat_map(|check| check.attempts.iter())
    }
}

pub fn verdict_label(pass: bool) -> &'static str {
    if pass {
        "PASS"
    } else {
        "FAIL"
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// `<out>/<stamp>-launch-gate-evidence`.
pub fn bundle_dir(out_dir: &Path, stamp: &str) -> PathBuf {
    out_dir.join(format!("{stamp}-launch-gate-evidence"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundlePaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

/// Write `bundle.json` and `bundle.md` into `dir`.
pub fn write_bundle(bundle: &EvidenceBundle, dir: &Path, project_root: &Path) -> Result<BundlePaths> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let mut json = serde_json::to_string_pretty(bundle).context("serialize evidence bundle")?;
    json.push('\n');
    let paths = BundlePaths {
        json: dir.join(BUNDLE_JSON),
        markdown: dir.join(BUNDLE_MARKDOWN),
    };
    write_replacing(&paths.json, json.as_bytes())?;
    write_replacing(&paths.markdown, bundle.render_markdown(project_root).as_bytes())?;
    tracing::info!(
        dir = %dir.display(),
        checks = bundle.checks.len(),
        overall_pass = bundle.overall_pass,
        "bundle written"
    );
    Ok(paths)
}

fn write_replacing(dest: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("bundle");
    let tmp_path = dest
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, bytes).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, dest).with_context(|| format!("publish {}", dest.display()))?;
    Ok(())
}

#[cfg(test)]
#[path = "bundle_tests.rs"]
mod tests;
