use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod bundle;
mod chain;
mod classify;
mod cli;
mod config;
mod credentials;
mod error;
mod evaluate;
mod node;
mod orchestrator;
mod provision;
mod recovery;
mod runner;
mod scenario;
mod summary;
mod util;

use cli::EvidenceArgs;
use config::{EnvSnapshot, RunConfiguration};
use error::HarnessError;
use node::{HealthPolicy, HttpNodeClient};
use orchestrator::Services;
use runner::process::SystemLauncher;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = match EvidenceArgs::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("EVIDENCE BUNDLE FAILED: {}", usage_error_line(&err));
            return ExitCode::FAILURE;
        }
    };
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            if let Some(kind) = err.downcast_ref::<HarnessError>() {
                tracing::debug!(?kind, "run aborted");
            }
            eprintln!("EVIDENCE BUNDLE FAILED: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// First line of a clap error without its `error: ` prefix.
fn usage_error_line(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let line = rendered.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).trim().to_string()
}

fn run(args: &EvidenceArgs) -> Result<bool> {
    let env = EnvSnapshot::from_process();
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let config = RunConfiguration::resolve(args, &env, &cwd)?;
    let node = HttpNodeClient::new();
    let services = Services {
        node: &node,
        launcher: &SystemLauncher,
        health: HealthPolicy::default(),
    };
    let outcome = orchestrator::run(&config, &env, &services)?;
    Ok(outcome.passed())
}
