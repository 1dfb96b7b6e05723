//! Bench executable provisioning.
//!
//! In docker mode the daemon is probed, the runner image is inspected (and
//! built when missing), and the bench is compiled inside the image against
//! bind-mounted module/build caches. In local mode the host toolchain is used
//! directly. Either way the bench is compiled once per invocation unless the
//! caller supplies a binary or opts into `go run`.
use crate::classify::ErrorClass;
use crate::config::{EnvSnapshot, ProvisionSettings, RunConfiguration, RunnerMode};
use crate::error::HarnessError;
use crate::recovery::{reset_module_cache, run_with_cache_recovery, AttemptVerdict, RecoveryOutcome};
use crate::runner::docker::DockerSandbox;
use crate::runner::process::{CapturedOutput, Invocation, Launcher};
use crate::runner::{LocalToolchain, Sandbox};
use crate::util::tail_lines;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const DOCKER_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const IMAGE_BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const PREBUILD_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const DIAGNOSTIC_TAIL_LINES: usize = 80;
const WINDOWS_DOCKER_FALLBACK: &str = r"C:\Program Files\Docker\Docker\resources\bin\docker.exe";
const BENCH_PACKAGE: &str = "./cmd/veilvm-zkbench";
const CONTAINER_BINARY_NAME: &str = "veilvm-zkbench-linux-amd64";

/// Module, build, and binary caches under `<project>/.cache/evidence-zkbench`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheDirs {
    pub go_mod: PathBuf,
    pub go_build: PathBuf,
    pub bin: PathBuf,
}

impl CacheDirs {
    pub fn under(root: &Path) -> Self {
        Self {
            go_mod: root.join("go-mod"),
            go_build: root.join("go-build"),
            bin: root.join("bin"),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.go_mod, &self.go_build, &self.bin] {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// How scenarios invoke the bench.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum BenchExec {
    Binary {
        path: PathBuf,
        recovered_after_cache_reset: bool,
    },
    GoRun,
}

impl BenchExec {
    pub fn binary_path(&self) -> Option<&Path> {
        match self {
            BenchExec::Binary { path, .. } => Some(path),
            BenchExec::GoRun => None,
        }
    }
}

impl fmt::Display for BenchExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchExec::Binary {
                path,
                recovered_after_cache_reset: true,
            } => write!(f, "binary ({}, recovered after cache reset)", path.display()),
            BenchExec::Binary { path, .. } => write!(f, "binary ({})", path.display()),
            BenchExec::GoRun => write!(f, "go run {BENCH_PACKAGE}"),
        }
    }
}

/// Container runtime facts gathered while preparing the image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageStatus {
    pub server_version: String,
    pub built: bool,
}

/// Build the execution sandbox for the configured runner mode.
pub fn build_sandbox(config: &RunConfiguration, env: &EnvSnapshot) -> Sandbox {
    let caches = CacheDirs::under(&config.cache_root());
    let host_env = env.vars().clone();
    match config.provision.runner {
        RunnerMode::Docker => Sandbox::Docker(DockerSandbox {
            program: locate_docker(env, &config.project_root),
            image: config.provision.docker_image.clone(),
            workspace_root: config.workspace_root.clone(),
            project_root: config.project_root.clone(),
            caches,
            host_env,
        }),
        RunnerMode::Local => Sandbox::Local(LocalToolchain {
            go: locate_program("go", env, &config.project_root)
                .unwrap_or_else(|| PathBuf::from("go")),
            project_root: config.project_root.clone(),
            caches,
            host_env,
        }),
    }
}

fn locate_program(name: &str, env: &EnvSnapshot, cwd: &Path) -> Option<PathBuf> {
    which::which_in(name, env.get("PATH"), cwd).ok()
}

/// `docker` on PATH, then the Docker Desktop install location on Windows.
pub fn locate_docker(env: &EnvSnapshot, cwd: &Path) -> PathBuf {
    if let Some(path) = locate_program("docker", env, cwd) {
        return path;
    }
    let fallback = PathBuf::from(WINDOWS_DOCKER_FALLBACK);
    if cfg!(windows) && fallback.is_file() {
        return fallback;
    }
    PathBuf::from("docker")
}

/// Probe the daemon, then make sure the runner image exists.
pub fn prepare_image(
    settings: &ProvisionSettings,
    sandbox: &DockerSandbox,
    launcher: &dyn Launcher,
) -> Result<ImageStatus> {
    let server_version = probe_container_runtime(sandbox, launcher)?;

    let inspect = launcher.run_captured(
        &sandbox.cli(["image", "inspect", sandbox.image.as_str()]),
        DOCKER_PROBE_TIMEOUT,
    )?;
    if inspect.outcome.success() {
        tracing::info!(image = sandbox.image.as_str(), "docker image present");
        return Ok(ImageStatus {
            server_version,
            built: false,
        });
    }
    if settings.skip_image_build {
        return Err(HarnessError::Image(format!(
            "docker image not found: {} (build it or drop --skip-image-build)",
            sandbox.image
        ))
        .into());
    }
    if !settings.dockerfile.is_file() {
        return Err(HarnessError::Image(format!(
            "dockerfile not found: {}",
            settings.dockerfile.display()
        ))
        .into());
    }

    let context_dir = settings
        .dockerfile
        .parent()
        .unwrap_or(sandbox.project_root.as_path())
        .display()
        .to_string();
    let build = sandbox.cli([
        "build".to_string(),
        "-f".to_string(),
        settings.dockerfile.display().to_string(),
        "-t".to_string(),
        sandbox.image.clone(),
        context_dir,
    ]);
    println!("Building docker image {}...", sandbox.image);
    let start = Instant::now();
    let output = launcher.run_captured(&build, IMAGE_BUILD_TIMEOUT)?;
    if !output.outcome.success() {
        return Err(HarnessError::Image(format!(
            "docker image build failed (exit={}){}",
            output.outcome.exit_code_or_sentinel(),
            diagnostic_tail(&output)
        ))
        .into());
    }
    tracing::info!(
        image = sandbox.image.as_str(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "docker image built"
    );
    Ok(ImageStatus {
        server_version,
        built: true,
    })
}

fn probe_container_runtime(sandbox: &DockerSandbox, launcher: &dyn Launcher) -> Result<String> {
    let probe = sandbox.cli(["version", "--format", "{{.Server.Version}}"]);
    let output = match launcher.run_captured(&probe, DOCKER_PROBE_TIMEOUT) {
        Ok(output) => output,
        Err(err) => {
            return Err(HarnessError::ContainerRuntime {
                detail: format!("{err:#}"),
            }
            .into())
        }
    };
    let server_version = output.stdout.trim().to_string();
    if !output.outcome.success() || server_version.is_empty() {
        let detail = if output.outcome.timed_out {
            format!("docker version timed out after {}s", DOCKER_PROBE_TIMEOUT.as_secs())
        } else {
            output.combined().trim().to_string()
        };
        return Err(HarnessError::ContainerRuntime { detail }.into());
    }
    Ok(server_version)
}

/// Resolve the bench executable, compiling it when needed.
pub fn provision_bench(
    settings: &ProvisionSettings,
    sandbox: &Sandbox,
    launcher: &dyn Launcher,
) -> Result<BenchExec> {
    if let Some(path) = &settings.bench_binary {
        if !path.is_file() {
            return Err(HarnessError::Provisioning(format!(
                "bench binary not found: {}",
                path.display()
            ))
            .into());
        }
        return Ok(BenchExec::Binary {
            path: path.clone(),
            recovered_after_cache_reset: false,
        });
    }
    if settings.skip_prebuild {
        return Ok(BenchExec::GoRun);
    }

    let caches = sandbox.caches();
    caches.ensure()?;
    let (binary, invocation) = prebuild_invocation(sandbox)?;
    let eligible = sandbox.recovers_from_cache_corruption();
    println!("Prebuilding zkbench into {}...", binary.display());
    let start = Instant::now();

    let recovered = run_with_cache_recovery(
        |_| launcher.run_captured(&invocation, PREBUILD_TIMEOUT),
        |output: &CapturedOutput| {
            if output.outcome.success() {
                AttemptVerdict::Success
            } else if eligible && ErrorClass::CacheCorrupted.matches(&output.combined()) {
                AttemptVerdict::CacheFailure
            } else {
                AttemptVerdict::OtherFailure
            }
        },
        || reset_module_cache(&caches.go_mod),
    )?;

    let (output, retries) = match recovered {
        RecoveryOutcome::Completed { outcome, retries } => (outcome, retries),
        RecoveryOutcome::CacheStillCorrupted { outcome, .. } => {
            return Err(HarnessError::Provisioning(format!(
                "zkbench prebuild failed after module cache reset (exit={}){}",
                outcome.outcome.exit_code_or_sentinel(),
                diagnostic_tail(&outcome)
            ))
            .into())
        }
    };
    if !output.outcome.success() {
        return Err(HarnessError::Provisioning(format!(
            "zkbench prebuild failed (exit={}){}",
            output.outcome.exit_code_or_sentinel(),
            diagnostic_tail(&output)
        ))
        .into());
    }
    if !binary.is_file() {
        return Err(HarnessError::Provisioning(format!(
            "zkbench prebuild produced no binary at {}",
            binary.display()
        ))
        .into());
    }
    tracing::info!(
        binary = %binary.display(),
        retries,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "zkbench prebuilt"
    );
    Ok(BenchExec::Binary {
        path: binary,
        recovered_after_cache_reset: retries > 0,
    })
}

fn prebuild_invocation(sandbox: &Sandbox) -> Result<(PathBuf, Invocation), HarnessError> {
    match sandbox {
        Sandbox::Docker(docker) => {
            let binary = docker.caches.bin.join(CONTAINER_BINARY_NAME);
            let target = docker.container_path(&binary)?;
            let script = shell_words::join(["go", "build", "-o", target.as_str(), BENCH_PACKAGE]);
            Ok((binary, docker.shell(&script)?))
        }
        Sandbox::Local(local) => {
            let name = if cfg!(windows) {
                "veilvm-zkbench.exe"
            } else {
                "veilvm-zkbench"
            };
            let binary = local.caches.bin.join(name);
            let invocation = local.go([
                "build".to_string(),
                "-o".to_string(),
                binary.display().to_string(),
                BENCH_PACKAGE.to_string(),
            ]);
            Ok((binary, invocation))
        }
    }
}

fn diagnostic_tail(output: &CapturedOutput) -> String {
    let tail = tail_lines(output.combined().trim(), DIAGNOSTIC_TAIL_LINES);
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n{tail}")
    }
}

#[cfg(test)]
#[path = "provision_tests.rs"]
mod tests;
