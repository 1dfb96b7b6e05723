//! `docker run` construction for the isolated runner.
//!
//! The workspace root is mounted at `/workspace` and the module/build caches
//! at their Go defaults. Forwarded variables are passed as bare `-e NAME`
//! flags with values carried in the docker CLI's own environment, so signer
//! keys never appear in recorded command lines.
//!
//! Containers run with `--init` under a per-invocation name; a run killed for
//! exceeding its timeout is followed by `docker rm -f <name>`.
use crate::error::HarnessError;
use crate::provision::CacheDirs;
use crate::runner::process::Invocation;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const CONTAINER_WORKSPACE: &str = "/workspace";
const CONTAINER_GO_MOD: &str = "/go/pkg/mod";
const CONTAINER_GO_BUILD: &str = "/root/.cache/go-build";
const GO_PATH_PRELUDE: &str = "export PATH=/usr/local/go/bin:$PATH";
const DOCKER_HOST_ALIAS: &str = "host.docker.internal";

static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Bench contract variables copied into the container when set.
pub const FORWARDED_ENV: [&str; 23] = [
    "NODE_URL",
    "CHAIN_ID",
    "PROOF_MODE",
    "PROOF_CIRCUIT_ID",
    "BATCH_SIZES",
    "WINDOWS_PER_SIZE",
    "BATCH_WINDOW_MS",
    "PROOF_DEADLINE_MS",
    "TIMEOUT_MINUTES",
    "OUTPUT_DIR",
    "GROTH16_PK_PATH",
    "PRIVATE_KEY",
    "REFUEL_PRIVATE_KEY",
    "PROVER_AUTHORITY_PRIVATE_KEY",
    "PROOF_CONFIG_PRIVATE_KEY",
    "PROOF_TAMPER_MODE",
    "GROTH16_CCS_CACHE_PATH",
    "STRICT_FEE_PREFLIGHT",
    "GAS_SAFETY_BPS",
    "GAS_RESERVE",
    "REFUEL_AMOUNT",
    "PROOF_SUBMIT_DELAY_MS",
    "PREFUND_ONLY",
];

#[derive(Clone, Debug)]
pub struct DockerSandbox {
    pub program: PathBuf,
    pub image: String,
    pub workspace_root: PathBuf,
    pub project_root: PathBuf,
    pub caches: CacheDirs,
    /// Environment of the docker CLI process itself.
    pub host_env: BTreeMap<String, String>,
}

impl DockerSandbox {
    /// Map a host path under the workspace root to its container path.
    pub fn container_path(&self, host_path: &Path) -> Result<String, HarnessError> {
        to_container_path(&self.workspace_root, host_path)
    }

    /// A docker CLI call outside any container (`version`, `image inspect`, `build`).
    pub fn cli<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(&self.program, &self.project_root)
            .args(args)
            .envs(&self.host_env)
    }

    /// Run `script` under `bash -lc` in the image with the Go toolchain on PATH.
    pub fn shell(&self, script: &str) -> Result<Invocation, HarnessError> {
        let (prefix, name) = self.run_prefix()?;
        Ok(self
            .cli(prefix)
            .args([
                self.image.clone(),
                "bash".to_string(),
                "-lc".to_string(),
                format!("{GO_PATH_PRELUDE} && {script}"),
            ])
            .on_timeout(self.remove_container(&name)))
    }

    /// A bench run, either a prebuilt binary (host path) or `go run`.
    pub fn bench(
        &self,
        run_env: &BTreeMap<String, String>,
        binary: Option<&Path>,
    ) -> Result<Invocation, HarnessError> {
        let forwarded = self.forwarded_env(run_env)?;
        let (mut args, name) = self.run_prefix()?;
        for key in forwarded.keys() {
            args.push("-e".to_string());
            args.push(key.clone());
        }
        args.push(self.image.clone());
        match binary {
            Some(path) => args.push(self.container_path(path)?),
            None => args.extend([
                "bash".to_string(),
                "-lc".to_string(),
                format!("{GO_PATH_PRELUDE} && go run ./cmd/veilvm-zkbench"),
            ]),
        }
        Ok(self
            .cli(args)
            .envs(&forwarded)
            .on_timeout(self.remove_container(&name)))
    }

    fn remove_container(&self, name: &str) -> Invocation {
        self.cli(["rm", "-f", name])
    }

    fn forwarded_env(
        &self,
        run_env: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, HarnessError> {
        let mut forwarded = BTreeMap::new();
        for key in FORWARDED_ENV {
            let Some(value) = run_env.get(key).filter(|value| !value.trim().is_empty()) else {
                continue;
            };
            let value = match key {
                "NODE_URL" => docker_reachable_url(value),
                "GROTH16_PK_PATH" => self.container_path(&self.project_root.join(value))?,
                _ => value.clone(),
            };
            forwarded.insert(key.to_string(), value);
        }
        Ok(forwarded)
    }

    /// `docker run` flags shared by every container, plus the container name.
    fn run_prefix(&self) -> Result<(Vec<String>, String), HarnessError> {
        let workdir = self.container_path(&self.project_root)?;
        let name = format!(
            "veilvm-evidence-{}-{}",
            std::process::id(),
            CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--init".into(),
            "--name".into(),
            name.clone(),
        ];
        for (host, container) in [
            (self.workspace_root.as_path(), CONTAINER_WORKSPACE),
            (self.caches.go_mod.as_path(), CONTAINER_GO_MOD),
            (self.caches.go_build.as_path(), CONTAINER_GO_BUILD),
        ] {
            args.push("-v".into());
            args.push(format!("{}:{container}", host.display()));
        }
        args.extend(["-w".into(), workdir]);
        for pair in [
            "CGO_ENABLED=1".to_string(),
            format!("GOMODCACHE={CONTAINER_GO_MOD}"),
            format!("GOCACHE={CONTAINER_GO_BUILD}"),
        ] {
            args.push("-e".into());
            args.push(pair);
        }
        Ok((args, name))
    }
}

pub fn to_container_path(workspace_root: &Path, host_path: &Path) -> Result<String, HarnessError> {
    let relative = host_path.strip_prefix(workspace_root).map_err(|_| {
        HarnessError::Provisioning(format!(
            "path is outside the workspace root and cannot be mounted: {}",
            host_path.display()
        ))
    })?;
    let mut container = String::from(CONTAINER_WORKSPACE);
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                container.push('/');
                container.push_str(&part.to_string_lossy());
            }
            Component::CurDir => {}
            _ => {
                return Err(HarnessError::Provisioning(format!(
                    "path is outside the workspace root and cannot be mounted: {}",
                    host_path.display()
                )))
            }
        }
    }
    Ok(container)
}

/// Origin of `url` with loopback hosts replaced by the docker host alias.
/// Unparseable values pass through untouched.
pub fn docker_reachable_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.is_empty() {
        return url.to_string();
    }
    let (host, port) = split_host_port(authority);
    let host = match host.to_ascii_lowercase().as_str() {
        "127.0.0.1" | "localhost" | "[::1]" => DOCKER_HOST_ALIAS.to_string(),
        _ => host.to_string(),
    };
    match port {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    }
}

fn split_host_port(authority: &str) -> (&str, Option<&str>) {
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => {
                let port = authority[end + 1..].strip_prefix(':');
                (&authority[..=end], port)
            }
            None => (authority, None),
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    }
}
