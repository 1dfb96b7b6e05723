//! Run configuration resolution.
//!
//! The process environment is captured once into an [`EnvSnapshot`] and merged
//! with parsed flags here; every other component receives the resolved
//! [`RunConfiguration`] by reference and never reads ambient state.
use crate::cli::EvidenceArgs;
use crate::error::HarnessError;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const DEFAULT_NODE_URL: &str = "http://127.0.0.1:9660";
pub const FALLBACK_NODE_URL: &str = "http://127.0.0.1:9650";
pub const VEIL_VM_ID: &str = "u9GgvekeunSwK4TPF4jj7xLsW1LKkd1Uv9VQZo2SGfrwkejsK";
pub const DEFAULT_PK_PATH: &str = "./zk-fixture-new/groth16_shielded_ledger_pk.bin";
pub const DEFAULT_DOCKER_IMAGE: &str = "veilvm-zkbench-evidence:local";
pub const DEFAULT_DOCKERFILE_REL: &str = "scripts/zkbench-runner.Dockerfile";
pub const DEFAULT_PREFUND_AMOUNT: u64 = 35_000_001;
pub const DEFAULT_BENCH_PRIVATE_KEY: &str = "637404e6722a0e55a27fd82dcd29f3f0faa6f13d930f32f759e3b8412c4956aeee9d3919f004304c2d44dbc9121f6559fefb9b9c25daec749b0f18f605614461";

const DEFAULT_BATCH_SIZE: &str = "8";
const DEFAULT_WINDOWS_PER_SIZE: &str = "1";
const DEFAULT_TIMEOUT_MINUTES: &str = "20";
const DEFAULT_TIMEOUT_BATCHES: &str = "8,32";

/// Environment variables captured at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Trimmed, non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(parse_bool)
    }

    /// Full variable set, inherited by local subprocesses.
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvSnapshot {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Where zkbench (and its build) runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerMode {
    Docker,
    Local,
}

impl RunnerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerMode::Docker => "docker",
            RunnerMode::Local => "local",
        }
    }

    fn parse(raw: &str) -> Result<Self, HarnessError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(RunnerMode::Docker),
            "local" => Ok(RunnerMode::Local),
            other => Err(HarnessError::config(format!(
                "invalid --runner value: {other} (expected docker|local)"
            ))),
        }
    }
}

/// Signer keys, validated as 128 hex chars.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
    pub primary: String,
    pub proof_config: String,
    pub faucet: Option<String>,
    /// Absent means "generate one" when the takeover drill runs.
    pub backup: Option<String>,
}

/// Which drills run in this invocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScenarioToggles {
    pub skip_negative: bool,
    pub skip_malformed: bool,
    pub skip_backup_takeover: bool,
    pub skip_timeout: bool,
    pub skip_prefund_backup: bool,
}

/// How the bench executable is provisioned.
#[derive(Clone, Debug)]
pub struct ProvisionSettings {
    pub runner: RunnerMode,
    pub docker_image: String,
    pub dockerfile: PathBuf,
    pub skip_image_build: bool,
    pub skip_prebuild: bool,
    pub bench_binary: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct RunConfiguration {
    pub node_url: String,
    pub node_url_explicit: bool,
    pub chain_id: Option<String>,
    pub vm_ids: Vec<String>,
    pub project_root: PathBuf,
    pub workspace_root: PathBuf,
    pub pk_path: PathBuf,
    pub out_dir: PathBuf,
    pub batch_size: u64,
    pub windows_per_size: u64,
    pub timeout_minutes: u64,
    pub timeout_batches: Vec<u64>,
    pub prefund_amount: u64,
    pub keys: KeyMaterial,
    pub toggles: ScenarioToggles,
    pub provision: ProvisionSettings,
    pub preflight_only: bool,
}

impl RunConfiguration {
    /// Merge flags, environment, and defaults into a validated configuration.
    ///
    /// Relative `--out-dir` values resolve against `cwd`; the proving key and
    /// dockerfile resolve against the project root.
    pub fn resolve(
        args: &EvidenceArgs,
        env: &EnvSnapshot,
        cwd: &Path,
    ) -> Result<Self, HarnessError> {
        let env_node_url = env.get("NODE_URL");
        let (node_url, node_url_explicit) = match (args.node_url.as_deref(), env_node_url) {
            (Some(flag), _) => (flag.trim().to_string(), true),
            (None, Some(value)) => (value.to_string(), true),
            (None, None) => (DEFAULT_NODE_URL.to_string(), false),
        };
        let node_url = node_url.trim_end_matches('/').to_string();
        if node_url.is_empty() {
            return Err(HarnessError::config("invalid --node-url: empty"));
        }

        let chain_id = pick(args.chain_id.as_deref(), env, "CHAIN_ID").map(str::to_string);

        let project_root = absolutize(
            cwd,
            &pick_path(args.project_root.as_ref(), env, "VEIL_EVIDENCE_PROJECT_ROOT")
                .unwrap_or_else(|| cwd.to_path_buf()),
        );
        let workspace_root = match pick_path(
            args.workspace_root.as_ref(),
            env,
            "VEIL_EVIDENCE_WORKSPACE_ROOT",
        ) {
            Some(path) => absolutize(cwd, &path),
            None => default_workspace_root(&project_root),
        };
        let pk_path = absolutize(
            &project_root,
            &pick_path(args.pk_path.as_ref(), env, "GROTH16_PK_PATH")
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PK_PATH)),
        );
        let out_dir = absolutize(
            cwd,
            &pick_path(args.out_dir.as_ref(), env, "VEIL_EVIDENCE_OUT_DIR")
                .unwrap_or_else(|| project_root.join("evidence-bundles")),
        );

        let batch_size = parse_positive(
            args.batch_size,
            env,
            "VEIL_EVIDENCE_BATCH_SIZE",
            DEFAULT_BATCH_SIZE,
        )?;
        let windows_per_size = parse_positive(
            args.windows_per_size,
            env,
            "VEIL_EVIDENCE_WINDOWS_PER_SIZE",
            DEFAULT_WINDOWS_PER_SIZE,
        )?;
        let timeout_minutes = parse_positive(
            args.timeout_minutes,
            env,
            "VEIL_EVIDENCE_TIMEOUT_MINUTES",
            DEFAULT_TIMEOUT_MINUTES,
        )?;
        let prefund_default = DEFAULT_PREFUND_AMOUNT.to_string();
        let prefund_amount = parse_positive(
            args.prefund_amount,
            env,
            "VEIL_EVIDENCE_PREFUND_AMOUNT",
            &prefund_default,
        )?;
        let timeout_batches = parse_batch_list(
            pick(
                args.timeout_batches.as_deref(),
                env,
                "VEIL_EVIDENCE_TIMEOUT_BATCHES",
            )
            .unwrap_or(DEFAULT_TIMEOUT_BATCHES),
        )?;

        let vm_ids: Vec<String> = pick(args.vm_ids.as_deref(), env, "VEIL_EVIDENCE_VM_IDS")
            .unwrap_or(VEIL_VM_ID)
            .split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if vm_ids.is_empty() {
            return Err(HarnessError::config("invalid --vm-ids: empty list"));
        }

        let keys = KeyMaterial {
            primary: require_private_key_hex(
                "primary private key",
                pick(args.private_key.as_deref(), env, "PRIVATE_KEY")
                    .unwrap_or(DEFAULT_BENCH_PRIVATE_KEY),
            )?,
            proof_config: require_private_key_hex(
                "proof-config private key",
                pick(
                    args.proof_config_private_key.as_deref(),
                    env,
                    "VEIL_EVIDENCE_PROOF_CONFIG_PRIVATE_KEY",
                )
                .unwrap_or(DEFAULT_BENCH_PRIVATE_KEY),
            )?,
            faucet: pick(
                args.faucet_private_key.as_deref(),
                env,
                "VEIL_EVIDENCE_FAUCET_PRIVATE_KEY",
            )
            .map(|key| require_private_key_hex("faucet private key", key))
            .transpose()?,
            backup: pick(
                args.backup_private_key.as_deref(),
                env,
                "VEIL_EVIDENCE_BACKUP_PRIVATE_KEY",
            )
            .map(|key| require_private_key_hex("backup private key", key))
            .transpose()?,
        };

        let toggles = ScenarioToggles {
            skip_negative: args.skip_negative || env.flag("VEIL_EVIDENCE_SKIP_NEGATIVE"),
            skip_malformed: args.skip_malformed || env.flag("VEIL_EVIDENCE_SKIP_MALFORMED"),
            skip_backup_takeover: args.skip_backup_takeover
                || env.flag("VEIL_EVIDENCE_SKIP_BACKUP_TAKEOVER"),
            skip_timeout: args.skip_timeout || env.flag("VEIL_EVIDENCE_SKIP_TIMEOUT"),
            skip_prefund_backup: args.skip_prefund_backup
                || env.flag("VEIL_EVIDENCE_SKIP_PREFUND_BACKUP"),
        };

        let runner = RunnerMode::parse(
            pick(args.runner.as_deref(), env, "VEIL_EVIDENCE_RUNNER").unwrap_or("docker"),
        )?;
        let skip_prebuild =
            args.skip_zkbench_prebuild || env.flag("VEIL_EVIDENCE_SKIP_ZKBENCH_PREBUILD");
        let bench_binary = pick_path(args.bench_binary.as_ref(), env, "VEIL_EVIDENCE_BENCH_BINARY")
            .map(|path| absolutize(cwd, &path));
        if skip_prebuild && bench_binary.is_some() {
            return Err(HarnessError::config(
                "--bench-binary cannot be combined with --skip-zkbench-prebuild",
            ));
        }
        let provision = ProvisionSettings {
            runner,
            docker_image: pick(args.docker_image.as_deref(), env, "VEIL_EVIDENCE_DOCKER_IMAGE")
                .unwrap_or(DEFAULT_DOCKER_IMAGE)
                .to_string(),
            dockerfile: absolutize(
                &project_root,
                &pick_path(args.dockerfile.as_ref(), env, "VEIL_EVIDENCE_DOCKERFILE")
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCKERFILE_REL)),
            ),
            skip_image_build: args.skip_image_build || env.flag("VEIL_EVIDENCE_SKIP_IMAGE_BUILD"),
            skip_prebuild,
            bench_binary,
        };

        Ok(RunConfiguration {
            node_url,
            node_url_explicit,
            chain_id,
            vm_ids,
            project_root,
            workspace_root,
            pk_path,
            out_dir,
            batch_size,
            windows_per_size,
            timeout_minutes,
            timeout_batches,
            prefund_amount,
            keys,
            toggles,
            provision,
            preflight_only: args.preflight_only || env.flag("VEIL_EVIDENCE_PREFLIGHT_ONLY"),
        })
    }

    /// Node candidates in probe order.
    pub fn node_candidates(&self) -> Vec<String> {
        let mut candidates = vec![self.node_url.clone()];
        if !self.node_url_explicit && self.node_url == DEFAULT_NODE_URL {
            candidates.push(FALLBACK_NODE_URL.to_string());
        }
        candidates
    }

    /// Shared module/build cache root (`<project>/.cache/evidence-zkbench`).
    pub fn cache_root(&self) -> PathBuf {
        self.project_root.join(".cache").join("evidence-zkbench")
    }
}

/// `1/true/yes/on`, case-insensitive; anything else is false.
pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn parse_positive_int(raw: &str, name: &str) -> Result<u64, HarnessError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(HarnessError::config(format!("invalid {name}: {raw}"))),
    }
}

/// Parse a comma list of positive batch sizes; drops invalid entries and
/// duplicates while keeping first-seen order.
pub fn parse_batch_list(raw: &str) -> Result<Vec<u64>, HarnessError> {
    let mut batches: Vec<u64> = Vec::new();
    for value in raw
        .split(',')
        .filter_map(|entry| entry.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
    {
        if !batches.contains(&value) {
            batches.push(value);
        }
    }
    if batches.is_empty() {
        return Err(HarnessError::config(format!(
            "invalid timeout batch list: {raw}"
        )));
    }
    Ok(batches)
}

pub fn is_private_key_hex(value: &str) -> bool {
    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    let re = KEY_RE.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{128}$").expect("valid key regex"));
    re.is_match(value.trim())
}

pub fn require_private_key_hex(name: &str, value: &str) -> Result<String, HarnessError> {
    if !is_private_key_hex(value) {
        return Err(HarnessError::config(format!("{name} must be 128 hex chars")));
    }
    Ok(value.trim().to_string())
}

fn pick<'a>(flag: Option<&'a str>, env: &'a EnvSnapshot, key: &str) -> Option<&'a str> {
    flag.map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| env.get(key))
}

fn pick_path(flag: Option<&PathBuf>, env: &EnvSnapshot, key: &str) -> Option<PathBuf> {
    flag.cloned().or_else(|| env.get(key).map(PathBuf::from))
}

fn parse_positive(
    flag: Option<u64>,
    env: &EnvSnapshot,
    env_key: &str,
    default: &str,
) -> Result<u64, HarnessError> {
    match flag {
        Some(value) => Ok(value),
        None => parse_positive_int(env.get(env_key).unwrap_or(default), env_key),
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn default_workspace_root(project_root: &Path) -> PathBuf {
    project_root
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_root.to_path_buf())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
