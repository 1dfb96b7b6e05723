//! End-to-end evidence run: readiness, provisioning, setup, checks, bundle.
//!
//! Stages run strictly in order and any fatal error aborts the invocation.
//! Scenario failures are not fatal; they only flip the verdict.
use crate::bundle::{bundle_dir, overall_pass, verdict_label, write_bundle, BundlePaths, EvidenceBundle};
use crate::chain::resolve_chain;
use crate::config::{EnvSnapshot, RunConfiguration};
use crate::credentials::{plan_prefunds, resolve_backup_key, run_prefunds};
use crate::error::HarnessError;
use crate::node::{resolve_healthy_node, HealthPolicy, NodeClient};
use crate::provision::{build_sandbox, prepare_image, provision_bench};
use crate::runner::process::Launcher;
use crate::runner::{CaseRunner, Sandbox};
use crate::scenario::{plan_checks, run_check};
use crate::util::{compact_stamp, display_path, rfc3339, short_id};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;

/// External seams for one invocation.
pub struct Services<'a> {
    pub node: &'a dyn NodeClient,
    pub launcher: &'a dyn Launcher,
    pub health: HealthPolicy,
}

#[derive(Debug)]
pub enum RunOutcome {
    PreflightPassed,
    Completed { overall_pass: bool, paths: BundlePaths },
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        match self {
            RunOutcome::PreflightPassed => true,
            RunOutcome::Completed { overall_pass, .. } => *overall_pass,
        }
    }
}

pub fn run(config: &RunConfiguration, env: &EnvSnapshot, services: &Services<'_>) -> Result<RunOutcome> {
    let candidates = config.node_candidates();
    let node = resolve_healthy_node(services.node, &candidates, &services.health)?;
    if node.url != config.node_url {
        println!("Node URL fallback: {} -> {}", config.node_url, node.url);
    }
    println!("Node URL: {}", node.url);
    tracing::info!(url = node.url.as_str(), endpoint = node.source.path(), "node ready");

    let chain = resolve_chain(
        services.node,
        &node.url,
        config.chain_id.as_deref(),
        &config.vm_ids,
    )?;
    println!("Chain ID: {} ({})", chain.chain_id, short_id(&chain.chain_id));
    println!("Chain discovery: {}", chain.strategy.as_str());

    if !config.pk_path.is_file() {
        return Err(HarnessError::ProvingKeyMissing(config.pk_path.clone()).into());
    }

    println!("Runner: {}", config.provision.runner.as_str());
    let sandbox = build_sandbox(config, env);
    if let Sandbox::Docker(docker) = &sandbox {
        let image = prepare_image(&config.provision, docker, services.launcher)?;
        println!(
            "Docker image: {} ({})",
            docker.image,
            if image.built { "built" } else { "reused" }
        );
        println!("Docker server: {}", image.server_version);
    }
    let bench = provision_bench(&config.provision, &sandbox, services.launcher)?;
    println!("zkbench exec: {bench}");

    let stamp = compact_stamp(Utc::now());
    let bundle_root = bundle_dir(&config.out_dir, &stamp);
    println!("Bundle dir: {}", display_path(&bundle_root, Some(&config.project_root)));

    // Preflight announces the bundle location but leaves the disk untouched.
    if config.preflight_only {
        println!("Preflight: PASS (node, chain, proving key, docker/image, zkbench prebuild)");
        return Ok(RunOutcome::PreflightPassed);
    }

    std::fs::create_dir_all(&bundle_root)
        .with_context(|| format!("create {}", bundle_root.display()))?;

    let base_env = base_env(config, env, &node.url, &chain.chain_id);
    let runner = CaseRunner {
        launcher: services.launcher,
        sandbox: &sandbox,
        bench: &bench,
        base_env: &base_env,
        bundle_dir: &bundle_root,
        bundle_stamp: &stamp,
    };

    let backup_key = resolve_backup_key(config, &sandbox, services.launcher)?;
    let prefunds = plan_prefunds(config, backup_key.as_deref())?;
    run_prefunds(&runner, &prefunds)?;

    let mut checks = Vec::new();
    for check in plan_checks(config, backup_key.as_deref()) {
        checks.push(run_check(&runner, config, &check)?);
    }

    let overall = overall_pass(&checks);
    let bundle = EvidenceBundle {
        generated_at: rfc3339(Utc::now()),
        node_url: node.url,
        chain_id: chain.chain_id,
        chain_discovery_strategy: chain.strategy,
        runner: config.provision.runner,
        docker_image: match &sandbox {
            Sandbox::Docker(docker) => Some(docker.image.clone()),
            Sandbox::Local(_) => None,
        },
        bench_exec: bench,
        pk_path: config.pk_path.clone(),
        discovered_chains: chain.discovered,
        overall_pass: overall,
        checks,
    };
    let paths = write_bundle(&bundle, &bundle_root, &config.project_root)?;

    println!();
    println!("Bundle JSON: {}", display_path(&paths.json, Some(&config.project_root)));
    println!("Bundle MD:   {}", display_path(&paths.markdown, Some(&config.project_root)));
    println!("Verdict:     {}", verdict_label(overall));
    Ok(RunOutcome::Completed {
        overall_pass: overall,
        paths,
    })
}

/// Host environment plus the variables every bench run shares.
fn base_env(
    config: &RunConfiguration,
    env: &EnvSnapshot,
    node_url: &str,
    chain_id: &str,
) -> BTreeMap<String, String> {
    let mut vars = env.vars().clone();
    let shared = [
        ("NODE_URL", node_url.to_string()),
        ("CHAIN_ID", chain_id.to_string()),
        ("TIMEOUT_MINUTES", config.timeout_minutes.to_string()),
        ("PRIVATE_KEY", config.keys.primary.clone()),
        ("PROOF_CONFIG_PRIVATE_KEY", config.keys.proof_config.clone()),
    ];
    vars.extend(shared.into_iter().map(|(key, value)| (key.to_string(), value)));
    vars
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
