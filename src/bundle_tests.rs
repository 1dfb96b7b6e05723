use super::*;
use crate::summary::SummaryCounters;

fn attempt(name: &str, pass: bool, reason: &str, counters: Option<SummaryCounters>) -> Attempt {
    Attempt {
        run: ExecutionResult::fixture(name, if pass { 0 } else { 1 }, counters, "boom"),
        evaluation: Evaluation {
            pass,
            reason: reason.to_string(),
        },
    }
}

fn bundle(checks: Vec<CheckRecord>) -> EvidenceBundle {
    EvidenceBundle {
        generated_at: "2026-01-01T00:05:00.000Z".to_string(),
        node_url: "http://127.0.0.1:9650".to_string(),
        chain_id: "2L5JL1ouyg4bVMaC4EvY3Fy7Lrhx2sDv6jaTmy7yk8oQBxMvy".to_string(),
        chain_discovery_strategy: DiscoveryStrategy::VmId,
        runner: RunnerMode::Local,
        docker_image: None,
        bench_exec: BenchExec::GoRun,
        pk_path: PathBuf::from("/work/veilvm/zk-fixture-new/groth16_shielded_ledger_pk.bin"),
        discovered_chains: Vec::new(),
        overall_pass: overall_pass(&checks),
        checks,
    }
}

#[test]
fn overall_is_and_over_required_checks() {
    let pass = CheckRecord::from_attempts("a", vec![attempt("a", true, "ok", None)]);
    let fail = CheckRecord::from_attempts("b", vec![attempt("b", false, "no", None)]);
    assert!(overall_pass(&[]));
    assert!(overall_pass(&[pass.clone()]));
    assert!(!overall_pass(&[pass.clone(), fail.clone()]));

    let mut optional = fail;
    optional.required = false;
    assert!(overall_pass(&[pass, optional]));
}

#[test]
fn record_aggregation_modes() {
    let mixed = || {
        vec![
            attempt("x-1", false, "no", None),
            attempt("x-2", true, "ok", None),
        ]
    };
    assert!(!CheckRecord::from_attempts("x", mixed()).passed);
    assert!(CheckRecord::any_attempt("x", mixed()).passed);
    assert!(!CheckRecord::from_attempts("x", Vec::new()).passed);
    assert!(!CheckRecord::any_attempt("x", Vec::new()).passed);
}

#[test]
fn markdown_has_header_table_and_artifacts() {
    let record = CheckRecord::from_attempts(
        "shielded-smoke",
        vec![attempt(
            "shielded-smoke",
            true,
            "accepted=1, rejected=0, missed=0",
            Some(SummaryCounters::new(1, 0, 0)),
        )],
    );
    let markdown = bundle(vec![record]).render_markdown(Path::new("/work/veilvm"));
    let lines: Vec<&str> = markdown.lines().collect();
    assert_eq!(lines[0], "# VEIL Launch-Gate Evidence Bundle");
    assert!(lines.contains(&"- Node URL: `http://127.0.0.1:9650`"));
    assert!(lines.contains(&"- Verdict: **PASS**"));
    assert!(lines.contains(
        &"| Check | Status | Duration (s) | Accepted | Rejected | Missed | Output Dir | Notes |"
    ));
    assert!(lines.contains(&"|---|---|---:|---:|---:|---:|---|---|"));
    assert!(lines.contains(
        &"| shielded-smoke | PASS | 12.3 | 1 | 0 | 0 | `./zkbench-out-evidence-20260101-000000-shielded-smoke` | accepted=1, rejected=0, missed=0 |"
    ));
    assert!(lines.contains(&"- shielded-smoke"));
    assert!(lines.contains(
        &"  - summary: `zkbench-out-evidence-20260101-000000-shielded-smoke/summary.json`"
    ));
    assert!(lines.contains(&"  - stdout: `bundle/logs/shielded-smoke.stdout.log`"));
}

#[test]
fn markdown_lists_every_attempt_and_escapes_pipes() {
    let record = CheckRecord::any_attempt(
        "timeout-drill",
        vec![
            attempt("timeout-drill-b8", false, "a | b", None),
            attempt("timeout-drill-b32", true, "ok", None),
        ],
    );
    let markdown = bundle(vec![record]).render_markdown(Path::new("/work/veilvm"));
    assert!(markdown.contains("| timeout-drill-b8 | FAIL | 12.3 | 0 | 0 | 0 |"));
    assert!(markdown.contains("a \\| b"));
    assert!(markdown.contains("| timeout-drill-b32 | PASS |"));
    assert!(markdown.contains("  - summary: (none)"));
}

#[test]
fn write_bundle_emits_json_and_markdown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bundle_dir = bundle_dir(dir.path(), "20260101-000500");
    assert!(bundle_dir.ends_with("20260101-000500-launch-gate-evidence"));

    let record = CheckRecord::from_attempts("synthetic-negative", vec![attempt("synthetic-negative", false, "unexpected process exit code 1", None)]);
    let evidence = bundle(vec![record]);
    let paths = write_bundle(&evidence, &bundle_dir, dir.path()).expect("write");

    let text = std::fs::read_to_string(&paths.json).expect("json");
    assert!(text.ends_with("}\n"));
    let value: serde_json::Value = serde_json::from_str(&text).expect("parse");
    assert_eq!(value["overall_pass"], false);
    assert_eq!(value["chain_discovery_strategy"], "vm-id");
    assert_eq!(value["runner"], "local");
    assert_eq!(value["bench_exec"]["mode"], "go-run");
    assert!(value.get("docker_image").is_none());
    assert_eq!(value["checks"][0]["attempts"][0]["run"]["exit_code"], 1);
    assert_eq!(
        value["checks"][0]["attempts"][0]["evaluation"]["reason"],
        "unexpected process exit code 1"
    );

    let markdown = std::fs::read_to_string(&paths.markdown).expect("md");
    assert!(markdown.contains("- Verdict: **FAIL**"));
    let leftovers: Vec<_> = std::fs::read_dir(&bundle_dir)
        .expect("read")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}
