//! Shared test infrastructure for integration tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

pub const VEIL_VM_ID: &str = "u9GgvekeunSwK4TPF4jj7xLsW1LKkd1Uv9VQZo2SGfrwkejsK";
pub const VEIL_CHAIN_ID: &str = "2L5JL1ouyg4bVMaC4EvY3Fy7Lrhx2sDv6jaTmy7yk8oQBxMvy";
pub const BACKUP_KEY: &str = "3333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333333c";

/// Loopback stand-in for an AvalancheGo node: healthy readiness endpoint and
/// a `platform.getBlockchains` listing with one VEIL chain.
pub struct FakeNode {
    pub url: String,
}

impl FakeNode {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake node");
        let url = format!("http://{}", listener.local_addr().expect("local addr"));
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let _ = serve(stream);
            }
        });
        Self { url }
    }
}

fn serve(stream: TcpStream) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let payload = match path {
        "/ext/health/readiness" | "/ext/health" => r#"{"healthy":true}"#.to_string(),
        "/ext/bc/P" => serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "blockchains": [
                { "id": "11111111111111111111111111111111LpoYY", "name": "X-Chain", "subnetID": "primary", "vmID": "avm" },
                { "id": VEIL_CHAIN_ID, "name": "VEIL", "subnetID": "veil-subnet", "vmID": VEIL_VM_ID },
            ]}
        })
        .to_string(),
        _ => String::from("{}"),
    };
    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        payload.len(),
        payload
    )?;
    stream.flush()
}

/// A project tree with a proving key and a scripted bench executable.
pub struct Project {
    pub dir: tempfile::TempDir,
}

impl Project {
    pub fn new(bench_script: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let project = dir.path().join("hypersdk/examples/veilvm");
        std::fs::create_dir_all(project.join("zk-fixture-new")).expect("mkdir project");
        std::fs::write(
            project.join("zk-fixture-new/groth16_shielded_ledger_pk.bin"),
            b"pk",
        )
        .expect("write pk");
        let bench = dir.path().join("zkbench.sh");
        std::fs::write(&bench, bench_script).expect("write bench");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bench, std::fs::Permissions::from_mode(0o755))
                .expect("chmod bench");
        }
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("hypersdk/examples/veilvm")
    }

    pub fn bench(&self) -> PathBuf {
        self.dir.path().join("zkbench.sh")
    }

    pub fn bundles(&self) -> PathBuf {
        self.root().join("evidence-bundles")
    }
}

/// The harness binary with a scrubbed environment; only `PATH` survives.
pub fn harness(cwd: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_launch-gate-evidence"));
    command.env_clear().current_dir(cwd).env("RUST_LOG", "warn");
    if let Some(path) = std::env::var_os("PATH") {
        command.env("PATH", path);
    }
    command
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
