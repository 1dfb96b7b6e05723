//! Subprocess supervision.
//!
//! Every child gets an explicit environment and a hard timeout. Long runs
//! stream straight into log files; short probes and builds are captured in
//! memory by reader threads so a chatty child can never block on a full pipe.
//!
//! On unix each child leads its own process group. A timeout signals the
//! whole group (SIGTERM, then SIGKILL after a short grace), so grandchildren
//! such as a `go run` binary die with the direct child, and then runs the
//! invocation's teardown command (for docker, removing the named container).
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const TERMINATE_GRACE: Duration = Duration::from_secs(2);
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully specified child process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Complete child environment; nothing is inherited implicitly.
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
    /// Run after the child was killed for exceeding its timeout.
    pub teardown: Option<Box<Invocation>>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: cwd.into(),
            teardown: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(key, value)| (key.clone(), value.clone())));
        self
    }

    pub fn on_timeout(mut self, teardown: Invocation) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    /// Shell-quoted rendering for logs and the bundle.
    pub fn command_line(&self) -> String {
        let program = self.program.display().to_string();
        shell_words::join(std::iter::once(program.as_str()).chain(self.args.iter().map(String::as_str)))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env_clear()
            .envs(&self.env)
            .current_dir(&self.cwd)
            .stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

/// How a supervised child ended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub timed_out: bool,
}

impl ProcessOutcome {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Exit code with `-1` standing in for "none" (signal or timeout).
    pub fn exit_code_or_sentinel(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }

    fn from_status(status: ExitStatus, timed_out: bool) -> Self {
        Self {
            exit_code: status.code(),
            signal: terminating_signal(&status),
            timed_out,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CapturedOutput {
    pub outcome: ProcessOutcome,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// stdout and stderr joined, for classification.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Seam between orchestration and real processes.
pub trait Launcher {
    /// Run to completion with stdout/stderr written to the given log files.
    fn run_logged(
        &self,
        invocation: &Invocation,
        stdout_log: &Path,
        stderr_log: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutcome>;

    /// Run to completion and capture output in memory.
    fn run_captured(&self, invocation: &Invocation, timeout: Duration) -> Result<CapturedOutput>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn run_logged(
        &self,
        invocation: &Invocation,
        stdout_log: &Path,
        stderr_log: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutcome> {
        let stdout = File::create(stdout_log)
            .with_context(|| format!("create {}", stdout_log.display()))?;
        let stderr = File::create(stderr_log)
            .with_context(|| format!("create {}", stderr_log.display()))?;
        let mut child = invocation
            .command()
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("spawn {}", invocation.program.display()))?;
        supervise(&mut child, timeout, invocation.teardown.as_deref())
    }

    fn run_captured(&self, invocation: &Invocation, timeout: Duration) -> Result<CapturedOutput> {
        let mut child = invocation
            .command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {}", invocation.program.display()))?;
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);
        let outcome = supervise(&mut child, timeout, invocation.teardown.as_deref())?;
        Ok(CapturedOutput {
            outcome,
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        })
    }
}

fn supervise(
    child: &mut Child,
    timeout: Duration,
    teardown: Option<&Invocation>,
) -> Result<ProcessOutcome> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("check child status")? {
            return Ok(ProcessOutcome::from_status(status, false));
        }
        if start.elapsed() >= timeout {
            tracing::warn!(
                pid = child.id(),
                timeout_secs = timeout.as_secs(),
                "child exceeded its hard timeout; terminating its process group"
            );
            let status = terminate(child)?;
            if let Some(teardown) = teardown {
                run_teardown(teardown);
            }
            return Ok(ProcessOutcome::from_status(status, true));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// SIGTERM the child's group, wait out the grace period, then SIGKILL
/// whatever is left of the group.
#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<ExitStatus> {
    let Ok(group) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return child.wait().context("reap timed-out child");
    };
    signal_group(group, libc::SIGTERM);
    let deadline = Instant::now() + TERMINATE_GRACE;
    let mut status = None;
    while Instant::now() < deadline {
        status = child.try_wait().context("check child status")?;
        if status.is_some() {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    signal_group(group, libc::SIGKILL);
    match status {
        Some(status) => Ok(status),
        None => child.wait().context("reap timed-out child"),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<ExitStatus> {
    let _ = child.kill();
    child.wait().context("reap timed-out child")
}

#[cfg(unix)]
fn signal_group(group: libc::pid_t, signal: libc::c_int) {
    // SAFETY: killpg only sends a signal; a group that already exited yields ESRCH.
    unsafe {
        libc::killpg(group, signal);
    }
}

fn run_teardown(teardown: &Invocation) {
    let outcome = teardown
        .command()
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn teardown")
        .and_then(|mut child| supervise(&mut child, TEARDOWN_TIMEOUT, None));
    match outcome {
        Ok(outcome) if outcome.success() => {}
        Ok(outcome) => tracing::warn!(
            command = teardown.command_line(),
            exit_code = outcome.exit_code_or_sentinel(),
            "teardown after timeout failed"
        ),
        Err(err) => tracing::warn!(
            command = teardown.command_line(),
            error = %format!("{err:#}"),
            "teardown after timeout failed"
        ),
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(signal_name)
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<String> {
    None
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    let name = match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGTERM => "SIGTERM",
        other => return format!("SIG{other}"),
    };
    name.to_string()
}
