//! Process runner - launches external tools and captures their output
//!
//! Every external invocation (cmake, the compiler-under-test, the native
//! compiler, generated programs) goes through [`ProcessRunner`]:
//! - stdout and stderr are drained on reader threads while the child runs
//! - an optional deadline kills the child's whole process group
//! - the child is always reaped, whatever the outcome
//!
//! Failures are reported through [`ExecutionStatus`] rather than `Err`, so
//! callers branch on the status instead of unwinding.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// How often a timed child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long reader threads may keep draining after a normal exit.
///
/// A grandchild that inherited the pipes can keep them open after the child
/// exits; past this grace period the output collected so far is used.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Drain grace after a timeout kill (the group is already dead).
const DRAIN_GRACE_AFTER_KILL: Duration = Duration::from_millis(250);

// ============================================================================
// Command
// ============================================================================

/// An external command to execute.
///
/// Built with consuming `with_*`/`arg` methods and handed to the runner by
/// reference; the runner never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl Command {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Run the command from `dir` instead of the harness's working directory.
    pub fn with_cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set an environment variable for the child only.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn to_std(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.env);
        cmd
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={} ", key, shell_quote(value))?;
        }
        write!(f, "{}", shell_quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ':' | ',' | '+'));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

// ============================================================================
// Execution result
// ============================================================================

/// Terminal status of an external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The process ran to completion (any exit code).
    Completed,
    /// The deadline passed and the process group was killed.
    TimedOut,
    /// The program could not be spawned (missing, not executable, ...).
    LaunchFailed(String),
}

/// Result of running a [`Command`].
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// `None` when the process never launched or was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal on Unix.
    pub signal: Option<i32>,
    /// stdout decoded lossily, for display
    pub stdout: String,
    pub stderr: String,
    /// stdout exactly as the process wrote it
    pub raw_stdout: Vec<u8>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    fn launch_failed(message: String, elapsed: Duration) -> Self {
        Self {
            status: ExecutionStatus::LaunchFailed(message),
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: String::new(),
            raw_stdout: Vec::new(),
            elapsed,
        }
    }

    /// True iff the process completed with exit code 0.
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Completed && self.exit_code == Some(0)
    }

    pub fn timed_out(&self) -> bool {
        self.status == ExecutionStatus::TimedOut
    }

    /// Short human-readable reason for a failure, `None` on success.
    pub fn failure_reason(&self) -> Option<String> {
        if self.succeeded() {
            return None;
        }
        Some(match (&self.status, self.exit_code, self.signal) {
            (ExecutionStatus::LaunchFailed(msg), _, _) => format!("failed to launch: {}", msg),
            (ExecutionStatus::TimedOut, _, _) => format!("timed out after {:.2}s", self.elapsed.as_secs_f64()),
            (ExecutionStatus::Completed, Some(code), _) => format!("exited with code {}", code),
            (ExecutionStatus::Completed, None, Some(sig)) => format!("terminated by signal {}", sig),
            (ExecutionStatus::Completed, None, None) => "terminated abnormally".to_string(),
        })
    }

    /// stdout followed by stderr, for build logs.
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Launches commands, optionally echoing them the way the build scripts did.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner {
    /// Print `Executing: <cmd>` to stderr before each launch.
    pub echo: bool,
}

impl ProcessRunner {
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }

    fn announce(&self, cmd: &Command) {
        tracing::debug!(command = %cmd, timeout = ?cmd.timeout, "executing");
        if self.echo {
            eprintln!("Executing: {}", cmd);
        }
    }

    /// Run with stdout/stderr captured.
    pub fn run(&self, cmd: &Command) -> ExecutionResult {
        self.announce(cmd);
        let start = Instant::now();

        // Only a deadline needs its own group; otherwise the child stays in
        // ours and receives terminal signals such as Ctrl-C with the harness.
        let grouped = cmd.timeout.is_some();
        let mut std_cmd = cmd.to_std();
        std_cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if grouped {
            set_process_group(&mut std_cmd);
        }

        let mut child = match std_cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ExecutionResult::launch_failed(e.to_string(), start.elapsed()),
        };

        let stdout = child.stdout.take().map(Drain::spawn);
        let stderr = child.stderr.take().map(Drain::spawn);

        let (status, timed_out) = match wait_with_deadline(&mut child, cmd.timeout) {
            Ok(Some(status)) => (Some(status), false),
            Ok(None) => {
                kill_process_tree(&mut child, grouped);
                (child.wait().ok(), true)
            }
            Err(e) => {
                kill_process_tree(&mut child, grouped);
                let _ = child.wait();
                return ExecutionResult::launch_failed(format!("wait failed: {}", e), start.elapsed());
            }
        };
        let elapsed = start.elapsed();

        let grace = if timed_out { DRAIN_GRACE_AFTER_KILL } else { DRAIN_GRACE };
        let raw_stdout = stdout.map(|d| d.finish(grace)).unwrap_or_default();
        let stderr = stderr.map(|d| d.finish(grace)).unwrap_or_default();

        let (exit_code, signal) = status.map(exit_parts).unwrap_or((None, None));
        if timed_out {
            tracing::warn!(command = %cmd, "process timed out and was killed");
        }

        ExecutionResult {
            status: if timed_out {
                ExecutionStatus::TimedOut
            } else {
                ExecutionStatus::Completed
            },
            exit_code,
            signal,
            stdout: String::from_utf8_lossy(&raw_stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            raw_stdout,
            elapsed,
        }
    }

    /// Run with inherited stdio, so output streams straight to the terminal.
    ///
    /// The captured text fields of the result are empty.
    pub fn run_inherited(&self, cmd: &Command) -> ExecutionResult {
        self.announce(cmd);
        let start = Instant::now();

        let mut std_cmd = cmd.to_std();
        std_cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        let grouped = cmd.timeout.is_some();
        if grouped {
            set_process_group(&mut std_cmd);
        }

        let mut child = match std_cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ExecutionResult::launch_failed(e.to_string(), start.elapsed()),
        };

        let (status, timed_out) = match wait_with_deadline(&mut child, cmd.timeout) {
            Ok(Some(status)) => (Some(status), false),
            Ok(None) => {
                kill_process_tree(&mut child, grouped);
                (child.wait().ok(), true)
            }
            Err(e) => {
                kill_process_tree(&mut child, grouped);
                let _ = child.wait();
                return ExecutionResult::launch_failed(format!("wait failed: {}", e), start.elapsed());
            }
        };

        let (exit_code, signal) = status.map(exit_parts).unwrap_or((None, None));
        ExecutionResult {
            status: if timed_out {
                ExecutionStatus::TimedOut
            } else {
                ExecutionStatus::Completed
            },
            exit_code,
            signal,
            stdout: String::new(),
            stderr: String::new(),
            raw_stdout: Vec::new(),
            elapsed: start.elapsed(),
        }
    }
}

/// Background reader for one child pipe.
///
/// Bytes are appended to a shared buffer as they arrive, so whatever was
/// read before a kill is still available.
struct Drain {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl Drain {
    fn spawn<R: Read + Send + 'static>(mut pipe: R) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        let mut guard = match sink.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        guard.extend_from_slice(&chunk[..n]);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = tx.send(());
        });
        Self { buffer, done }
    }

    fn finish(self, grace: Duration) -> Vec<u8> {
        if self.done.recv_timeout(grace).is_err() {
            tracing::debug!("output pipe still open after grace period; using partial output");
        }
        let guard = match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }
}

/// Wait for the child, giving up at the deadline (`Ok(None)`).
fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn set_process_group(cmd: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn set_process_group(_cmd: &mut std::process::Command) {}

/// Kill the child, and its whole process group when it leads one.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child, grouped: bool) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if grouped {
        if let Ok(pid) = i32::try_from(child.id()) {
            if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                tracing::debug!(%err, pid, "killpg failed");
            }
        }
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child, _grouped: bool) {
    let _ = child.kill();
}

#[cfg(unix)]
fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}
