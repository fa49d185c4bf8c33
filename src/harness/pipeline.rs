//! Per-case golden test pipeline
//!
//! 1. compiler-under-test: `<compiler> <source> <intermediate>`
//! 2. native compiler: `<cc> [flags..] <intermediate> -o <executable>`
//! 3. execute `<executable>` under a timeout
//! 4. compare stdout byte-for-byte with the expected text
//!
//! Each stage runs only if the previous one succeeded. Artifacts are deleted
//! when the case passes and kept (with their paths reported) when it fails.

use std::env::consts::EXE_SUFFIX;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::backend::process::{Command, ExecutionResult, ProcessRunner};

use super::expect::{expected_text, load_expectations};

/// Extension of the intermediate C++ emitted by the compiler-under-test.
pub const INTERMEDIATE_EXT: &str = "cpp";

/// Default bound on a generated program's run time.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Test case
// ============================================================================

/// A single golden test: one annotated source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Display name (source file stem)
    pub name: String,
    pub source: PathBuf,
    /// Where the compiler-under-test writes its output
    pub intermediate: PathBuf,
    /// Where the native compiler writes the executable
    pub executable: PathBuf,
    pub expected_lines: Vec<String>,
}

impl TestCase {
    /// Build a case whose artifacts live in `work_dir`, named after the source stem.
    pub fn new(source: &Path, work_dir: &Path, expected_lines: Vec<String>) -> Self {
        let name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let intermediate = work_dir.join(format!("{}.{}", name, INTERMEDIATE_EXT));
        let executable = work_dir.join(format!("{}{}", name, EXE_SUFFIX));
        Self {
            name,
            source: source.to_path_buf(),
            intermediate,
            executable,
            expected_lines,
        }
    }

    /// Read `source` and extract its `// expect:` lines.
    pub fn load(source: &Path, work_dir: &Path) -> io::Result<Self> {
        let lines = load_expectations(source)?;
        Ok(Self::new(source, work_dir, lines))
    }

    /// The stdout a passing program must produce.
    pub fn expected(&self) -> String {
        expected_text(&self.expected_lines)
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Classification of a finished case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseStatus {
    Passed,
    /// The compiler-under-test failed
    BuildFailed(String),
    /// The native compiler rejected the intermediate output
    NativeCompileFailed(String),
    /// The generated program exceeded the run timeout and was killed
    TimedOut(Duration),
    /// The generated program crashed, exited nonzero or failed to launch
    RuntimeFailed(String),
    /// The program ran but printed the wrong thing
    OutputMismatch,
}

impl CaseStatus {
    pub fn is_pass(&self) -> bool {
        matches!(self, CaseStatus::Passed)
    }

    /// Stable machine-readable tag.
    pub fn tag(&self) -> &'static str {
        match self {
            CaseStatus::Passed => "passed",
            CaseStatus::BuildFailed(_) => "build_failed",
            CaseStatus::NativeCompileFailed(_) => "native_compile_failed",
            CaseStatus::TimedOut(_) => "timed_out",
            CaseStatus::RuntimeFailed(_) => "runtime_failed",
            CaseStatus::OutputMismatch => "output_mismatch",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::Passed => write!(f, "passed"),
            CaseStatus::BuildFailed(reason) => write!(f, "compiler-under-test failed: {}", reason),
            CaseStatus::NativeCompileFailed(reason) => write!(f, "native compile failed: {}", reason),
            CaseStatus::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs_f64()),
            CaseStatus::RuntimeFailed(reason) => write!(f, "program failed: {}", reason),
            CaseStatus::OutputMismatch => write!(f, "output mismatch"),
        }
    }
}

/// Result of running one [`TestCase`].
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: String,
    pub source: PathBuf,
    pub status: CaseStatus,
    pub expected: String,
    /// stdout of the generated program (empty if it never ran)
    pub actual: String,
    /// Diagnostic output of the stage that decided the outcome
    pub stderr: String,
    pub elapsed: Duration,
    /// Artifact paths left on disk for inspection
    pub retained: Vec<PathBuf>,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.status.is_pass()
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// The two external compilers a case is pushed through.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// The compiler-under-test
    pub compiler: PathBuf,
    /// C++ compiler for the intermediate output
    pub native_compiler: PathBuf,
    /// Extra arguments placed before the intermediate path
    pub native_flags: Vec<String>,
}

impl Toolchain {
    pub fn new(compiler: impl Into<PathBuf>, native_compiler: impl Into<PathBuf>) -> Self {
        Self {
            compiler: compiler.into(),
            native_compiler: native_compiler.into(),
            native_flags: Vec::new(),
        }
    }

    pub fn with_native_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.native_flags = flags.into_iter().map(Into::into).collect();
        self
    }
}

/// Runs cases through a [`Toolchain`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub toolchain: Toolchain,
    pub runner: ProcessRunner,
    /// Bound on the generated program
    pub run_timeout: Duration,
    /// Bound on the two compiler stages (unbounded by default)
    pub stage_timeout: Option<Duration>,
    /// Keep artifacts even for passing cases
    pub keep_artifacts: bool,
}

impl Pipeline {
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            toolchain,
            runner: ProcessRunner::default(),
            run_timeout: DEFAULT_RUN_TIMEOUT,
            stage_timeout: None,
            keep_artifacts: false,
        }
    }

    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }

    /// Run one case to completion. Never fails; every problem is a [`CaseStatus`].
    #[tracing::instrument(skip_all, fields(case = %case.name))]
    pub fn run_case(&self, case: &TestCase) -> TestOutcome {
        let start = Instant::now();
        let expected = case.expected();
        let (status, actual, stderr) = self.run_stages(case, &expected);

        let retained = if status.is_pass() && !self.keep_artifacts {
            remove_artifact(&case.intermediate);
            remove_artifact(&case.executable);
            Vec::new()
        } else {
            if !status.is_pass() {
                tracing::warn!(status = status.tag(), "case failed; keeping artifacts");
            }
            vec![case.intermediate.clone(), case.executable.clone()]
        };

        TestOutcome {
            name: case.name.clone(),
            source: case.source.clone(),
            status,
            expected,
            actual,
            stderr,
            elapsed: start.elapsed(),
            retained,
        }
    }

    fn run_stages(&self, case: &TestCase, expected: &str) -> (CaseStatus, String, String) {
        // Leftovers from an earlier failed run must not stand in for this run's output.
        remove_artifact(&case.intermediate);
        remove_artifact(&case.executable);

        let compile = Command::new(&self.toolchain.compiler)
            .arg(&case.source)
            .arg(&case.intermediate)
            .with_timeout(self.stage_timeout);
        let result = self.runner.run(&compile);
        if let Some(reason) = result.failure_reason() {
            return (CaseStatus::BuildFailed(reason), String::new(), result.combined_output());
        }
        if !case.intermediate.is_file() {
            return (
                CaseStatus::BuildFailed(format!("no output written to {}", case.intermediate.display())),
                String::new(),
                result.combined_output(),
            );
        }

        let native = Command::new(&self.toolchain.native_compiler)
            .args(&self.toolchain.native_flags)
            .arg(&case.intermediate)
            .arg("-o")
            .arg(&case.executable)
            .with_timeout(self.stage_timeout);
        let result = self.runner.run(&native);
        if let Some(reason) = result.failure_reason() {
            return (
                CaseStatus::NativeCompileFailed(reason),
                String::new(),
                result.combined_output(),
            );
        }
        if !case.executable.is_file() {
            return (
                CaseStatus::NativeCompileFailed(format!(
                    "no executable written to {}",
                    case.executable.display()
                )),
                String::new(),
                result.combined_output(),
            );
        }

        let run = Command::new(&case.executable).with_timeout(Some(self.run_timeout));
        let result = self.runner.run(&run);
        let status = classify_run(&result, self.run_timeout, expected);
        (status, result.stdout, result.stderr)
    }
}

fn classify_run(result: &ExecutionResult, limit: Duration, expected: &str) -> CaseStatus {
    if result.timed_out() {
        return CaseStatus::TimedOut(limit);
    }
    if let Some(reason) = result.failure_reason() {
        return CaseStatus::RuntimeFailed(reason);
    }
    if result.raw_stdout == expected.as_bytes() {
        CaseStatus::Passed
    } else {
        CaseStatus::OutputMismatch
    }
}

fn remove_artifact(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact"),
    }
}
