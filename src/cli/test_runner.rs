//! Golden test runner entry point (pytest-style output)
//!
//! ## TestReporter Implementations
//!
//! - [`ConsoleReporter`]: live PASSED/FAILED lines, a FAILURES section with
//!   expected and actual output in full, and a summary bar
//! - [`JsonReporter`]: one JSON object per event (JSON Lines) for CI tooling

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;

use crate::backend::ProcessRunner;
use crate::harness::pipeline::{Pipeline, TestCase, TestOutcome, Toolchain};
use crate::harness::suite::{SuiteOptions, SuiteReport, TestReporter, run_suite};

use super::{CliError, CliResult, ExitCode, ReportFormat};

/// Resolved `test` subcommand options.
#[derive(Debug, Clone)]
pub struct TestRunOptions {
    pub path: PathBuf,
    pub extension: String,
    pub work_dir: PathBuf,
    pub filter: Option<String>,
    pub stop_on_fail: bool,
    pub verbose: bool,
    pub run_timeout: Duration,
    pub stage_timeout: Option<Duration>,
    pub keep_artifacts: bool,
    pub format: ReportFormat,
}

/// Run the golden suite with an already-built compiler.
pub fn run_tests(
    compiler: &Path,
    native_cc: &Path,
    native_flags: Vec<String>,
    runner: ProcessRunner,
    options: &TestRunOptions,
) -> CliResult<ExitCode> {
    let pipeline = Pipeline::new(Toolchain::new(compiler, native_cc).with_native_flags(native_flags))
        .with_runner(runner)
        .with_run_timeout(options.run_timeout)
        .with_stage_timeout(options.stage_timeout)
        .with_keep_artifacts(options.keep_artifacts);

    let suite = SuiteOptions::new(&options.path, &options.work_dir)
        .with_extension(options.extension.clone())
        .with_filter(options.filter.clone())
        .with_stop_on_fail(options.stop_on_fail);

    let mut reporter: Box<dyn TestReporter> = match options.format {
        ReportFormat::Human => Box::new(ConsoleReporter::new(options.verbose, io::stdout().is_terminal())),
        ReportFormat::Json => Box::new(JsonReporter::new(io::stdout())),
    };

    let report = run_suite(&suite, &pipeline, reporter.as_mut()).map_err(|e| CliError::failure(e.to_string()))?;

    if report.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        // Summary already printed
        Err(CliError::new("", ExitCode(report.exit_code())))
    }
}

// ============================================================================
// Console reporter
// ============================================================================

/// ANSI styling, or nothing when output is not a terminal.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    fn green(&self, text: &str) -> String {
        self.paint("32", text)
    }

    fn red(&self, text: &str) -> String {
        self.paint("31", text)
    }

    fn bold(&self, text: &str) -> String {
        self.paint("1", text)
    }
}

/// Default console reporter (pytest-style)
pub struct ConsoleReporter {
    pub verbose: bool,
    palette: Palette,
}

impl ConsoleReporter {
    pub fn new(verbose: bool, color: bool) -> Self {
        Self {
            verbose,
            palette: Palette::new(color),
        }
    }
}

impl TestReporter for ConsoleReporter {
    fn on_collection_complete(&mut self, test_count: usize) {
        println!("{}", self.palette.bold("=================== golden test session starts ==================="));
        println!("collected {} item(s)", test_count);
        println!();
    }

    fn on_test_start(&mut self, case: &TestCase) {
        if self.verbose {
            println!("{} ({} expected line(s))", case.source.display(), case.expected_lines.len());
        }
    }

    fn on_test_complete(&mut self, outcome: &TestOutcome) {
        println!("{}", render_status_line(outcome, self.verbose, self.palette));
    }

    fn on_run_complete(&mut self, report: &SuiteReport) {
        if report.failed() > 0 {
            println!();
            println!("{}", self.palette.red("=================== FAILURES ==================="));
            for outcome in report.failures() {
                println!();
                print!("{}", render_failure(outcome, self.palette));
            }
        }
        println!();
        println!("{}", render_summary(report, self.palette));
    }
}

/// `name PASSED` / `name FAILED (reason)`, with timing when verbose.
pub fn render_status_line(outcome: &TestOutcome, verbose: bool, palette: Palette) -> String {
    let mut line = if outcome.passed() {
        format!("{} {}", outcome.name, palette.green("PASSED"))
    } else {
        format!("{} {} ({})", outcome.name, palette.red("FAILED"), outcome.status)
    };
    if verbose {
        line.push_str(&format!(" [{}ms]", outcome.elapsed.as_millis()));
    }
    line
}

/// Full diagnostic block for a failed case.
pub fn render_failure(outcome: &TestOutcome, palette: Palette) -> String {
    let mut out = String::new();
    out.push_str(&palette.bold(&format!("___________ {} ___________", outcome.name)));
    out.push('\n');
    out.push_str(&format!("status: {}\n", outcome.status));
    out.push_str(&format!("source: {}\n", outcome.source.display()));
    out.push_str("--- expected ---\n");
    push_block(&mut out, &outcome.expected);
    out.push_str("--- actual ---\n");
    push_block(&mut out, &outcome.actual);
    if !outcome.stderr.trim().is_empty() {
        out.push_str("--- stderr ---\n");
        push_block(&mut out, &outcome.stderr);
    }
    if !outcome.retained.is_empty() {
        out.push_str("artifacts kept:\n");
        for path in &outcome.retained {
            out.push_str(&format!("  {}\n", path.display()));
        }
    }
    out
}

fn push_block(out: &mut String, text: &str) {
    if text.is_empty() {
        out.push_str("<empty>\n");
        return;
    }
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push_str("\n\\ No newline at end of output\n");
    }
}

/// `===== 2 passed, 1 failed in 0.42s =====`
pub fn render_summary(report: &SuiteReport, palette: Palette) -> String {
    let mut parts = Vec::new();
    if report.passed() > 0 {
        parts.push(format!("{} passed", report.passed()));
    }
    if report.failed() > 0 {
        parts.push(format!("{} failed", report.failed()));
    }
    if parts.is_empty() {
        parts.push("no tests ran".to_string());
    }
    let bar = format!(
        "=================== {} in {:.2}s ===================",
        parts.join(", "),
        report.duration.as_secs_f64()
    );
    if report.success() { palette.green(&bar) } else { palette.red(&bar) }
}

// ============================================================================
// JSON reporter
// ============================================================================

/// Emits one JSON object per line.
pub struct JsonReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, value: serde_json::Value) {
        if let Err(e) = writeln!(self.out, "{}", value) {
            tracing::warn!(error = %e, "failed to write report event");
        }
    }
}

impl<W: Write> TestReporter for JsonReporter<W> {
    fn on_collection_complete(&mut self, test_count: usize) {
        self.emit(json!({ "type": "collected", "count": test_count }));
    }

    fn on_test_complete(&mut self, outcome: &TestOutcome) {
        let retained: Vec<String> = outcome.retained.iter().map(|p| p.display().to_string()).collect();
        self.emit(json!({
            "type": "case",
            "name": outcome.name,
            "source": outcome.source.display().to_string(),
            "status": outcome.status.tag(),
            "passed": outcome.passed(),
            "detail": outcome.status.to_string(),
            "expected": outcome.expected,
            "actual": outcome.actual,
            "stderr": outcome.stderr,
            "elapsed_ms": outcome.elapsed.as_millis() as u64,
            "retained": retained,
        }));
    }

    fn on_run_complete(&mut self, report: &SuiteReport) {
        self.emit(json!({
            "type": "summary",
            "passed": report.passed(),
            "failed": report.failed(),
            "success": report.success(),
            "duration_ms": report.duration.as_millis() as u64,
        }));
    }
}
