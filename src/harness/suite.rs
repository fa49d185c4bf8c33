//! Test suite driver - discovery, per-case execution and aggregation
//!
//! Cases run one after another in lexical file-name order. A failing case
//! never stops the suite unless exit-first was requested; the only state
//! shared between cases is the read-only [`Pipeline`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

use super::pipeline::{CaseStatus, Pipeline, TestCase, TestOutcome};

/// Default extension of golden test sources.
pub const DEFAULT_TEST_EXT: &str = "cns";

/// Errors that stop the suite before any case runs.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("failed to discover tests in {}: {source}", .path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no `.{ext}` test files found in {}", .path.display())]
    NoTests { path: PathBuf, ext: String },

    #[error("cannot create work directory {}: {source}", .path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Reporter boundary
// ============================================================================

/// Receives suite progress; implementations decide the output format.
pub trait TestReporter {
    /// Called before the test path is scanned
    fn on_discovery_start(&mut self, _path: &Path) {}

    /// Called once the cases to run are known
    fn on_collection_complete(&mut self, test_count: usize);

    /// Called before a case's pipeline starts
    fn on_test_start(&mut self, _case: &TestCase) {}

    /// Called when a case resolves
    fn on_test_complete(&mut self, outcome: &TestOutcome);

    /// Called with the final report
    fn on_run_complete(&mut self, report: &SuiteReport);
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct SilentReporter;

impl TestReporter for SilentReporter {
    fn on_collection_complete(&mut self, _test_count: usize) {}
    fn on_test_complete(&mut self, _outcome: &TestOutcome) {}
    fn on_run_complete(&mut self, _report: &SuiteReport) {}
}

// ============================================================================
// Options and report
// ============================================================================

#[derive(Debug, Clone)]
pub struct SuiteOptions {
    /// Test directory, or a single test file
    pub path: PathBuf,
    /// Test source extension, without the dot
    pub extension: String,
    /// Directory for intermediate and executable artifacts
    pub work_dir: PathBuf,
    /// Only run cases whose name contains this substring
    pub filter: Option<String>,
    /// Stop after the first failing case
    pub stop_on_fail: bool,
}

impl SuiteOptions {
    pub fn new(path: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extension: DEFAULT_TEST_EXT.to_string(),
            work_dir: work_dir.into(),
            filter: None,
            stop_on_fail: false,
        }
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = ext.into();
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_stop_on_fail(mut self, stop: bool) -> Self {
        self.stop_on_fail = stop;
        self
    }
}

/// Aggregated result of a suite run.
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub outcomes: Vec<TestOutcome>,
    pub duration: Duration,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }

    /// True iff no case failed.
    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    /// Process exit code: 0 iff every case passed.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Test sources in `path` with extension `ext`, sorted by file name.
///
/// `path` may also name a single test file.
pub fn discover_test_files(path: &Path, ext: &str) -> io::Result<Vec<PathBuf>> {
    let has_ext = |p: &Path| p.extension().is_some_and(|e| e == ext);

    if path.is_file() {
        return Ok(if has_ext(path) { vec![path.to_path_buf()] } else { Vec::new() });
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_file() && has_ext(&entry_path) {
            files.push(entry_path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Run every discovered case through `pipeline`.
#[tracing::instrument(skip_all, fields(path = %options.path.display()))]
pub fn run_suite(
    options: &SuiteOptions,
    pipeline: &Pipeline,
    reporter: &mut dyn TestReporter,
) -> Result<SuiteReport, TestError> {
    let start = Instant::now();
    reporter.on_discovery_start(&options.path);

    let files = discover_test_files(&options.path, &options.extension).map_err(|source| TestError::Discovery {
        path: options.path.clone(),
        source,
    })?;
    if files.is_empty() {
        return Err(TestError::NoTests {
            path: options.path.clone(),
            ext: options.extension.clone(),
        });
    }

    let selected: Vec<PathBuf> = files
        .into_iter()
        .filter(|f| match &options.filter {
            Some(keyword) => f
                .file_stem()
                .is_some_and(|stem| stem.to_string_lossy().contains(keyword.as_str())),
            None => true,
        })
        .collect();

    fs::create_dir_all(&options.work_dir).map_err(|source| TestError::WorkDir {
        path: options.work_dir.clone(),
        source,
    })?;

    reporter.on_collection_complete(selected.len());
    tracing::info!(count = selected.len(), "running golden tests");

    let mut report = SuiteReport::default();
    for source in &selected {
        let outcome = match TestCase::load(source, &options.work_dir) {
            Ok(case) => {
                reporter.on_test_start(&case);
                pipeline.run_case(&case)
            }
            Err(e) => unreadable_outcome(source, &options.work_dir, &e),
        };
        reporter.on_test_complete(&outcome);

        let stop = options.stop_on_fail && !outcome.passed();
        report.outcomes.push(outcome);
        if stop {
            break;
        }
    }

    report.duration = start.elapsed();
    reporter.on_run_complete(&report);
    Ok(report)
}

fn unreadable_outcome(source: &Path, work_dir: &Path, err: &io::Error) -> TestOutcome {
    let case = TestCase::new(source, work_dir, Vec::new());
    TestOutcome {
        name: case.name,
        source: case.source,
        status: CaseStatus::BuildFailed(format!("cannot read test source: {}", err)),
        expected: String::new(),
        actual: String::new(),
        stderr: String::new(),
        elapsed: Duration::ZERO,
        retained: Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::harness::pipeline::Toolchain;

    #[test]
    fn test_discovery_is_sorted_and_filtered_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.cns", "a.cns", "c.txt", "10.cns"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested.cns")).unwrap();

        let files = discover_test_files(dir.path(), "cns").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["10.cns", "a.cns", "b.cns"]);
    }

    #[test]
    fn test_discovery_accepts_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only.cns");
        fs::write(&file, "").unwrap();
        assert_eq!(discover_test_files(&file, "cns").unwrap(), vec![file.clone()]);
        assert!(discover_test_files(&file, "txt").unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_is_a_discovery_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = SuiteOptions::new(dir.path().join("missing"), dir.path().join("work"));
        let pipeline = Pipeline::new(Toolchain::new("chtholly", "c++"));
        let err = run_suite(&options, &pipeline, &mut SilentReporter).unwrap_err();
        assert!(matches!(err, TestError::Discovery { .. }));
    }

    #[test]
    fn test_empty_directory_has_no_tests() {
        let dir = tempfile::tempdir().unwrap();
        let options = SuiteOptions::new(dir.path(), dir.path().join("work"));
        let pipeline = Pipeline::new(Toolchain::new("chtholly", "c++"));
        let err = run_suite(&options, &pipeline, &mut SilentReporter).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("no `.cns` test files found in {}", dir.path().display())
        );
    }

    #[test]
    fn test_empty_report_is_success() {
        let report = SuiteReport::default();
        assert!(report.success());
        assert_eq!(report.exit_code(), 0);
    }
}
