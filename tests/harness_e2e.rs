//! End-to-end tests for the golden harness
//!
//! These use stand-in tools instead of the real compiler:
//! - compiler-under-test: `cp <source> <intermediate>`
//! - native compiler: `sh -c 'cp "$0" "$2" && chmod +x "$2"'`
//!
//! so a test "source" is a shell script annotated with `// expect:` comments.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chtholly_harness::harness::suite::SilentReporter;
use chtholly_harness::harness::{CaseStatus, Pipeline, SuiteOptions, TestCase, Toolchain, run_suite};
use chtholly_harness::locate;

const INSTALL_SCRIPT: &str = r#"cp "$0" "$2" && chmod +x "$2""#;

fn toolchain() -> Toolchain {
    Toolchain::new("cp", "sh").with_native_flags(["-c", INSTALL_SCRIPT])
}

fn write_source(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    path
}

fn work_dir(root: &Path) -> PathBuf {
    let dir = root.join("work");
    fs::create_dir_all(&dir).unwrap();
    dir
}

const HELLO: &str = "echo 3       # // expect: 3\necho hello   # // expect: hello\n";

#[test]
fn test_matching_output_passes_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let work = work_dir(dir.path());
    let source = write_source(dir.path(), "hello.cns", HELLO);
    let case = TestCase::load(&source, &work).unwrap();

    let outcome = Pipeline::new(toolchain()).run_case(&case);

    assert_eq!(outcome.status, CaseStatus::Passed, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.expected, "3\nhello\n");
    assert_eq!(outcome.actual, "3\nhello\n");
    assert!(outcome.retained.is_empty());
    assert!(!case.intermediate.exists());
    assert!(!case.executable.exists());
}

#[test]
fn test_mismatch_fails_and_keeps_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let work = work_dir(dir.path());
    let source = write_source(
        dir.path(),
        "hello.cns",
        "echo 3   # // expect: 3\necho hi   # // expect: hello\n",
    );
    let case = TestCase::load(&source, &work).unwrap();

    let outcome = Pipeline::new(toolchain()).run_case(&case);

    assert_eq!(outcome.status, CaseStatus::OutputMismatch);
    assert_eq!(outcome.expected, "3\nhello\n");
    assert_eq!(outcome.actual, "3\nhi\n");
    assert_eq!(outcome.retained, vec![case.intermediate.clone(), case.executable.clone()]);
    assert!(case.intermediate.exists());
    assert!(case.executable.exists());
}

#[test]
fn test_keep_artifacts_retains_passing_case() {
    let dir = tempfile::tempdir().unwrap();
    let work = work_dir(dir.path());
    let source = write_source(dir.path(), "hello.cns", HELLO);
    let case = TestCase::load(&source, &work).unwrap();

    let outcome = Pipeline::new(toolchain()).with_keep_artifacts(true).run_case(&case);

    assert!(outcome.passed());
    assert!(case.executable.exists());
    assert_eq!(outcome.retained.len(), 2);
}

#[test]
fn test_compiler_failure_never_executes() {
    let dir = tempfile::tempdir().unwrap();
    let work = work_dir(dir.path());
    let marker = dir.path().join("ran");
    let source = write_source(
        dir.path(),
        "boom.cns",
        &format!("touch {}\necho 1 # // expect: 1\n", marker.display()),
    );
    let case = TestCase::load(&source, &work).unwrap();
    let toolchain = Toolchain::new("false", "sh").with_native_flags(["-c", INSTALL_SCRIPT]);

    let outcome = Pipeline::new(toolchain).run_case(&case);

    assert_eq!(outcome.status, CaseStatus::BuildFailed("exited with code 1".to_string()));
    assert!(outcome.actual.is_empty());
    assert!(!marker.exists());
    assert!(!case.executable.exists());
    assert_eq!(outcome.retained, vec![case.intermediate.clone(), case.executable.clone()]);
}

#[test]
fn test_missing_compiler_is_build_failure() {
    let dir = tempfile::tempdir().unwrap();
    let work = work_dir(dir.path());
    let source = write_source(dir.path(), "a.cns", "echo 1 # // expect: 1\n");
    let case = TestCase::load(&source, &work).unwrap();
    let toolchain = Toolchain::new(dir.path().join("no-such-compiler"), "sh");

    let outcome = Pipeline::new(toolchain).run_case(&case);

    assert!(matches!(outcome.status, CaseStatus::BuildFailed(ref r) if r.starts_with("failed to launch")));
}

#[test]
fn test_compiler_that_writes_nothing_is_build_failure() {
    let dir = tempfile::tempdir().unwrap();
    let work = work_dir(dir.path());
    let source = write_source(dir.path(), "quiet.cns", "");
    let case = TestCase::load(&source, &work).unwrap();
    let toolchain = Toolchain::new("true", "sh").with_native_flags(["-c", INSTALL_SCRIPT]);

    let outcome = Pipeline::new(toolchain).run_case(&case);

    assert_eq!(
        outcome.status,
        CaseStatus::BuildFailed(format!("no output written to {}", case.intermediate.display()))
    );
    assert!(!case.executable.exists());
}

#[test]
fn test_rerun_ignores_artifacts_left_by_failed_run() {
    let dir = tempfile::tempdir().unwrap();
    let work = work_dir(dir.path());
    let source = write_source(dir.path(), "stale.cns", "");
    let case = TestCase::load(&source, &work).unwrap();

    // A native compile failure keeps the intermediate around.
    let broken_native = Toolchain::new("cp", "sh").with_native_flags(["-c", "exit 1"]);
    let outcome = Pipeline::new(broken_native).run_case(&case);
    assert_eq!(outcome.status, CaseStatus::NativeCompileFailed("exited with code 1".to_string()));
    assert!(case.intermediate.exists());

    let silent_compiler = Toolchain::new("true", "sh").with_native_flags(["-c", INSTALL_SCRIPT]);
    let outcome = Pipeline::new(silent_compiler).run_case(&case);
    assert!(matches!(outcome.status, CaseStatus::BuildFailed(ref r) if r.starts_with("no output written")));

    // A kept executable from a previous run must not satisfy a silent native step.
    let outcome = Pipeline::new(toolchain()).with_keep_artifacts(true).run_case(&case);
    assert!(outcome.passed());
    assert!(case.executable.exists());

    let silent_native = Toolchain::new("cp", "true");
    let outcome = Pipeline::new(silent_native).run_case(&case);
    assert!(matches!(
        outcome.status,
        CaseStatus::NativeCompileFailed(ref r) if r.starts_with("no executable written")
    ));
}

#[test]
fn test_native_compile_failure_is_classified() {
    let dir = tempfile::tempdir().unwrap();
    let work = work_dir(dir.path());
    let source = write_source(dir.path(), "a.cns", "echo 1 # // expect: 1\n");
    let case = TestCase::load(&source, &work).unwrap();
    let toolchain = Toolchain::new("cp", "sh").with_native_flags(["-c", "echo 'error: bad code' 1>&2; exit 1"]);

    let outcome = Pipeline::new(toolchain).run_case(&case);

    assert_eq!(
        outcome.status,
        CaseStatus::NativeCompileFailed("exited with code 1".to_string())
    );
    assert_eq!(outcome.stderr, "error: bad code\n");
    assert!(case.intermediate.exists());
}

#[test]
fn test_crash_is_runtime_failure() {
    let dir = tempfile::tempdir().unwrap();
    let work = work_dir(dir.path());
    let source = write_source(dir.path(), "crash.cns", "echo 1 # // expect: 1\nexit 3\n");
    let case = TestCase::load(&source, &work).unwrap();

    let outcome = Pipeline::new(toolchain()).run_case(&case);

    assert_eq!(outcome.status, CaseStatus::RuntimeFailed("exited with code 3".to_string()));
    assert_eq!(outcome.actual, "1\n");
}

/// True once `pid` is gone or a zombie.
#[cfg(target_os = "linux")]
fn process_gone(pid: &str) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state == "Z" || state == "X"),
    }
}

#[test]
fn test_runaway_program_times_out_and_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let work = work_dir(dir.path());
    let pid_file = dir.path().join("sleeper.pid");
    let source = write_source(
        dir.path(),
        "spin.cns",
        &format!(
            "echo started # // expect: started\nsleep 30 &\necho $! > {}\nwait\n",
            pid_file.display()
        ),
    );
    let case = TestCase::load(&source, &work).unwrap();
    let limit = Duration::from_millis(500);

    let start = Instant::now();
    let outcome = Pipeline::new(toolchain()).with_run_timeout(limit).run_case(&case);

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.status, CaseStatus::TimedOut(limit));
    assert_eq!(outcome.actual, "started\n");
    assert!(case.executable.exists());

    #[cfg(target_os = "linux")]
    {
        let pid = fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !process_gone(pid) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(process_gone(pid), "background sleep {} survived the timeout", pid);
    }
}

#[test]
fn test_suite_runs_every_case_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let tests = dir.path().join("tests");
    fs::create_dir_all(&tests).unwrap();
    write_source(&tests, "c_slow.cns", "sleep 30\n");
    write_source(&tests, "a_hello.cns", HELLO);
    write_source(&tests, "b_wrong.cns", "echo 2 # // expect: 1\n");
    write_source(&tests, "d_silent.cns", "true\n");
    fs::write(tests.join("notes.txt"), "// expect: ignored").unwrap();

    let options = SuiteOptions::new(&tests, dir.path().join("work"));
    let pipeline = Pipeline::new(toolchain()).with_run_timeout(Duration::from_millis(300));
    let report = run_suite(&options, &pipeline, &mut SilentReporter).unwrap();

    let names: Vec<&str> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["a_hello", "b_wrong", "c_slow", "d_silent"]);
    assert!(report.outcomes[0].passed());
    assert_eq!(report.outcomes[1].status, CaseStatus::OutputMismatch);
    assert!(matches!(report.outcomes[2].status, CaseStatus::TimedOut(_)));
    assert!(report.outcomes[3].passed());
    assert_eq!(report.passed(), 2);
    assert_eq!(report.failed(), 2);
    assert!(!report.success());
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_exitfirst_and_filter() {
    let dir = tempfile::tempdir().unwrap();
    let tests = dir.path().join("tests");
    fs::create_dir_all(&tests).unwrap();
    write_source(&tests, "a_wrong.cns", "echo 2 # // expect: 1\n");
    write_source(&tests, "b_hello.cns", HELLO);

    let pipeline = Pipeline::new(toolchain());

    let options = SuiteOptions::new(&tests, dir.path().join("work")).with_stop_on_fail(true);
    let report = run_suite(&options, &pipeline, &mut SilentReporter).unwrap();
    assert_eq!(report.outcomes.len(), 1);

    let options = SuiteOptions::new(&tests, dir.path().join("work")).with_filter(Some("hello".to_string()));
    let report = run_suite(&options, &pipeline, &mut SilentReporter).unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.success());
}

#[test]
fn test_locator_finds_src_layout() {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build");
    fs::create_dir_all(build.join("src")).unwrap();
    fs::write(build.join("src/chtholly"), b"").unwrap();

    assert_eq!(locate(&build, "chtholly"), Some(build.join("src/chtholly")));
}
